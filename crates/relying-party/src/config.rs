use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use common::crypto::{GroupKeypair, GroupSecretKey};
use common::session::DEFAULT_SESSION_TTL;

/// Relying-party configuration, read from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Base URL the custodian reaches us on; callbacks hang off it.
    /// Derived from `listen_addr` when not set.
    #[serde(default)]
    pub public_url: Option<Url>,
    /// Custodian to cross-check generators with at startup
    #[serde(default)]
    pub custodian_url: Option<Url>,
    /// Field names every session asks for
    #[serde(default = "default_requested")]
    pub requested: Vec<String>,
    /// Hex group secret key; a fresh one per process when not set
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Upper bound on how long a `/data` poll may block
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// How long a session stays readable after `/appInfo` opened it
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4000))
}

fn default_requested() -> Vec<String> {
    vec!["city".to_string()]
}

fn default_max_wait_ms() -> u64 {
    30_000
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            public_url: None,
            custodian_url: None,
            requested: default_requested(),
            secret_key: None,
            max_wait_ms: default_max_wait_ms(),
            session_ttl_secs: default_session_ttl_secs(),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
                Ok(toml::from_str(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn log_level(&self) -> Result<tracing::Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::LogLevel(self.log_level.clone()))
    }

    pub fn public_url(&self) -> Result<Url, ConfigError> {
        if let Some(url) = &self.public_url {
            return Ok(url.clone());
        }
        let mut addr = self.listen_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(Ipv4Addr::LOCALHOST.into());
        }
        Ok(Url::parse(&format!("http://{}/", addr))?)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn keypair(&self) -> Result<GroupKeypair, ConfigError> {
        match &self.secret_key {
            Some(hex) => GroupSecretKey::from_hex(hex)
                .map(GroupKeypair::from)
                .map_err(|e| ConfigError::SecretKey(e.to_string())),
            None => Ok(GroupKeypair::generate()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0:?}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid log level: {0}")]
    LogLevel(String),
    #[error("invalid secret key: {0}")]
    SecretKey(String),
    #[error("invalid public url: {0}")]
    PublicUrl(#[from] url::ParseError),
}
