use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::crypto::{GroupKeypair, GroupSecretKey};
use common::delivery::{DeliveryConfig, RetryPolicy};
use common::recovery::RecoveryConfig;

/// Custodian service configuration, read from TOML
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP API listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Default log directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily-rolling log files (stdout only if not set)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Accepted clock skew for signed requests, in seconds
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: u64,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub recovery: RecoverySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Timeout of a single callback POST
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Queued jobs before new submissions are refused; unbounded if not set
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySettings {
    /// Distinct contacts that must be unlocked to recover
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    #[serde(default = "default_code_ttl_secs")]
    pub code_ttl_secs: u64,
    /// Recovery agent secret keys, hex encoded
    #[serde(default)]
    pub agent_keys: Vec<String>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_replay_window_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

fn default_queue_capacity() -> Option<usize> {
    Some(1000)
}

fn default_threshold() -> usize {
    1
}

fn default_code_ttl_secs() -> u64 {
    600
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            code_ttl_secs: default_code_ttl_secs(),
            agent_keys: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            log_dir: None,
            replay_window_secs: default_replay_window_secs(),
            delivery: DeliverySettings::default(),
            recovery: RecoverySettings::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
                Self::from_toml(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn log_level(&self) -> Result<tracing::Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::LogLevel(self.log_level.clone()))
    }

    pub fn replay_window(&self) -> Duration {
        Duration::from_secs(self.replay_window_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.delivery.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.delivery.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.delivery.max_backoff_ms),
        }
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            max_queue_size: self.delivery.queue_capacity,
            retry: self.retry_policy(),
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery.attempt_timeout_ms)
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            threshold: self.recovery.threshold,
            code_ttl: Duration::from_secs(self.recovery.code_ttl_secs),
        }
    }

    /// Parse the configured recovery agents
    ///
    /// With none configured, a single ephemeral agent is generated so that
    /// backups work on development deployments. Its shares do not survive a
    /// restart.
    pub fn recovery_agents(&self) -> Result<Vec<GroupKeypair>, ConfigError> {
        if self.recovery.agent_keys.is_empty() {
            tracing::warn!("no recovery agents configured, generating an ephemeral one");
            return Ok(vec![GroupKeypair::generate()]);
        }
        self.recovery
            .agent_keys
            .iter()
            .map(|hex| {
                GroupSecretKey::from_hex(hex)
                    .map(GroupKeypair::from)
                    .map_err(|e| ConfigError::AgentKey(e.to_string()))
            })
            .collect()
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
    #[error("invalid recovery agent key: {0}")]
    AgentKey(String),
}
