use common::protocol::RelyingParty;
use common::session::MemorySessionStore;

use crate::config::{Config, ConfigError};

pub type App = RelyingParty<MemorySessionStore>;

#[derive(Debug, Clone)]
pub struct State {
    app: App,
    max_wait: std::time::Duration,
}

impl State {
    pub fn from_config(config: &Config) -> Result<Self, StateError> {
        let app = RelyingParty::new(
            config.keypair()?,
            config.requested.clone(),
            config.public_url()?,
            MemorySessionStore::with_ttl(config.session_ttl()),
        );
        tracing::info!(
            "STATE: relying party {} asks for {:?}",
            app.public_key().to_hex(),
            config.requested
        );
        Ok(Self {
            app,
            max_wait: config.max_wait(),
        })
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn max_wait(&self) -> std::time::Duration {
        self.max_wait
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
