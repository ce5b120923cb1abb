use std::sync::Arc;

use common::delivery::{DeliveryDispatcher, JobReceiver};
use common::envelope::ReplayGuard;
use common::protocol::Custodian;
use common::recovery::{AgentPool, KeyAgent, MemoryLedger, RecoveryLedger, TracingNotifier};
use common::store::MemoryStore;

use crate::config::{Config, ConfigError};

pub type CustodianService = Custodian<MemoryStore, MemoryLedger>;

/// Shared state handed to every request handler
#[derive(Debug, Clone)]
pub struct State {
    custodian: CustodianService,
    agents: AgentPool,
}

impl State {
    /// Build the custodian from config
    ///
    /// Returns the receiving end of the delivery queue; the caller is
    /// responsible for running a worker on it.
    pub fn from_config(config: &Config) -> Result<(Self, JobReceiver), StateError> {
        let (dispatcher, receiver) = DeliveryDispatcher::new(&config.delivery_config());
        let agents: AgentPool = config
            .recovery_agents()?
            .into_iter()
            .map(KeyAgent::from)
            .collect();
        let agent_keys = agents.public_keys();
        tracing::info!("STATE: {} recovery agent(s) configured", agent_keys.len());

        // the ledger only ever sees the agents' public keys
        let recovery = RecoveryLedger::new(
            MemoryLedger::new(),
            config.recovery_config(),
            Arc::new(TracingNotifier),
            agent_keys,
        );
        let custodian = Custodian::new(
            MemoryStore::new(),
            ReplayGuard::new(config.replay_window()),
            dispatcher,
            recovery,
        );
        Ok((Self { custodian, agents }, receiver))
    }

    pub fn custodian(&self) -> &CustodianService {
        &self.custodian
    }

    /// Recovery agents hosted alongside the custodian
    pub fn agents(&self) -> &AgentPool {
        &self.agents
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to install signal handlers: {0}")]
    Signal(#[from] std::io::Error),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
