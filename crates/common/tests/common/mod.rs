//! Shared test utilities for protocol integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use common::crypto::GroupKeypair;
use common::delivery::{run_worker, DeliveryConfig, DeliveryDispatcher, RetryPolicy};
use common::envelope::ReplayGuard;
use common::protocol::{Custodian, RelyingParty, Wallet};
use common::recovery::{
    AgentPool, KeyAgent, MemoryLedger, Notifier, RecoveryConfig, RecoveryError, RecoveryLedger,
};
use common::session::MemorySessionStore;
use common::store::MemoryStore;

pub type TestCustodian = Custodian<MemoryStore, MemoryLedger>;
pub type TestApp = RelyingParty<MemorySessionStore>;

/// Captures one-time codes instead of sending them
#[derive(Debug, Default)]
pub struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

impl Outbox {
    /// Most recent code sent to `contact`
    pub fn code_for(&self, contact: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|(c, _)| c == contact)
            .map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl Notifier for Outbox {
    async fn send_code(&self, _id: &str, contact: &str, code: &str) -> Result<(), RecoveryError> {
        self.sent.lock().push((contact.to_string(), code.to_string()));
        Ok(())
    }
}

pub struct TestEnv {
    pub custodian: TestCustodian,
    pub app: TestApp,
    pub outbox: Arc<Outbox>,
    pub agent: GroupKeypair,
    /// Opens what the custodian releases on recovery
    pub agents: AgentPool,
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
    }
}

/// A custodian and relying party "app1" wired together in-process, with the
/// delivery worker running
pub fn setup_test_env(threshold: usize) -> TestEnv {
    let config = DeliveryConfig {
        max_queue_size: Some(64),
        retry: fast_retry(),
    };
    let (dispatcher, receiver) = DeliveryDispatcher::new(&config);

    let agent = GroupKeypair::generate();
    let outbox = Arc::new(Outbox::default());
    let recovery = RecoveryLedger::new(
        MemoryLedger::new(),
        RecoveryConfig {
            threshold,
            ..Default::default()
        },
        outbox.clone(),
        vec![*agent.public()],
    );
    let custodian = Custodian::new(MemoryStore::new(), ReplayGuard::default(), dispatcher, recovery);

    let app = RelyingParty::new(
        GroupKeypair::generate(),
        vec!["city".to_string()],
        Url::parse("http://127.0.0.1:4001/").unwrap(),
        MemorySessionStore::new(),
    );
    tokio::spawn(run_worker(Arc::new(app.clone()), config.retry, receiver));

    TestEnv {
        custodian,
        app,
        outbox,
        agents: [KeyAgent::from(agent.clone())].into_iter().collect(),
        agent,
    }
}

/// A wallet registered with the custodian and holding `fields` as
/// `(key, value, tag)`, already uploaded
pub async fn registered_wallet(
    custodian: &TestCustodian,
    id: &str,
    fields: &[(&str, &str, &str)],
) -> Wallet {
    let mut wallet = Wallet::new(id);
    custodian
        .register(id, wallet.registration().unwrap())
        .await
        .unwrap();
    for (key, value, tag) in fields {
        wallet.set_field(*key, *value, *tag);
    }
    if !fields.is_empty() {
        custodian
            .set_data(id, wallet.upload().unwrap())
            .await
            .unwrap();
    }
    wallet
}
