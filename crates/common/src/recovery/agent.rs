use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::RecoveryError;
use crate::crypto::{GroupKeypair, GroupPublicKey};
use crate::vault::{self, FieldMap, TaggedEncrypted};

/// One tag's unit after the proxy step, readable only by `agent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveredUnit {
    pub agent: GroupPublicKey,
    pub unit: TaggedEncrypted,
}

/// Tag name to re-encrypted unit, as released on a successful recovery
pub type RecoveryBundle = BTreeMap<String, RecoveredUnit>;

/// Holder of a recovery secret key
///
/// Shares in a backup target an agent's public key. Only the agent can open
/// what the proxy step produces for it.
#[async_trait]
pub trait RecoveryAgent: Send + Sync + Debug + 'static {
    fn public_key(&self) -> GroupPublicKey;

    async fn open(&self, unit: &TaggedEncrypted) -> Result<FieldMap, RecoveryError>;
}

/// Agent with its secret key in process memory
#[derive(Debug, Clone)]
pub struct KeyAgent {
    keypair: GroupKeypair,
}

impl KeyAgent {
    pub fn new(keypair: GroupKeypair) -> Self {
        Self { keypair }
    }
}

impl From<GroupKeypair> for KeyAgent {
    fn from(keypair: GroupKeypair) -> Self {
        Self::new(keypair)
    }
}

#[async_trait]
impl RecoveryAgent for KeyAgent {
    fn public_key(&self) -> GroupPublicKey {
        *self.keypair.public()
    }

    async fn open(&self, unit: &TaggedEncrypted) -> Result<FieldMap, RecoveryError> {
        vault::decrypt(self.keypair.secret(), unit).map_err(|_| RecoveryError::DecryptionFailed)
    }
}

/// Routes each recovered unit to the agent it targets
#[derive(Debug, Clone, Default)]
pub struct AgentPool {
    agents: Vec<Arc<dyn RecoveryAgent>>,
}

impl AgentPool {
    pub fn new(agents: Vec<Arc<dyn RecoveryAgent>>) -> Self {
        Self { agents }
    }

    pub fn public_keys(&self) -> Vec<GroupPublicKey> {
        self.agents.iter().map(|agent| agent.public_key()).collect()
    }

    fn agent(&self, pk: &GroupPublicKey) -> Option<&Arc<dyn RecoveryAgent>> {
        self.agents.iter().find(|agent| &agent.public_key() == pk)
    }

    /// Open every unit of `bundle`, in tag order
    pub async fn open_bundle(&self, bundle: &RecoveryBundle) -> Result<Vec<FieldMap>, RecoveryError> {
        let mut opened = Vec::with_capacity(bundle.len());
        for (tag, recovered) in bundle {
            let agent = self
                .agent(&recovered.agent)
                .ok_or_else(|| RecoveryError::UnknownAgent(tag.clone()))?;
            opened.push(agent.open(&recovered.unit).await?);
        }
        Ok(opened)
    }
}

impl<A: RecoveryAgent> FromIterator<A> for AgentPool {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|agent| Arc::new(agent) as Arc<dyn RecoveryAgent>)
                .collect(),
        )
    }
}
