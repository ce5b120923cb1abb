//! Custodian-independent recovery of tag data
//!
//! At backup time the user derives, for each tag, a re-encryption key from the
//! tag key to a recovery agent's public key and records it on an append-only
//! ledger together with a contact channel. No secret key is ever stored.
//!
//! To recover, the user asks for one-time codes on the recorded contacts and
//! presents them. Once enough distinct contacts are unlocked, each unlocked
//! share is applied as a proxy transform to the stored ciphertext. The
//! resulting bundle is only readable by the targeted [`RecoveryAgent`], which
//! runs apart from the ledger and holds the only copy of its secret key.

mod agent;
mod codes;
mod ledger;

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

pub use agent::{AgentPool, KeyAgent, RecoveredUnit, RecoveryAgent, RecoveryBundle};
pub use codes::{CodeBook, Notifier, TracingNotifier, DEFAULT_CODE_TTL, MAX_CODE_MISSES};
pub use ledger::{
    BackupPayload, BackupRecord, LedgerError, LedgerProvider, MemoryLedger, MemoryLedgerError,
    RecoveryShare,
};

use crate::crypto::{pre, GroupPublicKey};
use crate::vault::{EncryptedVault, TaggedEncrypted};

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("no backup on record for {0}")]
    NoBackup(String),
    #[error("contact not on record: {0}")]
    UnknownContact(String),
    #[error("invalid backup: {0}")]
    InvalidBackup(String),
    #[error("invalid codes: {0}")]
    InvalidCodes(String),
    #[error("no recovery agent for tag {0}")]
    UnknownAgent(String),
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("notification failed: {0}")]
    Notify(String),
    #[error("ledger error: {0}")]
    Ledger(String),
}

impl<T: Display> From<LedgerError<T>> for RecoveryError {
    fn from(e: LedgerError<T>) -> Self {
        RecoveryError::Ledger(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Distinct contacts that must be unlocked before anything is recovered
    pub threshold: usize,
    pub code_ttl: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            threshold: 1,
            code_ttl: DEFAULT_CODE_TTL,
        }
    }
}

/// Ledger-backed recovery, run alongside the custodian
#[derive(Debug, Clone)]
pub struct RecoveryLedger<L> {
    ledger: L,
    codes: Arc<CodeBook>,
    notifier: Arc<dyn Notifier>,
    agents: Arc<Vec<GroupPublicKey>>,
    threshold: usize,
}

impl<L: LedgerProvider> RecoveryLedger<L> {
    pub fn new(
        ledger: L,
        config: RecoveryConfig,
        notifier: Arc<dyn Notifier>,
        agents: Vec<GroupPublicKey>,
    ) -> Self {
        Self {
            ledger,
            codes: Arc::new(CodeBook::new(config.code_ttl)),
            notifier,
            agents: Arc::new(agents),
            threshold: config.threshold.max(1),
        }
    }

    /// Public keys of the recovery agents shares may target
    pub fn agent_keys(&self) -> Vec<GroupPublicKey> {
        self.agents.to_vec()
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    fn knows_agent(&self, pk: &GroupPublicKey) -> bool {
        self.agents.contains(pk)
    }

    /// Append an already authenticated backup record for `id`
    pub async fn backup(&self, id: &str, record: BackupRecord) -> Result<(), RecoveryError> {
        if record.shares.is_empty() {
            return Err(RecoveryError::InvalidBackup("no shares".into()));
        }
        for (tag, share) in &record.shares {
            if !self.knows_agent(&share.agent) {
                return Err(RecoveryError::InvalidBackup(format!(
                    "tag {} targets an unknown recovery agent",
                    tag
                )));
            }
            if share.contact.trim().is_empty() {
                return Err(RecoveryError::InvalidBackup(format!(
                    "tag {} has no contact",
                    tag
                )));
            }
        }

        let tags = record.shares.len();
        self.ledger.append(id, record).await?;
        tracing::info!("RECOVERY: recorded backup of {} tag(s) for {}", tags, id);
        Ok(())
    }

    /// Send a one-time code to a contact named in the latest backup
    pub async fn send_code(&self, id: &str, contact: &str) -> Result<(), RecoveryError> {
        let record = self
            .ledger
            .latest(id)
            .await?
            .ok_or_else(|| RecoveryError::NoBackup(id.to_string()))?;
        if !record.contacts().contains(&contact) {
            return Err(RecoveryError::UnknownContact(contact.to_string()));
        }

        let code = self.codes.issue(id, contact)?;
        self.notifier.send_code(id, contact, &code).await?;
        tracing::info!("RECOVERY: sent one-time code for {} to {}", id, contact);
        Ok(())
    }

    /// Re-encrypt every tag whose contact the codes unlock to its agent
    ///
    /// `vault` is the custodian's stored copy for `id`. Tags without stored
    /// data are skipped. At most one code per recorded contact is accepted.
    pub async fn recover(
        &self,
        id: &str,
        codes: &[String],
        vault: &EncryptedVault,
    ) -> Result<RecoveryBundle, RecoveryError> {
        let record = self
            .ledger
            .latest(id)
            .await?
            .ok_or_else(|| RecoveryError::NoBackup(id.to_string()))?;
        let unlocked = self
            .codes
            .redeem(id, codes, record.contacts().len(), self.threshold)?;

        let mut bundle = RecoveryBundle::new();
        for (tag, share) in &record.shares {
            if !unlocked.contains(&share.contact) {
                continue;
            }
            let Some(stored) = vault.get(tag) else {
                tracing::debug!("RECOVERY: no stored data for tag {} of {}, skipping", tag, id);
                continue;
            };

            let key = pre::re_encrypt(&share.rk, &stored.key)
                .map_err(|_| RecoveryError::DecryptionFailed)?;
            bundle.insert(
                tag.clone(),
                RecoveredUnit {
                    agent: share.agent,
                    unit: TaggedEncrypted {
                        key,
                        ..stored.clone()
                    },
                },
            );
        }

        tracing::info!(
            "RECOVERY: released {} tag(s) for {} via {} contact(s)",
            bundle.len(),
            id,
            unlocked.len()
        );
        Ok(bundle)
    }
}
