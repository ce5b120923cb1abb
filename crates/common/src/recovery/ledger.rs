use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Display};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{GroupPublicKey, ReEncryptionKey};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError<T> {
    #[error("unhandled ledger provider error: {0}")]
    Provider(#[from] T),
}

/// Recovery material for one tag
///
/// Holds a re-encryption key from the tag key to a recovery agent, never a
/// secret key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryShare {
    pub rk: ReEncryptionKey,
    /// Out-of-band channel a one-time code is sent to, e.g. an email address
    pub contact: String,
    /// The recovery agent `rk` targets
    pub agent: GroupPublicKey,
}

/// Signed backup payload: tag name to recovery share
pub type BackupPayload = BTreeMap<String, RecoveryShare>;

/// One authenticated entry on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub shares: BackupPayload,
    /// Nonce and signature of the envelope that carried `shares`
    pub nonce: String,
    pub signature: String,
    pub recorded_at: DateTime<Utc>,
}

impl BackupRecord {
    /// Distinct contact channels named by this record
    pub fn contacts(&self) -> Vec<&str> {
        let mut contacts: Vec<&str> = self.shares.values().map(|s| s.contact.as_str()).collect();
        contacts.sort_unstable();
        contacts.dedup();
        contacts
    }
}

/// Append-only ledger of backup records keyed by `id`
///
/// Records are never rewritten; the most recent one for an `id` is authoritative.
#[async_trait]
pub trait LedgerProvider: Send + Sync + Debug + Clone + 'static {
    type Error: Display + Debug + Send + Sync + 'static;

    async fn append(&self, id: &str, record: BackupRecord) -> Result<(), LedgerError<Self::Error>>;

    /// Every record for `id`, oldest first
    async fn records(&self, id: &str) -> Result<Vec<BackupRecord>, LedgerError<Self::Error>>;

    /// The authoritative record for `id`
    async fn latest(&self, id: &str) -> Result<Option<BackupRecord>, LedgerError<Self::Error>> {
        Ok(self.records(id).await?.pop())
    }
}

/// In-memory ledger
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<RwLock<HashMap<String, Vec<BackupRecord>>>>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryLedgerError {
    #[error("memory ledger error: {0}")]
    Internal(String),
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerProvider for MemoryLedger {
    type Error = MemoryLedgerError;

    async fn append(&self, id: &str, record: BackupRecord) -> Result<(), LedgerError<Self::Error>> {
        let mut inner = self.inner.write().map_err(|e| {
            LedgerError::Provider(MemoryLedgerError::Internal(format!(
                "failed to acquire write lock: {}",
                e
            )))
        })?;
        inner.entry(id.to_string()).or_default().push(record);
        Ok(())
    }

    async fn records(&self, id: &str) -> Result<Vec<BackupRecord>, LedgerError<Self::Error>> {
        let inner = self.inner.read().map_err(|e| {
            LedgerError::Provider(MemoryLedgerError::Internal(format!(
                "failed to acquire read lock: {}",
                e
            )))
        })?;
        Ok(inner.get(id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{pre, GroupKeypair};

    fn record(contact: &str) -> BackupRecord {
        let tag = GroupKeypair::generate();
        let agent = GroupKeypair::generate();
        BackupRecord {
            shares: BTreeMap::from([(
                "city".to_string(),
                RecoveryShare {
                    rk: pre::re_key(tag.secret(), agent.public()),
                    contact: contact.to_string(),
                    agent: *agent.public(),
                },
            )]),
            nonce: "00".into(),
            signature: "00".into(),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_only_latest_wins() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.latest("alice").await.unwrap(), None);

        let first = record("a@example.com");
        let second = record("b@example.com");
        ledger.append("alice", first.clone()).await.unwrap();
        ledger.append("alice", second.clone()).await.unwrap();

        assert_eq!(ledger.records("alice").await.unwrap(), vec![first, second.clone()]);
        assert_eq!(ledger.latest("alice").await.unwrap(), Some(second));
        assert!(ledger.records("bob").await.unwrap().is_empty());
    }

    #[test]
    fn test_record_json_roundtrip() {
        let record = record("a@example.com");
        let json = serde_json::to_string(&record).unwrap();
        let back: BackupRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.contacts(), vec!["a@example.com"]);
    }
}
