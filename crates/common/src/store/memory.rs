use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::provider::{CustodianStore, StoreError};
use crate::crypto::PublicKey;
use crate::vault::EncryptedVault;

/// In-memory custodian store using HashMaps
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    /// id -> registered signing key
    identities: HashMap<String, PublicKey>,
    /// id -> tag -> ciphertext unit
    vaults: HashMap<String, EncryptedVault>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryStoreError {
    #[error("memory store error: {0}")]
    Internal(String),
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryStoreInner::default())),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>, StoreError<MemoryStoreError>> {
        self.inner.read().map_err(|e| {
            StoreError::Provider(MemoryStoreError::Internal(format!(
                "failed to acquire read lock: {}",
                e
            )))
        })
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>, StoreError<MemoryStoreError>> {
        self.inner.write().map_err(|e| {
            StoreError::Provider(MemoryStoreError::Internal(format!(
                "failed to acquire write lock: {}",
                e
            )))
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CustodianStore for MemoryStore {
    type Error = MemoryStoreError;

    async fn register(&self, id: &str, key: PublicKey) -> Result<(), StoreError<Self::Error>> {
        let mut inner = self.write()?;
        if inner.identities.contains_key(id) {
            return Err(StoreError::Conflict(id.to_string()));
        }
        inner.identities.insert(id.to_string(), key);
        inner.vaults.insert(id.to_string(), EncryptedVault::new());
        Ok(())
    }

    async fn identity(&self, id: &str) -> Result<Option<PublicKey>, StoreError<Self::Error>> {
        let inner = self.read()?;
        Ok(inner.identities.get(id).copied())
    }

    async fn put(&self, id: &str, vault: EncryptedVault) -> Result<(), StoreError<Self::Error>> {
        // one write lock for the whole batch: units are swapped in whole
        let mut inner = self.write()?;
        let stored = inner
            .vaults
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownIdentity(id.to_string()))?;
        stored.extend(vault);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<EncryptedVault, StoreError<Self::Error>> {
        let inner = self.read()?;
        inner
            .vaults
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownIdentity(id.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{GroupKeypair, SecretKey};
    use crate::vault::{self, FieldMap};

    fn sealed(value: &str) -> crate::vault::TaggedEncrypted {
        let keypair = GroupKeypair::generate();
        let fields = FieldMap::from([("k".to_string(), value.to_string())]);
        vault::encrypt(keypair.public(), &fields).unwrap().0
    }

    #[tokio::test]
    async fn test_register_and_conflict() {
        let store = MemoryStore::new();
        let key = SecretKey::generate().public();

        store.register("alice", key).await.unwrap();
        assert_eq!(store.identity("alice").await.unwrap(), Some(key));
        assert_eq!(store.identity("bob").await.unwrap(), None);

        let err = store
            .register("alice", SecretKey::generate().public())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict("alice".to_string()));
        // the original key survives
        assert_eq!(store.identity("alice").await.unwrap(), Some(key));
    }

    #[tokio::test]
    async fn test_put_merges_per_tag() {
        let store = MemoryStore::new();
        store
            .register("alice", SecretKey::generate().public())
            .await
            .unwrap();

        let city = sealed("Beijing");
        let name = sealed("Alice");
        store
            .put(
                "alice",
                EncryptedVault::from([("city".to_string(), city.clone())]),
            )
            .await
            .unwrap();
        store
            .put(
                "alice",
                EncryptedVault::from([("name".to_string(), name.clone())]),
            )
            .await
            .unwrap();

        let vault = store.get("alice").await.unwrap();
        assert_eq!(vault.len(), 2);
        assert_eq!(vault["city"], city);

        let replacement = sealed("Shanghai");
        store
            .put(
                "alice",
                EncryptedVault::from([("city".to_string(), replacement.clone())]),
            )
            .await
            .unwrap();
        let only_city = store
            .tags("alice", &["city".to_string(), "bio".to_string()])
            .await
            .unwrap();
        assert_eq!(only_city.len(), 1);
        assert_eq!(only_city["city"], replacement);
    }

    #[tokio::test]
    async fn test_unknown_identity() {
        let store = MemoryStore::new();
        assert_eq!(
            store.get("nobody").await.unwrap_err(),
            StoreError::UnknownIdentity("nobody".to_string())
        );
        assert!(matches!(
            store.put("nobody", EncryptedVault::new()).await,
            Err(StoreError::UnknownIdentity(_))
        ));
    }
}
