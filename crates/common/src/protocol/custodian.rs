use std::sync::Arc;

use url::Url;

use super::{DisclosureState, ProtocolError, Registration, TaggedReKey};
use crate::crypto::{pre, Generators, GroupPublicKey, PublicKey};
use crate::delivery::{DeliveryDispatcher, DeliveryJob};
use crate::envelope::{Envelope, ReplayGuard};
use crate::recovery::{BackupPayload, BackupRecord, LedgerProvider, RecoveryBundle, RecoveryLedger};
use crate::store::CustodianStore;
use crate::vault::{EncryptedVault, TaggedEncrypted};

/// The proxy: stores ciphertexts and transforms them on the user's say-so
///
/// Cheap to clone; every clone shares the same store, replay guard and
/// delivery queue.
#[derive(Debug, Clone)]
pub struct Custodian<S, L> {
    store: S,
    guard: Arc<ReplayGuard>,
    dispatcher: DeliveryDispatcher,
    recovery: RecoveryLedger<L>,
}

impl<S, L> Custodian<S, L>
where
    S: CustodianStore,
    L: LedgerProvider,
{
    pub fn new(
        store: S,
        guard: ReplayGuard,
        dispatcher: DeliveryDispatcher,
        recovery: RecoveryLedger<L>,
    ) -> Self {
        Self {
            store,
            guard: Arc::new(guard),
            dispatcher,
            recovery,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn generators(&self) -> Generators {
        Generators::current()
    }

    /// Public keys of the configured recovery agents
    pub fn recovery_agents(&self) -> Vec<GroupPublicKey> {
        self.recovery.agent_keys()
    }

    /// Open an envelope against the key registered for `id`
    ///
    /// An unknown `id` is `Unauthorized`, like a bad signature.
    async fn authenticate<T: serde::Serialize>(
        &self,
        id: &str,
        envelope: Envelope<T>,
    ) -> Result<T, ProtocolError> {
        let key = self
            .store
            .identity(id)
            .await?
            .ok_or_else(|| ProtocolError::Unauthorized(format!("no identity registered for {}", id)))?;
        Ok(envelope.open(&key, &self.guard, id)?)
    }

    /// Register `id` with the key that signed the envelope
    pub async fn register(
        &self,
        id: &str,
        envelope: Envelope<Registration>,
    ) -> Result<(), ProtocolError> {
        if id.trim().is_empty() {
            return Err(ProtocolError::InvalidRequest("empty id".into()));
        }
        let key = envelope.payload.public_key;
        let registration = envelope.open(&key, &self.guard, id)?;
        self.store.register(id, registration.public_key).await?;
        tracing::info!("CUSTODIAN: registered identity {}", id);
        Ok(())
    }

    pub async fn identity(&self, id: &str) -> Result<PublicKey, ProtocolError> {
        self.store
            .identity(id)
            .await?
            .ok_or_else(|| ProtocolError::UnknownIdentity(id.to_string()))
    }

    /// The stored ciphertexts for `id`
    pub async fn data(&self, id: &str) -> Result<EncryptedVault, ProtocolError> {
        Ok(self.store.get(id).await?)
    }

    /// Replace the ciphertext units of the tags in the envelope
    pub async fn set_data(
        &self,
        id: &str,
        envelope: Envelope<EncryptedVault>,
    ) -> Result<Vec<String>, ProtocolError> {
        let vault = self.authenticate(id, envelope).await?;
        for (tag, sealed) in &vault {
            pre::check(&sealed.key).map_err(|e| {
                tracing::warn!("CUSTODIAN: rejecting tag {} for {}: {}", tag, id, e);
                ProtocolError::from(e)
            })?;
        }

        let tags: Vec<String> = vault.keys().cloned().collect();
        self.store.put(id, vault).await?;
        tracing::info!("CUSTODIAN: stored {} tag(s) for {}", tags.len(), id);
        Ok(tags)
    }

    /// Transform the stored key ciphertexts of the submitted tags and queue
    /// the bundle for `callback`
    ///
    /// Tags with nothing stored are skipped. Returns the tags that will be
    /// delivered; delivery itself happens in the background.
    pub async fn re_encrypt(
        &self,
        id: &str,
        callback: Url,
        envelope: Envelope<TaggedReKey>,
    ) -> Result<Vec<String>, ProtocolError> {
        if !matches!(callback.scheme(), "http" | "https") {
            return Err(ProtocolError::InvalidRequest(format!(
                "unsupported callback scheme: {}",
                callback.scheme()
            )));
        }
        let keys = self.authenticate(id, envelope).await?;
        tracing::info!(
            "CUSTODIAN [{}]: {} re-encryption key(s) from {}",
            DisclosureState::KeySubmitted,
            keys.len(),
            id
        );

        let requested: Vec<String> = keys.keys().cloned().collect();
        let stored = self.store.tags(id, &requested).await?;

        let mut bundle = EncryptedVault::new();
        for (tag, rk) in &keys {
            let Some(sealed) = stored.get(tag) else {
                tracing::warn!("CUSTODIAN: {} has no tag {}, nothing to disclose", id, tag);
                continue;
            };
            let key = pre::re_encrypt(rk, &sealed.key)?;
            bundle.insert(
                tag.clone(),
                TaggedEncrypted {
                    data: sealed.data.clone(),
                    key,
                    iv: sealed.iv.clone(),
                },
            );
        }

        let disclosed: Vec<String> = bundle.keys().cloned().collect();
        if disclosed.is_empty() {
            tracing::info!("CUSTODIAN: nothing to disclose for {}", id);
            return Ok(disclosed);
        }

        self.dispatcher.dispatch(DeliveryJob {
            id: id.to_string(),
            callback,
            bundle,
        })?;
        tracing::info!(
            "CUSTODIAN [{}]: queued {:?} for delivery",
            DisclosureState::ReEncrypted,
            disclosed
        );
        Ok(disclosed)
    }

    /// Append a signed recovery backup to the ledger
    pub async fn backup(
        &self,
        id: &str,
        envelope: Envelope<BackupPayload>,
    ) -> Result<(), ProtocolError> {
        let nonce = envelope.nonce.clone();
        let signature = envelope.signature.clone();
        let shares = self.authenticate(id, envelope).await?;
        let record = BackupRecord {
            shares,
            nonce,
            signature,
            recorded_at: chrono::Utc::now(),
        };
        Ok(self.recovery.backup(id, record).await?)
    }

    pub async fn send_code(&self, id: &str, contact: &str) -> Result<(), ProtocolError> {
        self.identity(id).await?;
        Ok(self.recovery.send_code(id, contact).await?)
    }

    /// Release the stored units the codes unlock, re-encrypted to their
    /// recovery agents
    pub async fn recover_by_code(
        &self,
        id: &str,
        codes: &[String],
    ) -> Result<RecoveryBundle, ProtocolError> {
        let vault = self.store.get(id).await?;
        Ok(self.recovery.recover(id, codes, &vault).await?)
    }
}
