use std::fmt::{Debug, Display};

use async_trait::async_trait;

use crate::crypto::PublicKey;
use crate::vault::EncryptedVault;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError<T> {
    #[error("unhandled store provider error: {0}")]
    Provider(#[from] T),
    /// An identity is already registered under this id
    #[error("identity already registered: {0}")]
    Conflict(String),
    /// No identity is registered under this id
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
}

/// Custodian-side storage: identities and their encrypted vaults
///
/// Keyed by `id` for identities and by `(id, tag)` for ciphertext units.
/// Implementations must replace a tag's `TaggedEncrypted` as one unit, so a
/// reader never sees the payload of one write next to the key of another.
#[async_trait]
pub trait CustodianStore: Send + Sync + Debug + Clone + 'static {
    type Error: Display + Debug + Send + Sync + 'static;

    /// Register the signing key for a new identity
    ///
    /// Should fail with `StoreError::Conflict` if `id` is taken.
    async fn register(&self, id: &str, key: PublicKey) -> Result<(), StoreError<Self::Error>>;

    /// The signing key registered for `id`, if any
    async fn identity(&self, id: &str) -> Result<Option<PublicKey>, StoreError<Self::Error>>;

    /// Write ciphertext units for `id`
    ///
    /// Each tag in `vault` replaces the stored unit for that tag; tags not in
    /// `vault` are left alone.
    ///
    /// Should fail with `StoreError::UnknownIdentity` if `id` is not registered.
    async fn put(&self, id: &str, vault: EncryptedVault) -> Result<(), StoreError<Self::Error>>;

    /// All ciphertext units for `id`
    ///
    /// Should fail with `StoreError::UnknownIdentity` if `id` is not registered.
    async fn get(&self, id: &str) -> Result<EncryptedVault, StoreError<Self::Error>>;

    /// The ciphertext units for the listed tags, skipping tags with nothing stored
    async fn tags(
        &self,
        id: &str,
        tags: &[String],
    ) -> Result<EncryptedVault, StoreError<Self::Error>> {
        let mut vault = self.get(id).await?;
        vault.retain(|tag, _| tags.contains(tag));
        Ok(vault)
    }
}
