//! The three-party disclosure protocol
//!
//! - [`Wallet`]: the user. Holds the identity key and the per-tag keys, builds
//!   signed submissions.
//! - [`Custodian`]: the proxy. Stores ciphertexts, authenticates submissions,
//!   transforms key ciphertexts and queues callback delivery. Holds no group
//!   secret key, so it cannot decrypt anything it stores.
//! - [`RelyingParty`]: the application. Publishes its public key and callback,
//!   decrypts delivered bundles and correlates them to polling sessions.
//!
//! A get-flow moves through [`DisclosureState`] in order:
//!
//! ```text
//! Requested -> KeySubmitted -> ReEncrypted -> Delivered -> Consumed
//! ```

mod custodian;
mod relying_party;
mod wallet;

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

pub use custodian::Custodian;
pub use relying_party::{token_from_callback, RelyingParty};
pub use wallet::{Field, Wallet, DEFAULT_TAG};

use crate::crypto::{GroupError, PublicKey, ReEncryptionKey};
use crate::delivery::DeliveryError;
use crate::envelope::EnvelopeError;
use crate::recovery::RecoveryError;
use crate::request::RequestError;
use crate::session::SessionError;
use crate::store::StoreError;
use crate::vault::VaultError;

/// Re-encryption keys submitted for a get-flow: tag name to key
pub type TaggedReKey = BTreeMap<String, ReEncryptionKey>;

/// Payload of a registration envelope, signed by the key it registers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub public_key: PublicKey,
}

/// Where a get-flow authorization stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DisclosureState {
    /// The relying party published its request; nothing on any server yet
    Requested,
    /// The user submitted re-encryption keys to the custodian
    KeySubmitted,
    /// The custodian transformed the key ciphertexts and queued delivery
    ReEncrypted,
    /// The bundle reached the relying party's callback
    Delivered,
    /// The relying party decrypted and recorded the fields
    Consumed,
}

impl Display for DisclosureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DisclosureState::Requested => "requested",
            DisclosureState::KeySubmitted => "key-submitted",
            DisclosureState::ReEncrypted => "re-encrypted",
            DisclosureState::Delivered => "delivered",
            DisclosureState::Consumed => "consumed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Signature, nonce or code verification failed
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
    #[error("unknown tag: {0}")]
    UnknownTag(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),
    /// Key recovery or payload integrity failed; never more specific than this
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    /// The delivery queue refused the job
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl<T: Display> From<StoreError<T>> for ProtocolError {
    fn from(e: StoreError<T>) -> Self {
        match e {
            StoreError::Provider(e) => ProtocolError::Storage(e.to_string()),
            StoreError::Conflict(id) => ProtocolError::Conflict(format!("{} is already registered", id)),
            StoreError::UnknownIdentity(id) => ProtocolError::UnknownIdentity(id),
        }
    }
}

impl<T: Display> From<SessionError<T>> for ProtocolError {
    fn from(e: SessionError<T>) -> Self {
        match e {
            SessionError::Provider(e) => ProtocolError::Storage(e.to_string()),
            SessionError::UnknownToken => ProtocolError::NotFound("session token".into()),
        }
    }
}

impl From<EnvelopeError> for ProtocolError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::Unauthorized(reason) => ProtocolError::Unauthorized(reason.to_string()),
            EnvelopeError::Encode(e) => ProtocolError::InvalidRequest(e.to_string()),
        }
    }
}

impl From<GroupError> for ProtocolError {
    fn from(e: GroupError) -> Self {
        match e {
            GroupError::MalformedCiphertext(reason) => ProtocolError::MalformedCiphertext(reason),
            GroupError::InvalidCiphertext => ProtocolError::DecryptionFailed,
            GroupError::MalformedKey(reason) => ProtocolError::InvalidRequest(reason),
            GroupError::Secret(e) => ProtocolError::Internal(e.to_string()),
        }
    }
}

impl From<VaultError> for ProtocolError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::DecryptionFailed => ProtocolError::DecryptionFailed,
            VaultError::Group(e) => e.into(),
            VaultError::Encode(e) => ProtocolError::Internal(e.to_string()),
            VaultError::Default(e) => ProtocolError::Internal(e.to_string()),
        }
    }
}

impl From<RecoveryError> for ProtocolError {
    fn from(e: RecoveryError) -> Self {
        match e {
            RecoveryError::Unauthorized(reason) => ProtocolError::Unauthorized(reason.to_string()),
            RecoveryError::NoBackup(id) => ProtocolError::NotFound(format!("backup for {}", id)),
            RecoveryError::UnknownContact(contact) => {
                ProtocolError::NotFound(format!("contact {}", contact))
            }
            RecoveryError::InvalidBackup(reason) | RecoveryError::InvalidCodes(reason) => {
                ProtocolError::InvalidRequest(reason)
            }
            RecoveryError::UnknownAgent(tag) => {
                ProtocolError::Internal(format!("no recovery agent for tag {}", tag))
            }
            RecoveryError::DecryptionFailed => ProtocolError::DecryptionFailed,
            RecoveryError::Notify(reason) => ProtocolError::Internal(reason),
            RecoveryError::Ledger(reason) => ProtocolError::Storage(reason),
        }
    }
}

impl From<RequestError> for ProtocolError {
    fn from(e: RequestError) -> Self {
        ProtocolError::InvalidRequest(e.to_string())
    }
}
