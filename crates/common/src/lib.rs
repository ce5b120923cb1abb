/**
 * Cryptographic types and operations.
 *  - Identity keys (Ed25519) for signing requests
 *  - Group keys, ciphertexts and re-encryption
 *    keys for the proxy transform
 */
pub mod crypto;
/**
 * Callback delivery queue: the custodian hands
 *  re-encrypted bundles to a background worker
 *  that posts them with bounded retry.
 */
pub mod delivery;
/**
 * Signed `{nonce, signature, payload}` envelopes
 *  and the replay guard that checks them.
 */
pub mod envelope;
/**
 * The three protocol roles: wallet, custodian
 *  and relying party.
 */
pub mod protocol;
/**
 * Custodian-independent recovery through
 *  re-encryption keys addressed to recovery agents.
 */
pub mod recovery;
/**
 * Authorization requests a relying party
 *  presents to the user.
 */
pub mod request;
/**
 * Relying-party sessions: secret poll keys, the
 *  callback tokens derived from them and the
 *  fields delivered under those tokens.
 */
pub mod session;
/**
 * Custodian storage of identities and
 *  per-tag ciphertexts.
 */
pub mod store;
/**
 * Hybrid encryption of a tag's fields: AES-GCM
 *  for the payload, group encryption for the key.
 */
pub mod vault;

pub mod prelude {
    pub use crate::crypto::{
        GroupCiphertext, GroupKeypair, GroupPublicKey, PublicKey, ReEncryptionKey, SecretKey,
    };
    pub use crate::envelope::{Envelope, ReplayGuard};
    pub use crate::protocol::{Custodian, ProtocolError, RelyingParty, Wallet};
    pub use crate::request::{AppInfo, AuthorizationRequest};
    pub use crate::vault::{EncryptedVault, FieldMap, TaggedEncrypted};
}
