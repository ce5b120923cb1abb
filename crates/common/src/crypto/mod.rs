//! Cryptographic primitives for PreDAuth
//!
//! - **Identity & Authentication**: Ed25519 keypairs (`SecretKey`/`PublicKey`) sign
//!   the nonce of every mutating request. They never protect data.
//! - **Symmetric keys**: `Secret`, a 256-bit key used both as a per-tag data key and
//!   as the capsule key inside a group ciphertext.
//! - **Proxy re-encryption**: a single-hop scheme over Ristretto255. Each tag owns a
//!   `GroupKeypair`; its data key is encrypted under the tag public key, and a
//!   `ReEncryptionKey` lets a proxy hand that ciphertext to another public key
//!   without learning anything.
//!
//! # Disclosure at a glance
//!
//! 1. The user encrypts a tag's data key: `pre::encrypt(pk_tag, data_key)`
//! 2. A relying party publishes `pk_app`
//! 3. The user derives `pre::re_key(sk_tag, pk_app)` and hands it to the custodian
//! 4. The custodian runs `pre::re_encrypt(rk, ct)`, holding no secret key at all
//! 5. The relying party runs `pre::decrypt(sk_app, ct')` and gets the data key back

mod group;
mod keys;
pub mod pre;
mod secret;

pub use ed25519_dalek::Signature;
pub use group::{Generators, GroupError};
pub use keys::{KeyError, PublicKey, SecretKey, SIGNATURE_SIZE};
pub use pre::{GroupCiphertext, GroupKeypair, GroupPublicKey, GroupSecretKey, ReEncryptionKey};
pub use secret::{Secret, SecretError, BLAKE3_HASH_SIZE, SECRET_SIZE};
