use std::collections::BTreeMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crypto::{pre, GroupCiphertext, GroupError, GroupPublicKey, GroupSecretKey, Secret};

/// Size of the AES-GCM initialization vector in bytes
pub const IV_SIZE: usize = 12;

/// Plaintext fields of one tag, ordered so the serialised form is canonical
pub type FieldMap = BTreeMap<String, String>;

/// The custodian's copy of a user's data: tag name to ciphertext unit
pub type EncryptedVault = BTreeMap<String, TaggedEncrypted>;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Key recovery or the payload integrity check failed. Deliberately
    /// carries no detail.
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("group error: {0}")]
    Group(#[from] GroupError),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("vault error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Persisted ciphertext unit for one tag
///
/// - `data`: base64 AES-256-GCM ciphertext of the JSON field map
/// - `key`: the data key, encrypted under the tag's group public key
/// - `iv`: hex AES-GCM nonce
///
/// The three parts are only ever written together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedEncrypted {
    pub data: String,
    pub key: GroupCiphertext,
    pub iv: String,
}

/// Encrypt a tag's fields under its group public key
///
/// Returns the ciphertext unit and the fresh data key, which the owner keeps.
pub fn encrypt(
    pk: &GroupPublicKey,
    fields: &FieldMap,
) -> Result<(TaggedEncrypted, Secret), VaultError> {
    let data_key = Secret::generate();
    let mut iv = [0u8; IV_SIZE];
    getrandom::getrandom(&mut iv).map_err(|e| anyhow::anyhow!("failed to generate iv: {}", e))?;

    let plaintext = serde_json::to_vec(fields)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(data_key.bytes()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_ref())
        .map_err(|_| anyhow::anyhow!("encrypt error"))?;

    let key = pre::encrypt(pk, data_key.bytes())?;

    Ok((
        TaggedEncrypted {
            data: BASE64.encode(ciphertext),
            key,
            iv: hex::encode(iv),
        },
        data_key,
    ))
}

/// Recover a tag's fields with the secret key its `key` ciphertext targets
///
/// Works on first-level (owner) and re-encrypted (recipient) units alike.
pub fn decrypt(sk: &GroupSecretKey, sealed: &TaggedEncrypted) -> Result<FieldMap, VaultError> {
    let data_key = pre::decrypt(sk, &sealed.key).map_err(|_| VaultError::DecryptionFailed)?;
    let data_key = Secret::from_slice(&data_key).map_err(|_| VaultError::DecryptionFailed)?;
    open(&data_key, sealed)
}

/// Recover a tag's fields with the data key directly
pub fn open(data_key: &Secret, sealed: &TaggedEncrypted) -> Result<FieldMap, VaultError> {
    let iv = hex::decode(&sealed.iv).map_err(|_| VaultError::DecryptionFailed)?;
    if iv.len() != IV_SIZE {
        return Err(VaultError::DecryptionFailed);
    }
    let ciphertext = BASE64
        .decode(&sealed.data)
        .map_err(|_| VaultError::DecryptionFailed)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(data_key.bytes()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
        .map_err(|_| VaultError::DecryptionFailed)?;

    serde_json::from_slice(&plaintext).map_err(|_| VaultError::DecryptionFailed)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::GroupKeypair;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let tag = GroupKeypair::generate();
        let plain = fields(&[("city", "Beijing"), ("zip", "100000")]);

        let (sealed, data_key) = encrypt(tag.public(), &plain).unwrap();
        assert_eq!(hex::decode(&sealed.iv).unwrap().len(), IV_SIZE);

        assert_eq!(decrypt(tag.secret(), &sealed).unwrap(), plain);
        assert_eq!(open(&data_key, &sealed).unwrap(), plain);
    }

    #[test]
    fn test_decrypt_after_re_encryption() {
        let tag = GroupKeypair::generate();
        let app = GroupKeypair::generate();
        let plain = fields(&[("name", "Alice")]);

        let (sealed, _) = encrypt(tag.public(), &plain).unwrap();
        let rk = pre::re_key(tag.secret(), app.public());
        let transformed = TaggedEncrypted {
            key: pre::re_encrypt(&rk, &sealed.key).unwrap(),
            ..sealed.clone()
        };

        assert_eq!(decrypt(app.secret(), &transformed).unwrap(), plain);
        assert_eq!(transformed.data, sealed.data);
        assert_eq!(transformed.iv, sealed.iv);
    }

    #[test]
    fn test_failures_collapse_to_decryption_failed() {
        let tag = GroupKeypair::generate();
        let (sealed, _) = encrypt(tag.public(), &fields(&[("a", "b")])).unwrap();

        let wrong_key = GroupKeypair::generate();
        assert!(matches!(
            decrypt(wrong_key.secret(), &sealed),
            Err(VaultError::DecryptionFailed)
        ));

        let mut bytes = BASE64.decode(&sealed.data).unwrap();
        bytes[0] ^= 0x01;
        let tampered = TaggedEncrypted {
            data: BASE64.encode(bytes),
            ..sealed.clone()
        };
        assert!(matches!(
            decrypt(tag.secret(), &tampered),
            Err(VaultError::DecryptionFailed)
        ));

        let bad_iv = TaggedEncrypted {
            iv: "00".into(),
            ..sealed.clone()
        };
        assert!(matches!(
            decrypt(tag.secret(), &bad_iv),
            Err(VaultError::DecryptionFailed)
        ));

        // a key ciphertext from another write must not open this payload
        let (other, _) = encrypt(tag.public(), &fields(&[("a", "b")])).unwrap();
        let mixed = TaggedEncrypted {
            key: other.key,
            ..sealed
        };
        assert!(matches!(
            decrypt(tag.secret(), &mixed),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wire_shape() {
        let tag = GroupKeypair::generate();
        let (sealed, _) = encrypt(tag.public(), &FieldMap::new()).unwrap();

        let value = serde_json::to_value(&sealed).unwrap();
        assert!(value["data"].is_string());
        assert!(value["key"]["cb0"].is_string());
        assert!(value["key"]["cb1"].is_string());
        assert!(value["iv"].is_string());

        let back: TaggedEncrypted = serde_json::from_value(value).unwrap();
        assert_eq!(back, sealed);
    }
}
