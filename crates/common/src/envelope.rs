//! Signed request envelopes
//!
//! Every mutating call to the custodian is wrapped in an [`Envelope`]:
//!
//! ```text
//! nonce     = hex(timestamp_ms: u64be || random: 16 bytes || blake3(json(payload)))
//! signature = hex(ed25519_sign(identity_sk, nonce_bytes))
//! ```
//!
//! Verification happens in [`Envelope::open`]:
//! 1. the signature must verify (strictly) under the registered key
//! 2. the digest in the nonce must match the received payload
//! 3. the timestamp must be within the replay window of the local clock
//! 4. the nonce must not have been seen for this identity within the window
//!
//! Any failure is `Unauthorized`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, SecretKey, Signature, BLAKE3_HASH_SIZE, SIGNATURE_SIZE};

const TIMESTAMP_SIZE: usize = 8;
const RANDOM_SIZE: usize = 16;
/// Size of a decoded nonce in bytes
pub const NONCE_SIZE: usize = TIMESTAMP_SIZE + RANDOM_SIZE + BLAKE3_HASH_SIZE;

/// Default accepted clock skew in either direction
pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// `{nonce, signature, payload}` wrapper carried by mutating requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub nonce: String,
    pub signature: String,
    pub payload: T,
}

fn digest<T: Serialize>(payload: &T) -> Result<blake3::Hash, EnvelopeError> {
    Ok(blake3::hash(&serde_json::to_vec(payload)?))
}

impl<T: Serialize> Envelope<T> {
    /// Sign `payload` with the identity key, stamped with the current time
    pub fn seal(secret: &SecretKey, payload: T) -> Result<Self, EnvelopeError> {
        Self::seal_at(secret, payload, Utc::now().timestamp_millis())
    }

    /// Sign `payload` with an explicit millisecond timestamp
    pub fn seal_at(secret: &SecretKey, payload: T, timestamp_ms: i64) -> Result<Self, EnvelopeError> {
        let mut random = [0u8; RANDOM_SIZE];
        getrandom::getrandom(&mut random).expect("failed to generate random bytes");

        let mut nonce = Vec::with_capacity(NONCE_SIZE);
        nonce.extend_from_slice(&(timestamp_ms.max(0) as u64).to_be_bytes());
        nonce.extend_from_slice(&random);
        nonce.extend_from_slice(digest(&payload)?.as_bytes());

        let signature = secret.sign(&nonce);
        Ok(Self {
            nonce: hex::encode(&nonce),
            signature: hex::encode(signature.to_bytes()),
            payload,
        })
    }

    /// Verify the envelope for `id` and hand back the payload
    pub fn open(self, key: &PublicKey, guard: &ReplayGuard, id: &str) -> Result<T, EnvelopeError> {
        let mut nonce = [0u8; NONCE_SIZE];
        hex::decode_to_slice(&self.nonce, &mut nonce)
            .map_err(|_| EnvelopeError::Unauthorized("malformed nonce"))?;
        let mut signature = [0u8; SIGNATURE_SIZE];
        hex::decode_to_slice(&self.signature, &mut signature)
            .map_err(|_| EnvelopeError::Unauthorized("malformed signature"))?;

        key.verify(&nonce, &Signature::from_bytes(&signature))
            .map_err(|_| EnvelopeError::Unauthorized("bad signature"))?;

        let expected = &nonce[TIMESTAMP_SIZE + RANDOM_SIZE..];
        if expected != digest(&self.payload)?.as_bytes() {
            return Err(EnvelopeError::Unauthorized("payload does not match nonce"));
        }

        let mut timestamp = [0u8; TIMESTAMP_SIZE];
        timestamp.copy_from_slice(&nonce[..TIMESTAMP_SIZE]);
        let timestamp_ms = u64::from_be_bytes(timestamp).min(i64::MAX as u64) as i64;
        guard.check(id, &self.nonce.to_lowercase(), timestamp_ms)?;

        Ok(self.payload)
    }
}

/// Per-identity single-use nonce ledger bounded by a time window
#[derive(Debug)]
pub struct ReplayGuard {
    window_ms: i64,
    seen: Mutex<HashMap<String, HashMap<String, i64>>>,
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_WINDOW)
    }
}

impl ReplayGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis().min(i64::MAX as u128) as i64,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Accept `nonce` for `id` once, if its timestamp is fresh
    pub fn check(&self, id: &str, nonce: &str, timestamp_ms: i64) -> Result<(), EnvelopeError> {
        let now = Utc::now().timestamp_millis();
        if (now - timestamp_ms).abs() > self.window_ms {
            return Err(EnvelopeError::Unauthorized("nonce outside replay window"));
        }

        let mut seen = self.seen.lock();
        // anything older than the window is rejected by the timestamp check above
        seen.retain(|_, nonces| {
            nonces.retain(|_, ts| now - *ts <= self.window_ms);
            !nonces.is_empty()
        });
        let nonces = seen.entry(id.to_string()).or_default();
        if nonces.contains_key(nonce) {
            return Err(EnvelopeError::Unauthorized("nonce already used"));
        }
        nonces.insert(nonce.to_string(), timestamp_ms);
        Ok(())
    }

    /// Number of nonces currently remembered for `id`
    pub fn tracked(&self, id: &str) -> usize {
        self.seen.lock().get(id).map(HashMap::len).unwrap_or(0)
    }

    /// Number of identities with a nonce still inside the window
    pub fn tracked_ids(&self) -> usize {
        self.seen.lock().len()
    }
}
