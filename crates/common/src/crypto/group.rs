//! Ristretto255 group helpers shared by the proxy re-encryption scheme
//!
//! Everything that turns bytes into group elements lives here, so that there is
//! exactly one place where encodings are validated before any arithmetic runs.

use std::sync::OnceLock;

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use serde::{Deserialize, Serialize};

use super::secret::Secret;

/// Size of a compressed Ristretto point in bytes
pub const POINT_SIZE: usize = 32;
/// Size of a canonical scalar encoding in bytes
pub const SCALAR_SIZE: usize = 32;

const H_GENERATOR_CONTEXT: &str = "predauth 2024-01-01 generator h";
const KDF_CONTEXT: &str = "predauth 2024-01-01 capsule key";

static H: OnceLock<RistrettoPoint> = OnceLock::new();

/// Errors raised by the group algebra
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    /// Bad hex, wrong length, unknown capsule level, non-canonical
    /// encoding or the identity point. Raised before any arithmetic.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),
    /// The ciphertext decodes but fails an integrity check: the capsule
    /// check, the re-encryption proof or the AEAD tag.
    #[error("invalid ciphertext")]
    InvalidCiphertext,
    #[error("malformed key: {0}")]
    MalformedKey(String),
    #[error("secret error: {0}")]
    Secret(#[from] super::secret::SecretError),
}

/// The fixed generator `g`, the Ristretto basepoint
pub fn g() -> RistrettoPoint {
    RISTRETTO_BASEPOINT_POINT
}

/// The second generator `h`
///
/// Hashed onto the curve from a fixed string, so nobody knows `log_g(h)`.
pub fn h() -> RistrettoPoint {
    *H.get_or_init(|| {
        let mut wide = [0u8; 64];
        blake3::Hasher::new_derive_key(H_GENERATOR_CONTEXT)
            .finalize_xof()
            .fill(&mut wide);
        RistrettoPoint::from_uniform_bytes(&wide)
    })
}

/// Public generators, hex encoded compressed points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generators {
    pub g: String,
    pub h: String,
}

impl Generators {
    /// The generators this build uses
    pub fn current() -> Self {
        Self {
            g: encode_point(&g()),
            h: encode_point(&h()),
        }
    }

    /// Check that a peer agrees on both generators
    pub fn matches(&self, other: &Generators) -> bool {
        self.g.eq_ignore_ascii_case(&other.g) && self.h.eq_ignore_ascii_case(&other.h)
    }
}

/// Hash a list of byte strings into a scalar under a domain context
pub(crate) fn hash_to_scalar(context: &str, inputs: &[&[u8]]) -> Scalar {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for input in inputs {
        // length prefix keeps concatenations unambiguous
        hasher.update(&(input.len() as u64).to_be_bytes());
        hasher.update(input);
    }
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Derive a symmetric key from a shared group element
pub(crate) fn kdf(point: &RistrettoPoint) -> Secret {
    Secret::from(blake3::derive_key(
        KDF_CONTEXT,
        point.compress().as_bytes(),
    ))
}

/// Uniformly random non-zero scalar
pub(crate) fn random_scalar() -> Scalar {
    loop {
        let mut wide = [0u8; 64];
        getrandom::getrandom(&mut wide).expect("failed to generate random bytes");
        let scalar = Scalar::from_bytes_mod_order_wide(&wide);
        if scalar != Scalar::ZERO {
            return scalar;
        }
    }
}

pub(crate) fn encode_point(point: &RistrettoPoint) -> String {
    hex::encode(point.compress().as_bytes())
}

/// Decode a compressed point, rejecting non-canonical encodings and the identity
pub(crate) fn decode_point(bytes: &[u8]) -> Option<RistrettoPoint> {
    let compressed = CompressedRistretto::from_slice(bytes).ok()?;
    let point = compressed.decompress()?;
    if point.is_identity() {
        return None;
    }
    Some(point)
}

/// Decode a canonical scalar encoding
pub(crate) fn decode_scalar(bytes: &[u8]) -> Option<Scalar> {
    let bytes: [u8; SCALAR_SIZE] = bytes.try_into().ok()?;
    Option::from(Scalar::from_canonical_bytes(bytes))
}

/// Sequential reader over a fixed-layout byte string
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.bytes.len() < n {
            return None;
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Some(head)
    }

    pub(crate) fn point(&mut self) -> Option<RistrettoPoint> {
        decode_point(self.take(POINT_SIZE)?)
    }

    pub(crate) fn scalar(&mut self) -> Option<Scalar> {
        decode_scalar(self.take(SCALAR_SIZE)?)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_generators_are_distinct_and_stable() {
        let generators = Generators::current();
        assert_ne!(generators.g, generators.h);
        assert_eq!(generators, Generators::current());
        assert_eq!(generators.g.len(), POINT_SIZE * 2);

        let upper = Generators {
            g: generators.g.to_uppercase(),
            h: generators.h.to_uppercase(),
        };
        assert!(generators.matches(&upper));
    }

    #[test]
    fn test_decode_point_rejects_identity_and_garbage() {
        let identity = RistrettoPoint::default().compress();
        assert!(decode_point(identity.as_bytes()).is_none());
        assert!(decode_point(&[0xFF; POINT_SIZE]).is_none());
        assert!(decode_point(&[1u8; 7]).is_none());

        let point = g() * random_scalar();
        assert_eq!(decode_point(point.compress().as_bytes()), Some(point));
    }

    #[test]
    fn test_decode_scalar_requires_canonical() {
        assert!(decode_scalar(&[0xFF; SCALAR_SIZE]).is_none());
        let scalar = random_scalar();
        assert_eq!(decode_scalar(scalar.as_bytes()), Some(scalar));
    }

    #[test]
    fn test_hash_to_scalar_is_unambiguous() {
        let a = hash_to_scalar("ctx", &[b"ab", b"c"]);
        let b = hash_to_scalar("ctx", &[b"a", b"bc"]);
        let c = hash_to_scalar("other", &[b"ab", b"c"]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, hash_to_scalar("ctx", &[b"ab", b"c"]));
    }
}
