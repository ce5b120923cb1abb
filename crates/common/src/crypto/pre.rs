//! Single-hop proxy re-encryption over Ristretto255
//!
//! A message is sealed under a key derived from a *capsule*:
//!
//! ```text
//!     r, u random
//!     E = g·r,  V = g·u,  s = u + r·H(E, V)
//!     K = kdf(pk·(r + u))
//!     cb0 = 0x01 || E || V || s
//!     cb1 = nonce || AEAD_K(m, aad = E || V || s)
//! ```
//!
//! The owner of `pk = g·a` recovers `K = kdf((E + V)·a)`.
//!
//! To delegate to `pk_b`, the owner builds a re-encryption key with an
//! ephemeral `x`:
//!
//! ```text
//!     X  = g·x
//!     d  = H(X, pk_b, pk_b·x)
//!     rk = a / d,  U1 = h·rk
//! ```
//!
//! The proxy transforms the capsule to `E1 = E·rk`, `V1 = V·rk` and attaches a
//! Chaum-Pedersen proof that the same `rk` was applied to `E`, `V` and committed
//! in `U1`. It never touches `cb1` and never learns `K`. The recipient computes
//! `d = H(X, g·b, X·b)` and `K = kdf((E1 + V1)·d)`.

use std::fmt;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};

use super::group::{
    decode_point, decode_scalar, encode_point, g, h, hash_to_scalar, kdf, random_scalar,
    GroupError, Reader, POINT_SIZE, SCALAR_SIZE,
};

const CAPSULE_CONTEXT: &str = "predauth 2024-01-01 capsule";
const REKEY_CONTEXT: &str = "predauth 2024-01-01 rekey";
const PROOF_CONTEXT: &str = "predauth 2024-01-01 re-encryption proof";

const LEVEL_FIRST: u8 = 0x01;
const LEVEL_SECOND: u8 = 0x02;

const CAPSULE_SIZE: usize = 2 * POINT_SIZE + SCALAR_SIZE;
const FRAGMENT_SIZE: usize = 7 * POINT_SIZE + SCALAR_SIZE;
const REKEY_SIZE: usize = SCALAR_SIZE + 2 * POINT_SIZE;

/// Secret key of a group keypair
#[derive(Clone, PartialEq, Eq)]
pub struct GroupSecretKey(Scalar);

impl fmt::Debug for GroupSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GroupSecretKey").field(&self.public()).finish()
    }
}

impl GroupSecretKey {
    pub fn generate() -> Self {
        Self(random_scalar())
    }

    pub fn public(&self) -> GroupPublicKey {
        GroupPublicKey(g() * self.0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Parse a secret key, accepting an optional "0x" prefix
    pub fn from_hex(hex: &str) -> Result<Self, GroupError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = hex::decode(hex)
            .map_err(|_| GroupError::MalformedKey("secret key hex decode error".into()))?;
        match decode_scalar(&bytes) {
            Some(scalar) if scalar != Scalar::ZERO => Ok(Self(scalar)),
            _ => Err(GroupError::MalformedKey(
                "secret key is not a canonical non-zero scalar".into(),
            )),
        }
    }
}

/// Public key `g·sk` of a group keypair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPublicKey(RistrettoPoint);

impl GroupPublicKey {
    pub fn to_hex(&self) -> String {
        encode_point(&self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self, GroupError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = hex::decode(hex)
            .map_err(|_| GroupError::MalformedKey("public key hex decode error".into()))?;
        decode_point(&bytes)
            .map(Self)
            .ok_or_else(|| GroupError::MalformedKey("public key is not a valid group element".into()))
    }
}

impl fmt::Display for GroupPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for GroupPublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for GroupPublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        GroupPublicKey::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// A group keypair, one per tag on the user side and one per relying party
#[derive(Debug, Clone)]
pub struct GroupKeypair {
    secret: GroupSecretKey,
    public: GroupPublicKey,
}

impl From<GroupSecretKey> for GroupKeypair {
    fn from(secret: GroupSecretKey) -> Self {
        let public = secret.public();
        Self { secret, public }
    }
}

impl GroupKeypair {
    pub fn generate() -> Self {
        GroupSecretKey::generate().into()
    }

    pub fn secret(&self) -> &GroupSecretKey {
        &self.secret
    }

    pub fn public(&self) -> &GroupPublicKey {
        &self.public
    }
}

/// A ciphertext of a short message (a data key) under a group public key
///
/// `cb0` carries the capsule, `cb1` the sealed message. Both are lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCiphertext {
    pub cb0: String,
    pub cb1: String,
}

/// Delegation from one group key to another, applied by the proxy
///
/// Wire form is `hex(rk || X || U1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReEncryptionKey {
    rk: Scalar,
    x: RistrettoPoint,
    u1: RistrettoPoint,
}

impl ReEncryptionKey {
    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(REKEY_SIZE);
        bytes.extend_from_slice(self.rk.as_bytes());
        bytes.extend_from_slice(self.x.compress().as_bytes());
        bytes.extend_from_slice(self.u1.compress().as_bytes());
        hex::encode(bytes)
    }

    pub fn from_hex(hex: &str) -> Result<Self, GroupError> {
        let bytes = hex::decode(hex)
            .map_err(|_| GroupError::MalformedKey("re-encryption key hex decode error".into()))?;
        if bytes.len() != REKEY_SIZE {
            return Err(GroupError::MalformedKey(format!(
                "invalid re-encryption key size, expected {}, got {}",
                REKEY_SIZE,
                bytes.len()
            )));
        }
        let mut reader = Reader::new(&bytes);
        let malformed = || GroupError::MalformedKey("invalid re-encryption key encoding".into());
        let rk = reader.scalar().filter(|rk| *rk != Scalar::ZERO).ok_or_else(malformed)?;
        let x = reader.point().ok_or_else(malformed)?;
        let u1 = reader.point().ok_or_else(malformed)?;
        Ok(Self { rk, x, u1 })
    }
}

impl Serialize for ReEncryptionKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ReEncryptionKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        ReEncryptionKey::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

#[allow(non_snake_case)]
struct Capsule {
    E: RistrettoPoint,
    V: RistrettoPoint,
    s: Scalar,
}

impl Capsule {
    fn challenge(&self) -> Scalar {
        hash_to_scalar(
            CAPSULE_CONTEXT,
            &[self.E.compress().as_bytes(), self.V.compress().as_bytes()],
        )
    }

    fn check(&self) -> bool {
        g() * self.s == self.V + self.E * self.challenge()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(CAPSULE_SIZE);
        bytes.extend_from_slice(self.E.compress().as_bytes());
        bytes.extend_from_slice(self.V.compress().as_bytes());
        bytes.extend_from_slice(self.s.as_bytes());
        bytes
    }
}

#[allow(non_snake_case)]
struct Fragment {
    E1: RistrettoPoint,
    V1: RistrettoPoint,
    X: RistrettoPoint,
    U1: RistrettoPoint,
    E2: RistrettoPoint,
    V2: RistrettoPoint,
    U2: RistrettoPoint,
    z: Scalar,
}

impl Fragment {
    fn challenge(&self, capsule: &Capsule) -> Scalar {
        hash_to_scalar(
            PROOF_CONTEXT,
            &[
                capsule.E.compress().as_bytes(),
                self.E1.compress().as_bytes(),
                self.E2.compress().as_bytes(),
                capsule.V.compress().as_bytes(),
                self.V1.compress().as_bytes(),
                self.V2.compress().as_bytes(),
                self.U1.compress().as_bytes(),
                self.U2.compress().as_bytes(),
            ],
        )
    }

    fn verify(&self, capsule: &Capsule) -> bool {
        let c = self.challenge(capsule);
        capsule.E * self.z == self.E2 + self.E1 * c
            && capsule.V * self.z == self.V2 + self.V1 * c
            && h() * self.z == self.U2 + self.U1 * c
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FRAGMENT_SIZE);
        for point in [
            &self.E1, &self.V1, &self.X, &self.U1, &self.E2, &self.V2, &self.U2,
        ] {
            bytes.extend_from_slice(point.compress().as_bytes());
        }
        bytes.extend_from_slice(self.z.as_bytes());
        bytes
    }
}

enum Cb0 {
    First(Capsule),
    Second(Capsule, Fragment),
}

impl Cb0 {
    fn capsule(&self) -> &Capsule {
        match self {
            Cb0::First(capsule) | Cb0::Second(capsule, _) => capsule,
        }
    }

    fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(1 + CAPSULE_SIZE + FRAGMENT_SIZE);
        match self {
            Cb0::First(capsule) => {
                bytes.push(LEVEL_FIRST);
                bytes.extend(capsule.to_bytes());
            }
            Cb0::Second(capsule, fragment) => {
                bytes.push(LEVEL_SECOND);
                bytes.extend(capsule.to_bytes());
                bytes.extend(fragment.to_bytes());
            }
        }
        hex::encode(bytes)
    }

    #[allow(non_snake_case)]
    fn decode(cb0: &str) -> Result<Self, GroupError> {
        let bytes = hex::decode(cb0)
            .map_err(|_| GroupError::MalformedCiphertext("cb0 hex decode error".into()))?;
        let (level, body) = bytes
            .split_first()
            .ok_or_else(|| GroupError::MalformedCiphertext("empty cb0".into()))?;
        let expected = match *level {
            LEVEL_FIRST => CAPSULE_SIZE,
            LEVEL_SECOND => CAPSULE_SIZE + FRAGMENT_SIZE,
            other => {
                return Err(GroupError::MalformedCiphertext(format!(
                    "unknown capsule level {}",
                    other
                )))
            }
        };
        if body.len() != expected {
            return Err(GroupError::MalformedCiphertext(format!(
                "invalid cb0 size, expected {}, got {}",
                expected,
                body.len()
            )));
        }

        let malformed = || GroupError::MalformedCiphertext("invalid group element".into());
        let mut reader = Reader::new(body);
        let capsule = Capsule {
            E: reader.point().ok_or_else(malformed)?,
            V: reader.point().ok_or_else(malformed)?,
            s: reader.scalar().ok_or_else(malformed)?,
        };
        if reader.is_empty() {
            return Ok(Cb0::First(capsule));
        }
        let fragment = Fragment {
            E1: reader.point().ok_or_else(malformed)?,
            V1: reader.point().ok_or_else(malformed)?,
            X: reader.point().ok_or_else(malformed)?,
            U1: reader.point().ok_or_else(malformed)?,
            E2: reader.point().ok_or_else(malformed)?,
            V2: reader.point().ok_or_else(malformed)?,
            U2: reader.point().ok_or_else(malformed)?,
            z: reader.scalar().ok_or_else(malformed)?,
        };
        Ok(Cb0::Second(capsule, fragment))
    }
}

fn decode_cb1(cb1: &str) -> Result<Vec<u8>, GroupError> {
    hex::decode(cb1).map_err(|_| GroupError::MalformedCiphertext("cb1 hex decode error".into()))
}

/// Encrypt `m` so that only the holder of the secret key behind `pk` can read it
#[allow(non_snake_case)]
pub fn encrypt(pk: &GroupPublicKey, m: &[u8]) -> Result<GroupCiphertext, GroupError> {
    let r = random_scalar();
    let u = random_scalar();
    let E = g() * r;
    let V = g() * u;
    let mut capsule = Capsule {
        E,
        V,
        s: Scalar::ZERO,
    };
    capsule.s = u + r * capsule.challenge();

    let key = kdf(&(pk.0 * (r + u)));
    let sealed = key.seal(m, &capsule.to_bytes())?;

    Ok(GroupCiphertext {
        cb0: Cb0::First(capsule).encode(),
        cb1: hex::encode(sealed),
    })
}

/// Check that `ct` is a well-formed first-level ciphertext with a valid capsule
///
/// Needs no key and reveals nothing about the message.
pub fn check(ct: &GroupCiphertext) -> Result<(), GroupError> {
    match Cb0::decode(&ct.cb0)? {
        Cb0::First(capsule) if capsule.check() => decode_cb1(&ct.cb1).map(|_| ()),
        _ => Err(GroupError::InvalidCiphertext),
    }
}

/// Derive a re-encryption key from `sk_a` towards `pk_b`
///
/// Randomized by an ephemeral scalar; `sk_b` is never needed.
#[allow(non_snake_case)]
pub fn re_key(sk_a: &GroupSecretKey, pk_b: &GroupPublicKey) -> ReEncryptionKey {
    let x = random_scalar();
    let X = g() * x;
    let d = hash_to_scalar(
        REKEY_CONTEXT,
        &[
            X.compress().as_bytes(),
            pk_b.0.compress().as_bytes(),
            (pk_b.0 * x).compress().as_bytes(),
        ],
    );
    let rk = sk_a.0 * d.invert();
    ReEncryptionKey {
        rk,
        x: X,
        u1: h() * rk,
    }
}

/// Proxy transform: turn a first-level ciphertext into a second-level one
///
/// Needs no secret key. Only `cb0` changes.
#[allow(non_snake_case)]
pub fn re_encrypt(rk: &ReEncryptionKey, ct: &GroupCiphertext) -> Result<GroupCiphertext, GroupError> {
    let capsule = match Cb0::decode(&ct.cb0)? {
        Cb0::First(capsule) => capsule,
        Cb0::Second(..) => return Err(GroupError::InvalidCiphertext),
    };
    decode_cb1(&ct.cb1)?;
    if !capsule.check() {
        return Err(GroupError::InvalidCiphertext);
    }

    let E1 = capsule.E * rk.rk;
    let V1 = capsule.V * rk.rk;
    let t = random_scalar();
    let mut fragment = Fragment {
        E1,
        V1,
        X: rk.x,
        U1: rk.u1,
        E2: capsule.E * t,
        V2: capsule.V * t,
        U2: h() * t,
        z: Scalar::ZERO,
    };
    fragment.z = t + fragment.challenge(&capsule) * rk.rk;

    Ok(GroupCiphertext {
        cb0: Cb0::Second(capsule, fragment).encode(),
        cb1: ct.cb1.clone(),
    })
}

/// Decrypt a first- or second-level ciphertext
pub fn decrypt(sk: &GroupSecretKey, ct: &GroupCiphertext) -> Result<Vec<u8>, GroupError> {
    let cb0 = Cb0::decode(&ct.cb0)?;
    let sealed = decode_cb1(&ct.cb1)?;
    let capsule = cb0.capsule();
    if !capsule.check() {
        return Err(GroupError::InvalidCiphertext);
    }

    let shared = match &cb0 {
        Cb0::First(capsule) => (capsule.E + capsule.V) * sk.0,
        Cb0::Second(capsule, fragment) => {
            if !fragment.verify(capsule) {
                return Err(GroupError::InvalidCiphertext);
            }
            let d = hash_to_scalar(
                REKEY_CONTEXT,
                &[
                    fragment.X.compress().as_bytes(),
                    sk.public().0.compress().as_bytes(),
                    (fragment.X * sk.0).compress().as_bytes(),
                ],
            );
            (fragment.E1 + fragment.V1) * d
        }
    };

    kdf(&shared)
        .open(&sealed, &capsule.to_bytes())
        .map_err(|_| GroupError::InvalidCiphertext)
}
