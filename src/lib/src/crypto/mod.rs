//! Trust primitives.
//!
//! The codec, verifier and signer never touch a concrete signature scheme:
//! they call into [`TrustPrimitives`] to compute digests, validate packed
//! keys and check signatures, and into [`SigningKey`] to create signatures.
//! [`SoftwarePrimitives`] and [`PrivateKey`] are the in-process Ed25519 /
//! SHA-256 providers used by default.

mod hash;
mod keys;

pub use hash::{SHA256_DIGEST_SIZE, sha256};
pub use keys::*;

use crate::error::TrustError;
use crate::vblock::PackedPublicKey;
use std::fmt;

pub const ALG_ED25519: u32 = 1;
pub const ALG_SHA256: u32 = 2;

pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Algorithm identifiers stored in packed keys and signatures.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Algorithm {
    Ed25519,
    Sha256,
    Unknown(u32),
}

impl Algorithm {
    pub fn from_raw(value: u32) -> Self {
        match value {
            ALG_ED25519 => Self::Ed25519,
            ALG_SHA256 => Self::Sha256,
            v => Self::Unknown(v),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Ed25519 => ALG_ED25519,
            Self::Sha256 => ALG_SHA256,
            Self::Unknown(v) => v,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ed25519 => write!(f, "ed25519"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Unknown(v) => write!(f, "unknown#{v}"),
        }
    }
}

/// Digest, key validation and signature verification capability.
pub trait TrustPrimitives {
    /// Compute a digest of `data`.
    fn digest(&self, algorithm: Algorithm, data: &[u8]) -> Result<Vec<u8>, TrustError>;

    /// Check that a packed key can be unpacked into a usable verification key.
    fn check_key(&self, key: &PackedPublicKey) -> Result<(), TrustError>;

    /// Verify `signature` over `data` with `key`.
    fn verify(
        &self,
        key: &PackedPublicKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), TrustError>;
}

/// Signature creation capability.
///
/// Implementations may keep the private half anywhere, as long as the
/// signature size is known before signing: it is part of the signed headers.
pub trait SigningKey {
    fn algorithm(&self) -> Algorithm;

    fn signature_size(&self) -> usize;

    /// Raw public key material matching this signing key.
    fn public_key_data(&self) -> Vec<u8>;

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, TrustError>;
}

/// Software Ed25519 / SHA-256 primitives.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwarePrimitives;

impl SoftwarePrimitives {
    fn unpack(key: &PackedPublicKey) -> Result<ed25519_compact::PublicKey, TrustError> {
        match Algorithm::from_raw(key.algorithm) {
            Algorithm::Ed25519 => {}
            _ => return Err(TrustError::UnsupportedAlgorithm(key.algorithm)),
        }
        if key.key_data.len() != ED25519_PUBLIC_KEY_SIZE {
            return Err(TrustError::MalformedKey(format!(
                "expected {} bytes of key material, found {}",
                ED25519_PUBLIC_KEY_SIZE,
                key.key_data.len()
            )));
        }
        ed25519_compact::PublicKey::from_slice(&key.key_data)
            .map_err(|e| TrustError::MalformedKey(e.to_string()))
    }
}

impl TrustPrimitives for SoftwarePrimitives {
    fn digest(&self, algorithm: Algorithm, data: &[u8]) -> Result<Vec<u8>, TrustError> {
        match algorithm {
            Algorithm::Sha256 => Ok(sha256(data).to_vec()),
            other => Err(TrustError::UnsupportedAlgorithm(other.to_raw())),
        }
    }

    fn check_key(&self, key: &PackedPublicKey) -> Result<(), TrustError> {
        Self::unpack(key).map(|_| ())
    }

    fn verify(
        &self,
        key: &PackedPublicKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), TrustError> {
        let pk = Self::unpack(key)?;
        let signature = ed25519_compact::Signature::from_slice(signature)
            .map_err(|_| TrustError::InvalidSignature)?;
        pk.verify(data, &signature)
            .map_err(|_| TrustError::InvalidSignature)
    }
}
