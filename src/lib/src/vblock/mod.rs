//! Keyblock and preamble codec.
//!
//! A trust chain area holds a [`Keyblock`] immediately followed by a
//! [`Preamble`]. The keyblock carries the data key and is signed by the
//! root (or firmware) key; the preamble carries the body signature and is
//! signed by the data key. Both records share the [`PackedPublicKey`] and
//! [`Signature`] encodings defined here.
//!
//! All integers are little-endian. Parsing only accepts canonical
//! encodings: re-serializing a parsed record yields the exact input bytes,
//! which is what the signatures cover.

pub mod wire;

mod chain;
mod keyblock;
mod preamble;

pub use chain::*;
pub use keyblock::*;
pub use preamble::*;

use crate::crypto::{Algorithm, TrustPrimitives};
use crate::error::*;
use crate::payload::MetadataHash;
use wire::Reader;

/// Largest data key version: it is the high half of a 32-bit rollback
/// version.
pub const MAX_KEY_VERSION: u32 = 0xFFFF;

/// A public key as embedded in keyblocks, preambles and key blob files.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PackedPublicKey {
    pub algorithm: u32,
    pub key_version: u32,
    pub key_data: Vec<u8>,
}

impl PackedPublicKey {
    /// algorithm + key_version + key_size
    pub const HEADER_SIZE: usize = 12;

    pub fn byte_len(&self) -> usize {
        Self::HEADER_SIZE + self.key_data.len()
    }

    pub fn algorithm(&self) -> Algorithm {
        Algorithm::from_raw(self.algorithm)
    }

    pub(crate) fn read(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let algorithm = wire::get32(reader)?;
        let key_version = wire::get32(reader)?;
        let key_size = wire::get32(reader)? as usize;
        let key_data = wire::get_bytes(reader, key_size)?;
        Ok(Self {
            algorithm,
            key_version,
            key_data,
        })
    }

    pub(crate) fn write(&self, writer: &mut Vec<u8>) -> Result<(), CodecError> {
        wire::put32(writer, self.algorithm)?;
        wire::put32(writer, self.key_version)?;
        wire::put_len(writer, self.key_data.len())?;
        writer.extend_from_slice(&self.key_data);
        Ok(())
    }

    /// Parse a packed key from the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::read(&mut Reader::new(bytes))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        // Writing into a Vec only fails for keys larger than 4GiB.
        if self.write(&mut out).is_err() {
            out.clear();
        }
        out
    }
}

/// What the signature blob of a [`Signature`] holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SignatureKind {
    /// A signature over the first `data_size` bytes of the covered data.
    Classical,
    /// A digest of integrity metadata carried by the body itself. It is
    /// trusted because the record holding it is signed.
    Digest,
}

impl SignatureKind {
    fn from_raw(v: u8) -> Result<Self, CodecError> {
        match v {
            0 => Ok(Self::Classical),
            1 => Ok(Self::Digest),
            _ => Err(CodecError::NonCanonical("signature kind")),
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Self::Classical => 0,
            Self::Digest => 1,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Signature {
    pub kind: SignatureKind,
    pub algorithm: u32,
    pub data_size: u32,
    pub sig_data: Vec<u8>,
}

impl Signature {
    /// kind + algorithm + data_size + sig_size
    pub const HEADER_SIZE: usize = 13;

    pub fn classical(algorithm: Algorithm, data_size: u32, sig_data: Vec<u8>) -> Self {
        Self {
            kind: SignatureKind::Classical,
            algorithm: algorithm.to_raw(),
            data_size,
            sig_data,
        }
    }

    /// Wrap a metadata digest covering a body of `data_size` bytes.
    pub fn from_metadata_hash(hash: &MetadataHash, data_size: u32) -> Self {
        Self {
            kind: SignatureKind::Digest,
            algorithm: hash.algorithm.to_raw(),
            data_size,
            sig_data: hash.digest.clone(),
        }
    }

    pub fn byte_len(&self) -> usize {
        Self::HEADER_SIZE + self.sig_data.len()
    }

    pub fn algorithm(&self) -> Algorithm {
        Algorithm::from_raw(self.algorithm)
    }

    pub(crate) fn read(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let kind = SignatureKind::from_raw(wire::get8(reader)?)?;
        let algorithm = wire::get32(reader)?;
        let data_size = wire::get32(reader)?;
        let sig_size = wire::get32(reader)? as usize;
        let sig_data = wire::get_bytes(reader, sig_size)?;
        Ok(Self {
            kind,
            algorithm,
            data_size,
            sig_data,
        })
    }

    pub(crate) fn write(&self, writer: &mut Vec<u8>) -> Result<(), CodecError> {
        wire::put8(writer, self.kind.to_raw())?;
        wire::put32(writer, self.algorithm)?;
        wire::put32(writer, self.data_size)?;
        wire::put_len(writer, self.sig_data.len())?;
        writer.extend_from_slice(&self.sig_data);
        Ok(())
    }

    /// Parse a signature from the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::read(&mut Reader::new(bytes))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(self.byte_len());
        self.write(&mut out)?;
        Ok(out)
    }

    /// Check a classical signature over `data` with `key`.
    ///
    /// The signature must cover exactly `data.len()` bytes.
    pub fn verify_data(
        &self,
        key: &PackedPublicKey,
        data: &[u8],
        primitives: &dyn TrustPrimitives,
    ) -> Result<(), TrustError> {
        if self.kind != SignatureKind::Classical || self.data_size as usize != data.len() {
            return Err(TrustError::InvalidSignature);
        }
        if self.algorithm != key.algorithm {
            return Err(TrustError::AlgorithmMismatch {
                key: key.algorithm,
                signature: self.algorithm,
            });
        }
        primitives.verify(key, data, &self.sig_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SigningKey, SoftwarePrimitives};

    #[test]
    fn test_packed_key_roundtrip() {
        let key = PackedPublicKey {
            algorithm: 1,
            key_version: 7,
            key_data: vec![9; 32],
        };
        let bytes = key.to_bytes();
        assert_eq!(bytes.len(), key.byte_len());
        assert_eq!(&bytes[..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[7, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[32, 0, 0, 0]);
        assert_eq!(PackedPublicKey::parse(&bytes).unwrap(), key);
    }

    #[test]
    fn test_packed_key_oversized_length() {
        let mut bytes = Vec::new();
        wire::put32(&mut bytes, 1).unwrap();
        wire::put32(&mut bytes, 1).unwrap();
        wire::put32(&mut bytes, 0x7FFF_FFFF).unwrap();
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            PackedPublicKey::parse(&bytes),
            Err(CodecError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_signature_kind_must_be_canonical() {
        let sig = Signature::classical(Algorithm::Ed25519, 4, vec![1, 2, 3]);
        let mut bytes = Vec::new();
        sig.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), sig.byte_len());
        assert_eq!(Signature::read(&mut Reader::new(&bytes)).unwrap(), sig);

        bytes[0] = 2;
        assert!(matches!(
            Signature::read(&mut Reader::new(&bytes)),
            Err(CodecError::NonCanonical("signature kind"))
        ));
    }

    #[test]
    fn test_verify_data_checks_covered_size() {
        let kp = KeyPair::generate(1);
        let data = b"0123456789";
        let sig = Signature::classical(
            Algorithm::Ed25519,
            data.len() as u32,
            kp.sk.sign(data).unwrap(),
        );
        let key = kp.pk.to_packed();
        assert!(sig.verify_data(&key, data, &SoftwarePrimitives).is_ok());
        assert!(
            sig.verify_data(&key, &data[..9], &SoftwarePrimitives)
                .is_err()
        );

        let mut digest_sig = sig.clone();
        digest_sig.kind = SignatureKind::Digest;
        assert!(
            digest_sig
                .verify_data(&key, data, &SoftwarePrimitives)
                .is_err()
        );
    }

    #[test]
    fn test_verify_data_algorithm_mismatch() {
        let kp = KeyPair::generate(1);
        let sig = Signature::classical(Algorithm::Sha256, 1, kp.sk.sign(b"x").unwrap());
        let result = sig.verify_data(&kp.pk.to_packed(), b"x", &SoftwarePrimitives);
        assert!(matches!(result, Err(TrustError::AlgorithmMismatch { .. })));
    }
}
