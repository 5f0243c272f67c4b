use super::keyblock::to_u32;
use super::wire::{self, Reader};
use super::{MAX_KEY_VERSION, PackedPublicKey, Signature};
use crate::crypto::{SigningKey, TrustPrimitives};
use crate::error::*;

pub const PREAMBLE_HEADER_VERSION: u32 = 1;

/// preamble_size + header_version + version + reserved + flags
pub const PREAMBLE_HEADER_SIZE: usize = 16;

/// Smallest encoding: empty body signature, no subkey, empty signature.
pub const MIN_PREAMBLE_SIZE: usize =
    PREAMBLE_HEADER_SIZE + Signature::HEADER_SIZE + 1 + Signature::HEADER_SIZE;

/// Preamble: body signature and version information signed by the data key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Preamble {
    pub preamble_size: u32,
    pub header_version: u32,
    pub version: u16,
    pub flags: u32,
    pub body_signature: Signature,
    /// Kernel subkey carried by firmware preambles.
    pub subkey: Option<PackedPublicKey>,
    pub signature: Signature,
}

impl Preamble {
    /// Build a preamble and sign it with the data key.
    pub fn create(
        version: u16,
        flags: u32,
        body_signature: Signature,
        subkey: Option<PackedPublicKey>,
        signer: &dyn SigningKey,
    ) -> Result<Self, VbError> {
        let signed_len = PREAMBLE_HEADER_SIZE
            + body_signature.byte_len()
            + 1
            + subkey.as_ref().map_or(0, PackedPublicKey::byte_len);
        let sig_size = signer.signature_size();
        let preamble_size = signed_len + Signature::HEADER_SIZE + sig_size;

        let mut preamble = Preamble {
            preamble_size: to_u32(preamble_size)?,
            header_version: PREAMBLE_HEADER_VERSION,
            version,
            flags,
            body_signature,
            subkey,
            signature: Signature::classical(signer.algorithm(), to_u32(signed_len)?, vec![]),
        };

        let signed = preamble.signed_bytes()?;
        let sig_data = signer.sign(&signed)?;
        if sig_data.len() != sig_size {
            return Err(TrustError::SigningFailed(format!(
                "expected a {} byte signature, got {}",
                sig_size,
                sig_data.len()
            ))
            .into());
        }
        preamble.signature = Signature::classical(signer.algorithm(), to_u32(signed_len)?, sig_data);
        Ok(preamble)
    }

    /// Parse the preamble found at offset `after` of a trust chain area.
    pub fn parse(area: &[u8], after: usize) -> Result<Self, CodecError> {
        let needed = after
            .checked_add(MIN_PREAMBLE_SIZE)
            .ok_or(CodecError::Truncated)?;
        if needed > area.len() {
            return Err(CodecError::OutOfBounds {
                needed,
                available: area.len(),
            });
        }
        let area = &area[after..];
        let mut reader = Reader::new(area);
        let preamble_size = wire::get32(&mut reader)?;
        let declared = preamble_size as usize;
        if declared > area.len() {
            return Err(CodecError::OutOfBounds {
                needed: declared,
                available: area.len(),
            });
        }
        if declared < MIN_PREAMBLE_SIZE {
            return Err(CodecError::SizeMismatch {
                declared,
                actual: MIN_PREAMBLE_SIZE,
            });
        }

        let mut reader = Reader::new(&area[..declared]);
        reader.set_position(4);
        let header_version = wire::get32(&mut reader)?;
        if header_version != PREAMBLE_HEADER_VERSION {
            return Err(CodecError::UnsupportedVersion(header_version));
        }
        let version = wire::get16(&mut reader)?;
        if wire::get16(&mut reader)? != 0 {
            return Err(CodecError::NonCanonical("preamble reserved field"));
        }
        let flags = wire::get32(&mut reader)?;
        let body_signature = Signature::read(&mut reader)?;
        let subkey = match wire::get8(&mut reader)? {
            0 => None,
            1 => Some(PackedPublicKey::read(&mut reader)?),
            _ => return Err(CodecError::NonCanonical("subkey presence flag")),
        };
        let signature = Signature::read(&mut reader)?;
        let actual = wire::position(&reader);
        if actual != declared {
            return Err(CodecError::SizeMismatch { declared, actual });
        }

        Ok(Preamble {
            preamble_size,
            header_version,
            version,
            flags,
            body_signature,
            subkey,
            signature,
        })
    }

    pub fn encoded_len(&self) -> usize {
        PREAMBLE_HEADER_SIZE
            + self.body_signature.byte_len()
            + 1
            + self.subkey.as_ref().map_or(0, PackedPublicKey::byte_len)
            + self.signature.byte_len()
    }

    /// Bytes covered by the preamble signature: everything before it.
    pub fn signed_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        wire::put32(&mut out, self.preamble_size)?;
        wire::put32(&mut out, self.header_version)?;
        wire::put16(&mut out, self.version)?;
        wire::put16(&mut out, 0)?;
        wire::put32(&mut out, self.flags)?;
        self.body_signature.write(&mut out)?;
        match &self.subkey {
            Some(subkey) => {
                wire::put8(&mut out, 1)?;
                subkey.write(&mut out)?;
            }
            None => wire::put8(&mut out, 0)?,
        }
        Ok(out)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let actual = self.encoded_len();
        if self.preamble_size as usize != actual {
            return Err(CodecError::SizeMismatch {
                declared: self.preamble_size as usize,
                actual,
            });
        }
        let mut out = self.signed_bytes()?;
        self.signature.write(&mut out)?;
        Ok(out)
    }

    /// Check the preamble signature with the keyblock data key.
    pub fn verify_signature(
        &self,
        data_key: &PackedPublicKey,
        primitives: &dyn TrustPrimitives,
    ) -> Result<(), TrustError> {
        let signed = self
            .signed_bytes()
            .map_err(|_| TrustError::InvalidSignature)?;
        self.signature.verify_data(data_key, &signed, primitives)
    }

    /// Number of body bytes the body signature covers.
    pub fn body_len(&self) -> usize {
        self.body_signature.data_size as usize
    }

    /// Version used for rollback checks, combining the data key version.
    ///
    /// `None` when the key version does not fit in 16 bits.
    pub fn combined_version(&self, data_key: &PackedPublicKey) -> Option<u32> {
        if data_key.key_version > MAX_KEY_VERSION {
            return None;
        }
        Some((data_key.key_version << 16) | self.version as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Algorithm, KeyPair, SoftwarePrimitives};

    fn body_signature(data: &KeyPair, body: &[u8]) -> Signature {
        Signature::classical(
            Algorithm::Ed25519,
            body.len() as u32,
            data.sk.sign(body).unwrap(),
        )
    }

    #[test]
    fn test_preamble_create_parse() {
        let data = KeyPair::generate(1);
        let pre = Preamble::create(3, 0x10, body_signature(&data, b"body"), None, &data.sk).unwrap();
        let bytes = pre.to_bytes().unwrap();
        assert_eq!(bytes.len(), 171);

        let parsed = Preamble::parse(&bytes, 0).unwrap();
        assert_eq!(parsed, pre);
        assert_eq!(parsed.version, 3);
        assert_eq!(parsed.flags, 0x10);
        assert_eq!(parsed.body_len(), 4);
        assert!(
            parsed
                .verify_signature(&data.pk.to_packed(), &SoftwarePrimitives)
                .is_ok()
        );
    }

    #[test]
    fn test_preamble_with_subkey() {
        let data = KeyPair::generate(1);
        let kernel = KeyPair::generate(4);
        let pre = Preamble::create(
            1,
            0,
            body_signature(&data, b"fw"),
            Some(kernel.pk.to_packed()),
            &data.sk,
        )
        .unwrap();
        let mut area = vec![0u8; 16];
        area.extend_from_slice(&pre.to_bytes().unwrap());
        area.extend_from_slice(&[0xFF; 32]);

        let parsed = Preamble::parse(&area, 16).unwrap();
        assert_eq!(parsed.subkey, Some(kernel.pk.to_packed()));
        assert!(
            parsed
                .verify_signature(&data.pk.to_packed(), &SoftwarePrimitives)
                .is_ok()
        );
    }

    #[test]
    fn test_preamble_out_of_bounds() {
        let data = KeyPair::generate(1);
        let pre = Preamble::create(1, 0, body_signature(&data, b"x"), None, &data.sk).unwrap();
        let bytes = pre.to_bytes().unwrap();

        assert!(matches!(
            Preamble::parse(&bytes[..20], 0),
            Err(CodecError::OutOfBounds { .. })
        ));
        assert!(matches!(
            Preamble::parse(&bytes[..bytes.len() - 1], 0),
            Err(CodecError::OutOfBounds { .. })
        ));
        assert!(matches!(
            Preamble::parse(&bytes, usize::MAX),
            Err(CodecError::Truncated)
        ));
    }

    #[test]
    fn test_preamble_reserved_must_be_zero() {
        let data = KeyPair::generate(1);
        let pre = Preamble::create(1, 0, body_signature(&data, b"x"), None, &data.sk).unwrap();
        let mut bytes = pre.to_bytes().unwrap();
        bytes[10] = 1;
        assert!(matches!(
            Preamble::parse(&bytes, 0),
            Err(CodecError::NonCanonical(_))
        ));
    }

    #[test]
    fn test_preamble_version_flip_breaks_signature() {
        let data = KeyPair::generate(1);
        let pre = Preamble::create(1, 0, body_signature(&data, b"x"), None, &data.sk).unwrap();
        let mut bytes = pre.to_bytes().unwrap();
        bytes[8] ^= 0x02;
        let parsed = Preamble::parse(&bytes, 0).unwrap();
        assert!(
            parsed
                .verify_signature(&data.pk.to_packed(), &SoftwarePrimitives)
                .is_err()
        );
    }

    #[test]
    fn test_combined_version() {
        let data = KeyPair::generate(2);
        let pre = Preamble::create(5, 0, body_signature(&data, b"x"), None, &data.sk).unwrap();
        assert_eq!(pre.combined_version(&data.pk.to_packed()), Some(0x0002_0005));

        let mut wide = data.pk.to_packed();
        wide.key_version = 0x1_0000;
        assert_eq!(pre.combined_version(&wide), None);
    }
}
