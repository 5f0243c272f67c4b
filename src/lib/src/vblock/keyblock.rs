use super::wire::{self, Reader};
use super::{MAX_KEY_VERSION, PackedPublicKey, Signature};
use crate::crypto::{Algorithm, SHA256_DIGEST_SIZE, SigningKey, TrustPrimitives, sha256};
use crate::error::*;
use crate::verify::BootMode;

use bitflags::bitflags;

pub const KEYBLOCK_MAGIC: &[u8; 8] = b"VBKEYBLK";
pub const KEYBLOCK_HEADER_VERSION: u32 = 1;

/// magic + header_version + keyblock_size + flags
pub const KEYBLOCK_HEADER_SIZE: usize = 20;

/// Smallest encoding: empty key, checksum, empty signature.
pub const MIN_KEYBLOCK_SIZE: usize =
    KEYBLOCK_HEADER_SIZE + PackedPublicKey::HEADER_SIZE + SHA256_DIGEST_SIZE + Signature::HEADER_SIZE;

bitflags! {
    /// Boot modes a keyblock is valid in.
    ///
    /// Each switch has a pair of bits: `_0` allows the keyblock with the
    /// switch off, `_1` with the switch on.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct KeyblockFlags: u32 {
        const DEVELOPER_0 = 0x01;
        const DEVELOPER_1 = 0x02;
        const RECOVERY_0 = 0x04;
        const RECOVERY_1 = 0x08;
        const MINIOS_0 = 0x10;
        const MINIOS_1 = 0x20;
    }
}

impl Default for KeyblockFlags {
    fn default() -> Self {
        Self::all()
    }
}

impl KeyblockFlags {
    /// Flags a keyblock must carry to be used in `mode`.
    pub fn required_for(mode: BootMode) -> Self {
        let mut required = Self::empty();
        required |= if mode.developer {
            Self::DEVELOPER_1
        } else {
            Self::DEVELOPER_0
        };
        required |= if mode.recovery {
            Self::RECOVERY_1
        } else {
            Self::RECOVERY_0
        };
        required |= if mode.minios {
            Self::MINIOS_1
        } else {
            Self::MINIOS_0
        };
        required
    }
}

/// Keyblock: a data key signed by a higher-level key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Keyblock {
    pub header_version: u32,
    pub keyblock_size: u32,
    pub flags: KeyblockFlags,
    pub data_key: PackedPublicKey,
    pub checksum: [u8; SHA256_DIGEST_SIZE],
    pub signature: Signature,
}

impl Keyblock {
    /// Build and sign a keyblock for `data_key`.
    ///
    /// The data key version must fit in [`MAX_KEY_VERSION`], since it forms
    /// the high half of the rollback version.
    pub fn create(
        data_key: PackedPublicKey,
        flags: KeyblockFlags,
        signer: &dyn SigningKey,
    ) -> Result<Self, VbError> {
        if data_key.key_version > MAX_KEY_VERSION {
            return Err(TrustError::MalformedKey(format!(
                "key version {:#x} exceeds {:#x}",
                data_key.key_version, MAX_KEY_VERSION
            ))
            .into());
        }
        Self::create_unchecked(data_key, flags, signer)
    }

    pub(crate) fn create_unchecked(
        data_key: PackedPublicKey,
        flags: KeyblockFlags,
        signer: &dyn SigningKey,
    ) -> Result<Self, VbError> {
        let signed_len = KEYBLOCK_HEADER_SIZE + data_key.byte_len() + SHA256_DIGEST_SIZE;
        let sig_size = signer.signature_size();
        let keyblock_size = signed_len + Signature::HEADER_SIZE + sig_size;

        let mut keyblock = Keyblock {
            header_version: KEYBLOCK_HEADER_VERSION,
            keyblock_size: to_u32(keyblock_size)?,
            flags,
            data_key,
            checksum: [0u8; SHA256_DIGEST_SIZE],
            signature: Signature::classical(signer.algorithm(), to_u32(signed_len)?, vec![]),
        };

        let mut unchecked = Vec::with_capacity(keyblock_size);
        keyblock.write_unchecked(&mut unchecked)?;
        keyblock.checksum = sha256(&unchecked);

        let signed = keyblock.signed_bytes()?;
        let sig_data = signer.sign(&signed)?;
        if sig_data.len() != sig_size {
            return Err(TrustError::SigningFailed(format!(
                "expected a {} byte signature, got {}",
                sig_size,
                sig_data.len()
            ))
            .into());
        }
        keyblock.signature = Signature::classical(signer.algorithm(), to_u32(signed_len)?, sig_data);
        Ok(keyblock)
    }

    /// Parse a keyblock from the start of `bytes`.
    ///
    /// Trailing bytes after the declared keyblock size are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(bytes);
        let magic: [u8; 8] = wire::get_array(&mut reader)?;
        if &magic != KEYBLOCK_MAGIC {
            return Err(CodecError::BadMagic);
        }
        let header_version = wire::get32(&mut reader)?;
        if header_version != KEYBLOCK_HEADER_VERSION {
            return Err(CodecError::UnsupportedVersion(header_version));
        }
        let keyblock_size = wire::get32(&mut reader)?;
        let declared = keyblock_size as usize;
        if declared > bytes.len() {
            return Err(CodecError::OutOfBounds {
                needed: declared,
                available: bytes.len(),
            });
        }
        if declared < MIN_KEYBLOCK_SIZE {
            return Err(CodecError::SizeMismatch {
                declared,
                actual: MIN_KEYBLOCK_SIZE,
            });
        }
        let flags = KeyblockFlags::from_bits_retain(wire::get32(&mut reader)?);

        let bytes = &bytes[..declared];
        let mut reader = Reader::new(bytes);
        reader.set_position(KEYBLOCK_HEADER_SIZE as u64);
        let data_key = PackedPublicKey::read(&mut reader)?;

        let checked_len = wire::position(&reader);
        let checksum: [u8; SHA256_DIGEST_SIZE] = wire::get_array(&mut reader)?;
        if sha256(&bytes[..checked_len]) != checksum {
            return Err(CodecError::ChecksumMismatch);
        }

        let signature = Signature::read(&mut reader)?;
        let actual = wire::position(&reader);
        if actual != declared {
            return Err(CodecError::SizeMismatch { declared, actual });
        }

        Ok(Keyblock {
            header_version,
            keyblock_size,
            flags,
            data_key,
            checksum,
            signature,
        })
    }

    /// Encoded size computed from the fields.
    pub fn encoded_len(&self) -> usize {
        KEYBLOCK_HEADER_SIZE + self.data_key.byte_len() + SHA256_DIGEST_SIZE + self.signature.byte_len()
    }

    fn write_unchecked(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(KEYBLOCK_MAGIC);
        wire::put32(out, self.header_version)?;
        wire::put32(out, self.keyblock_size)?;
        wire::put32(out, self.flags.bits())?;
        self.data_key.write(out)
    }

    /// Bytes covered by the keyblock signature: header, data key and checksum.
    pub fn signed_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_unchecked(&mut out)?;
        out.extend_from_slice(&self.checksum);
        Ok(out)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let actual = self.encoded_len();
        if self.keyblock_size as usize != actual {
            return Err(CodecError::SizeMismatch {
                declared: self.keyblock_size as usize,
                actual,
            });
        }
        let mut out = self.signed_bytes()?;
        self.signature.write(&mut out)?;
        Ok(out)
    }

    /// Check the keyblock signature with the key one level up the chain.
    pub fn verify_signature(
        &self,
        signer_key: &PackedPublicKey,
        primitives: &dyn TrustPrimitives,
    ) -> Result<(), TrustError> {
        let signed = self
            .signed_bytes()
            .map_err(|_| TrustError::InvalidSignature)?;
        self.signature.verify_data(signer_key, &signed, primitives)
    }

    /// Whether the keyblock flags allow booting in `mode`.
    pub fn allows(&self, mode: BootMode) -> bool {
        self.flags.contains(KeyblockFlags::required_for(mode))
    }

    pub fn data_key_algorithm(&self) -> Algorithm {
        self.data_key.algorithm()
    }
}

pub(crate) fn to_u32(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::NonCanonical("length field"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, SoftwarePrimitives};

    fn test_keyblock() -> (Keyblock, KeyPair, KeyPair) {
        let root = KeyPair::generate(1);
        let data = KeyPair::generate(2);
        let kb = Keyblock::create(data.pk.to_packed(), KeyblockFlags::default(), &root.sk).unwrap();
        (kb, root, data)
    }

    #[test]
    fn test_keyblock_create_parse() {
        let (kb, root, data) = test_keyblock();
        let bytes = kb.to_bytes().unwrap();
        assert_eq!(bytes.len(), 173);
        assert_eq!(kb.keyblock_size as usize, bytes.len());
        assert_eq!(&bytes[..8], KEYBLOCK_MAGIC);

        let parsed = Keyblock::parse(&bytes).unwrap();
        assert_eq!(parsed, kb);
        assert_eq!(parsed.data_key, data.pk.to_packed());
        assert!(
            parsed
                .verify_signature(&root.pk.to_packed(), &SoftwarePrimitives)
                .is_ok()
        );
    }

    #[test]
    fn test_keyblock_rejects_wide_key_version() {
        let root = KeyPair::generate(1);
        let data = KeyPair::generate(MAX_KEY_VERSION + 1);
        let result = Keyblock::create(data.pk.to_packed(), KeyblockFlags::default(), &root.sk);
        assert!(matches!(
            result,
            Err(VbError::Trust(TrustError::MalformedKey(_)))
        ));

        let data = KeyPair::generate(MAX_KEY_VERSION);
        assert!(Keyblock::create(data.pk.to_packed(), KeyblockFlags::default(), &root.sk).is_ok());
    }

    #[test]
    fn test_keyblock_not_signed_by_data_key() {
        let (kb, _, data) = test_keyblock();
        assert!(
            kb.verify_signature(&data.pk.to_packed(), &SoftwarePrimitives)
                .is_err()
        );
    }

    #[test]
    fn test_keyblock_trailing_bytes_ignored() {
        let (kb, _, _) = test_keyblock();
        let mut bytes = kb.to_bytes().unwrap();
        bytes.extend_from_slice(&[0xFF; 64]);
        assert_eq!(Keyblock::parse(&bytes).unwrap(), kb);
    }

    #[test]
    fn test_keyblock_bad_magic() {
        let (kb, _, _) = test_keyblock();
        let mut bytes = kb.to_bytes().unwrap();
        bytes[0] ^= 1;
        assert!(matches!(Keyblock::parse(&bytes), Err(CodecError::BadMagic)));
    }

    #[test]
    fn test_keyblock_unsupported_version() {
        let (kb, _, _) = test_keyblock();
        let mut bytes = kb.to_bytes().unwrap();
        bytes[8] = 2;
        assert!(matches!(
            Keyblock::parse(&bytes),
            Err(CodecError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_keyblock_checksum_mismatch() {
        let (kb, _, _) = test_keyblock();
        let mut bytes = kb.to_bytes().unwrap();
        // Flip a bit of the data key material.
        bytes[KEYBLOCK_HEADER_SIZE + PackedPublicKey::HEADER_SIZE] ^= 0x80;
        assert!(matches!(
            Keyblock::parse(&bytes),
            Err(CodecError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_keyblock_declared_size_out_of_bounds() {
        let (kb, _, _) = test_keyblock();
        let bytes = kb.to_bytes().unwrap();
        assert!(matches!(
            Keyblock::parse(&bytes[..100]),
            Err(CodecError::OutOfBounds {
                needed: 173,
                available: 100
            })
        ));
    }

    #[test]
    fn test_keyblock_flags_change_checksum() {
        let (kb, _, _) = test_keyblock();
        let mut bytes = kb.to_bytes().unwrap();
        bytes[16] = 0x01;
        assert!(matches!(
            Keyblock::parse(&bytes),
            Err(CodecError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_keyblock_size_field_must_match_fields() {
        let (mut kb, _, _) = test_keyblock();
        kb.keyblock_size += 4;
        assert!(matches!(
            kb.to_bytes(),
            Err(CodecError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_flags_allow_boot_mode() {
        let (mut kb, _, _) = test_keyblock();
        assert!(kb.allows(BootMode::default()));
        assert!(kb.allows(BootMode {
            developer: true,
            recovery: true,
            minios: false
        }));

        kb.flags = KeyblockFlags::DEVELOPER_0 | KeyblockFlags::RECOVERY_0 | KeyblockFlags::MINIOS_0;
        assert!(kb.allows(BootMode::default()));
        assert!(!kb.allows(BootMode {
            developer: true,
            ..Default::default()
        }));
        assert!(!kb.allows(BootMode {
            recovery: true,
            ..Default::default()
        }));
    }
}
