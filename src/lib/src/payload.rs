//! Self-describing payload capability.
//!
//! Firmware bodies may carry a structure that tells how much of the body
//! area is actually used, and may carry integrity metadata whose digest is
//! signed instead of the whole body. The signer and verifier only see this
//! through [`PayloadFormat`].

use crate::crypto::{Algorithm, SHA256_DIGEST_SIZE, TrustPrimitives, sha256};
use crate::error::*;
use crate::vblock::wire::{self, Reader};

/// Digest of the integrity metadata carried by a body.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MetadataHash {
    pub algorithm: Algorithm,
    pub digest: Vec<u8>,
}

impl MetadataHash {
    pub fn compute(
        algorithm: Algorithm,
        metadata: &[u8],
        primitives: &dyn TrustPrimitives,
    ) -> Result<Self, TrustError> {
        Ok(MetadataHash {
            algorithm,
            digest: primitives.digest(algorithm, metadata)?,
        })
    }
}

pub trait PayloadFormat {
    /// Whether the body declares that its integrity metadata must be signed.
    fn integrity_declared(&self, _body: &[u8]) -> bool {
        false
    }

    /// Length of the meaningful content at the start of the body area.
    fn content_len(&self, body: &[u8]) -> Option<usize>;

    /// The integrity metadata carried by the body, if any.
    fn metadata<'b>(&self, body: &'b [u8]) -> Option<&'b [u8]>;

    /// Whether the content of `body` matches its integrity metadata.
    ///
    /// `body` is exactly the signed range: bytes the metadata does not
    /// describe make the check fail.
    fn content_matches(&self, body: &[u8], primitives: &dyn TrustPrimitives) -> bool;

    /// Digest of the body's integrity metadata.
    fn metadata_hash(
        &self,
        body: &[u8],
        primitives: &dyn TrustPrimitives,
    ) -> Option<MetadataHash> {
        let metadata = self.metadata(body)?;
        match MetadataHash::compute(Algorithm::Sha256, metadata, primitives) {
            Ok(hash) => Some(hash),
            Err(e) => {
                log::warn!("Cannot digest integrity metadata: {}", e);
                None
            }
        }
    }
}

/// Opaque bodies: no structure, no integrity metadata.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawPayload;

impl PayloadFormat for RawPayload {
    fn content_len(&self, _body: &[u8]) -> Option<usize> {
        None
    }

    fn metadata<'b>(&self, _body: &'b [u8]) -> Option<&'b [u8]> {
        None
    }

    fn content_matches(&self, _body: &[u8], _primitives: &dyn TrustPrimitives) -> bool {
        false
    }
}

pub const INDEXED_PAYLOAD_MAGIC: &[u8; 4] = b"PLD1";
pub const INDEXED_PAYLOAD_HEADER_SIZE: usize = 16;

/// Content bytes described by one index entry.
pub const INDEX_BLOCK_SIZE: usize = 0x400;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct PayloadFlags: u32 {
        /// The metadata digest is what gets signed.
        const INTEGRITY = 0x01;
    }
}

/// Header of an indexed payload.
///
/// ```text
/// magic[4] = "PLD1"
/// flags: u32
/// metadata_size: u32  (index bytes following the header)
/// content_size: u32   (used bytes from the start of the body, header included)
/// ```
///
/// The index holds the SHA-256 of every [`INDEX_BLOCK_SIZE`] block of the
/// content that follows it, the last block possibly short. The integrity
/// metadata is the header plus the index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IndexedPayloadHeader {
    pub flags: PayloadFlags,
    pub metadata_size: u32,
    pub content_size: u32,
}

impl IndexedPayloadHeader {
    pub fn parse(body: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(body);
        let magic: [u8; 4] = wire::get_array(&mut reader)?;
        if &magic != INDEXED_PAYLOAD_MAGIC {
            return Err(CodecError::BadMagic);
        }
        let header = IndexedPayloadHeader {
            flags: PayloadFlags::from_bits_retain(wire::get32(&mut reader)?),
            metadata_size: wire::get32(&mut reader)?,
            content_size: wire::get32(&mut reader)?,
        };
        let metadata_end = header.metadata_end();
        if metadata_end > header.content_size as usize {
            return Err(CodecError::SizeMismatch {
                declared: header.content_size as usize,
                actual: metadata_end,
            });
        }
        if header.content_size as usize > body.len() {
            return Err(CodecError::OutOfBounds {
                needed: header.content_size as usize,
                available: body.len(),
            });
        }
        Ok(header)
    }

    pub fn metadata_end(&self) -> usize {
        INDEXED_PAYLOAD_HEADER_SIZE + self.metadata_size as usize
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(INDEXED_PAYLOAD_MAGIC);
        wire::put32(out, self.flags.bits())?;
        wire::put32(out, self.metadata_size)?;
        wire::put32(out, self.content_size)
    }
}

/// Bodies starting with an [`IndexedPayloadHeader`].
///
/// Bodies without the header behave like [`RawPayload`].
#[derive(Clone, Copy, Debug, Default)]
pub struct IndexedPayload;

impl IndexedPayload {
    /// Lay out a body for `content`, indexing it.
    pub fn build(content: &[u8], flags: PayloadFlags) -> Result<Vec<u8>, CodecError> {
        let index: Vec<u8> = content
            .chunks(INDEX_BLOCK_SIZE)
            .flat_map(|block| sha256(block))
            .collect();
        Self::assemble(&index, content, flags)
    }

    fn assemble(index: &[u8], content: &[u8], flags: PayloadFlags) -> Result<Vec<u8>, CodecError> {
        let metadata_size =
            u32::try_from(index.len()).map_err(|_| CodecError::NonCanonical("index size"))?;
        let content_size = u32::try_from(INDEXED_PAYLOAD_HEADER_SIZE + index.len() + content.len())
            .map_err(|_| CodecError::NonCanonical("content size"))?;
        let header = IndexedPayloadHeader {
            flags,
            metadata_size,
            content_size,
        };
        let mut out = Vec::with_capacity(content_size as usize);
        header.write(&mut out)?;
        out.extend_from_slice(index);
        out.extend_from_slice(content);
        Ok(out)
    }

    fn header(body: &[u8]) -> Option<IndexedPayloadHeader> {
        match IndexedPayloadHeader::parse(body) {
            Ok(header) => Some(header),
            Err(CodecError::BadMagic) | Err(CodecError::Truncated) => None,
            Err(e) => {
                log::debug!("Ignoring malformed payload header: {}", e);
                None
            }
        }
    }

    fn integrity_header(body: &[u8]) -> Option<IndexedPayloadHeader> {
        Self::header(body).filter(|h| h.flags.contains(PayloadFlags::INTEGRITY))
    }
}

impl PayloadFormat for IndexedPayload {
    fn integrity_declared(&self, body: &[u8]) -> bool {
        Self::integrity_header(body).is_some()
    }

    fn content_len(&self, body: &[u8]) -> Option<usize> {
        Self::header(body).map(|h| h.content_size as usize)
    }

    fn metadata<'b>(&self, body: &'b [u8]) -> Option<&'b [u8]> {
        let header = Self::integrity_header(body)?;
        Some(&body[..header.metadata_end()])
    }

    fn content_matches(&self, body: &[u8], primitives: &dyn TrustPrimitives) -> bool {
        let Some(header) = Self::integrity_header(body) else {
            return false;
        };
        if header.content_size as usize != body.len() {
            log::debug!(
                "Payload content ends at {:#x}, signed range at {:#x}",
                header.content_size,
                body.len()
            );
            return false;
        }
        let index = &body[INDEXED_PAYLOAD_HEADER_SIZE..header.metadata_end()];
        let content = &body[header.metadata_end()..];
        if index.len() != content.len().div_ceil(INDEX_BLOCK_SIZE) * SHA256_DIGEST_SIZE {
            log::debug!("Payload index does not describe every content block");
            return false;
        }
        content
            .chunks(INDEX_BLOCK_SIZE)
            .zip(index.chunks(SHA256_DIGEST_SIZE))
            .enumerate()
            .all(|(i, (block, expected))| {
                match primitives.digest(Algorithm::Sha256, block) {
                    Ok(digest) if digest == expected => true,
                    Ok(_) => {
                        log::debug!("Payload block {} does not match the index", i);
                        false
                    }
                    Err(e) => {
                        log::debug!("Cannot digest payload block {}: {}", i, e);
                        false
                    }
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SoftwarePrimitives;

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    #[test]
    fn test_raw_payload_is_opaque() {
        let body = IndexedPayload::build(b"code", PayloadFlags::INTEGRITY).unwrap();
        assert_eq!(RawPayload.content_len(&body), None);
        assert_eq!(RawPayload.metadata_hash(&body, &SoftwarePrimitives), None);
        assert!(!RawPayload.integrity_declared(&body));
        assert!(!RawPayload.content_matches(&body, &SoftwarePrimitives));
    }

    #[test]
    fn test_indexed_content_len() {
        let mut body = IndexedPayload::build(b"content", PayloadFlags::empty()).unwrap();
        let used = body.len();
        body.resize(0x100, 0xFF);
        assert_eq!(IndexedPayload.content_len(&body), Some(used));
        assert!(!IndexedPayload.integrity_declared(&body));
        assert_eq!(IndexedPayload.metadata_hash(&body, &SoftwarePrimitives), None);
    }

    #[test]
    fn test_indexed_build_indexes_blocks() {
        let body = IndexedPayload::build(&content(0x900), PayloadFlags::INTEGRITY).unwrap();
        let header = IndexedPayloadHeader::parse(&body).unwrap();
        assert_eq!(header.metadata_size as usize, 3 * SHA256_DIGEST_SIZE);
        assert_eq!(header.content_size as usize, body.len());
        assert!(IndexedPayload.content_matches(&body, &SoftwarePrimitives));

        let empty = IndexedPayload::build(&[], PayloadFlags::INTEGRITY).unwrap();
        assert_eq!(empty.len(), INDEXED_PAYLOAD_HEADER_SIZE);
        assert!(IndexedPayload.content_matches(&empty, &SoftwarePrimitives));
    }

    #[test]
    fn test_indexed_metadata_hash_covers_index() {
        let body = IndexedPayload::build(&content(0x500), PayloadFlags::INTEGRITY).unwrap();
        let metadata_end = INDEXED_PAYLOAD_HEADER_SIZE + 2 * SHA256_DIGEST_SIZE;
        let hash = IndexedPayload.metadata_hash(&body, &SoftwarePrimitives).unwrap();
        assert_eq!(hash.algorithm, Algorithm::Sha256);
        assert_eq!(hash.digest, sha256(&body[..metadata_end]).to_vec());

        // Content changes leave the metadata alone but break the index.
        let mut changed = body.clone();
        let last = changed.len() - 1;
        changed[last] ^= 1;
        assert_eq!(IndexedPayload.metadata_hash(&changed, &SoftwarePrimitives).unwrap(), hash);
        assert!(!IndexedPayload.content_matches(&changed, &SoftwarePrimitives));

        changed[INDEXED_PAYLOAD_HEADER_SIZE] ^= 1;
        assert_ne!(IndexedPayload.metadata_hash(&changed, &SoftwarePrimitives).unwrap(), hash);
    }

    #[test]
    fn test_content_match_requires_exact_range() {
        let mut body = IndexedPayload::build(&content(0x40), PayloadFlags::INTEGRITY).unwrap();
        let used = body.len();
        body.resize(used + 0x10, 0xFF);
        assert!(!IndexedPayload.content_matches(&body, &SoftwarePrimitives));
        assert!(IndexedPayload.content_matches(&body[..used], &SoftwarePrimitives));
    }

    #[test]
    fn test_short_index_does_not_match() {
        let data = content(0x800);
        let index: Vec<u8> = sha256(&data[..INDEX_BLOCK_SIZE]).to_vec();
        let body = IndexedPayload::assemble(&index, &data, PayloadFlags::INTEGRITY).unwrap();
        assert!(IndexedPayload.metadata(&body).is_some());
        assert!(!IndexedPayload.content_matches(&body, &SoftwarePrimitives));
    }

    #[test]
    fn test_indexed_header_bounds() {
        let body = IndexedPayload::build(b"content", PayloadFlags::empty()).unwrap();
        assert!(matches!(
            IndexedPayloadHeader::parse(&body[..body.len() - 1]),
            Err(CodecError::OutOfBounds { .. })
        ));
        assert_eq!(IndexedPayload.content_len(&body[..body.len() - 1]), None);
        assert_eq!(IndexedPayload.content_len(&[0xFF; 64]), None);
    }
}
