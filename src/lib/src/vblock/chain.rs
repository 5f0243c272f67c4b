use super::{Keyblock, Preamble};
use crate::error::*;

/// A parsed keyblock and the preamble following it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrustChain {
    pub keyblock: Keyblock,
    pub preamble: Preamble,
}

impl TrustChain {
    /// Parse the chain at the start of a trust chain area.
    pub fn parse(area: &[u8]) -> Result<Self, CodecError> {
        let keyblock = Keyblock::parse(area)?;
        let preamble = Preamble::parse(area, keyblock.keyblock_size as usize)?;
        Ok(TrustChain { keyblock, preamble })
    }

    /// Total encoded size of the chain.
    pub fn encoded_len(&self) -> usize {
        self.keyblock.encoded_len() + self.preamble.encoded_len()
    }

    /// Encode the chain, checking that it fits in `capacity` bytes.
    pub fn encode(&self, capacity: usize) -> Result<Vec<u8>, CodecError> {
        encode_chain(&self.keyblock, &self.preamble, capacity)
    }
}

/// Encode a keyblock immediately followed by a preamble.
///
/// Fails with `AreaTooSmall` if the result would exceed `capacity`.
pub fn encode_chain(
    keyblock: &Keyblock,
    preamble: &Preamble,
    capacity: usize,
) -> Result<Vec<u8>, CodecError> {
    let mut out = keyblock.to_bytes()?;
    out.extend_from_slice(&preamble.to_bytes()?);
    if out.len() > capacity {
        return Err(CodecError::AreaTooSmall {
            needed: out.len(),
            available: capacity,
        });
    }
    Ok(out)
}

/// Write a keyblock and preamble at the start of `out`.
///
/// Bytes after the chain are left untouched. Nothing is written on failure.
pub fn serialize_chain(
    keyblock: &Keyblock,
    preamble: &Preamble,
    out: &mut [u8],
) -> Result<(), CodecError> {
    let encoded = encode_chain(keyblock, preamble, out.len())?;
    out[..encoded.len()].copy_from_slice(&encoded);
    Ok(())
}
