//! Root-of-trust blob (GBB).
//!
//! The GBB area of a firmware image holds the hardware ID and the root and
//! recovery public keys. Offsets in its header are relative to the start of
//! the area.

use crate::crypto::sha256;
use crate::error::*;
use crate::vblock::PackedPublicKey;
use crate::vblock::wire::{self, Reader};

use ct_codecs::{Encoder, Hex};
use std::ops::Range;

pub const GBB_SIGNATURE: &[u8; 4] = b"$GBB";
pub const GBB_MAJOR_VER: u16 = 1;
pub const GBB_MINOR_VER: u16 = 2;
pub const GBB_HEADER_SIZE: usize = 40;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GbbHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub header_size: u32,
    pub flags: u32,
    pub hwid_offset: u32,
    pub hwid_size: u32,
    pub rootkey_offset: u32,
    pub rootkey_size: u32,
    pub recovery_key_offset: u32,
    pub recovery_key_size: u32,
}

fn sub_range(offset: u32, size: u32) -> Range<usize> {
    let start = offset as usize;
    start..start.saturating_add(size as usize)
}

impl GbbHeader {
    fn read(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let signature: [u8; 4] = wire::get_array(reader)?;
        if &signature != GBB_SIGNATURE {
            return Err(CodecError::BadMagic);
        }
        Ok(GbbHeader {
            major_version: wire::get16(reader)?,
            minor_version: wire::get16(reader)?,
            header_size: wire::get32(reader)?,
            flags: wire::get32(reader)?,
            hwid_offset: wire::get32(reader)?,
            hwid_size: wire::get32(reader)?,
            rootkey_offset: wire::get32(reader)?,
            rootkey_size: wire::get32(reader)?,
            recovery_key_offset: wire::get32(reader)?,
            recovery_key_size: wire::get32(reader)?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(GBB_SIGNATURE);
        wire::put16(out, self.major_version)?;
        wire::put16(out, self.minor_version)?;
        wire::put32(out, self.header_size)?;
        wire::put32(out, self.flags)?;
        wire::put32(out, self.hwid_offset)?;
        wire::put32(out, self.hwid_size)?;
        wire::put32(out, self.rootkey_offset)?;
        wire::put32(out, self.rootkey_size)?;
        wire::put32(out, self.recovery_key_offset)?;
        wire::put32(out, self.recovery_key_size)
    }

    pub fn hwid_range(&self) -> Range<usize> {
        sub_range(self.hwid_offset, self.hwid_size)
    }

    pub fn rootkey_range(&self) -> Range<usize> {
        sub_range(self.rootkey_offset, self.rootkey_size)
    }

    pub fn recovery_key_range(&self) -> Range<usize> {
        sub_range(self.recovery_key_offset, self.recovery_key_size)
    }

    /// Number of bytes the area needs to hold the header and every sub-range.
    pub fn required_size(&self) -> usize {
        [
            self.header_size as usize,
            self.hwid_range().end,
            self.rootkey_range().end,
            self.recovery_key_range().end,
        ]
        .into_iter()
        .max()
        .unwrap_or(GBB_HEADER_SIZE)
    }
}

/// A parsed GBB borrowing the area it was found in.
#[derive(Clone, Copy, Debug)]
pub struct Gbb<'a> {
    pub header: GbbHeader,
    area: &'a [u8],
}

impl<'a> Gbb<'a> {
    pub fn parse(area: &'a [u8]) -> Result<Self, CodecError> {
        let header = GbbHeader::read(&mut Reader::new(area))?;
        if header.major_version != GBB_MAJOR_VER {
            return Err(CodecError::UnsupportedVersion(header.major_version as u32));
        }
        if (header.header_size as usize) < GBB_HEADER_SIZE {
            return Err(CodecError::SizeMismatch {
                declared: header.header_size as usize,
                actual: GBB_HEADER_SIZE,
            });
        }
        let needed = header.required_size();
        if needed > area.len() {
            return Err(CodecError::OutOfBounds {
                needed,
                available: area.len(),
            });
        }
        Ok(Gbb { header, area })
    }

    /// Hardware ID, up to the first NUL.
    pub fn hwid(&self) -> String {
        let raw = &self.area[self.header.hwid_range()];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    /// SHA-256 of the hardware ID, hex encoded.
    pub fn hwid_digest(&self) -> String {
        Hex::encode_to_string(sha256(self.hwid().as_bytes())).unwrap_or_default()
    }

    fn key_at(&self, range: Range<usize>) -> Result<PackedPublicKey, CodecError> {
        let bytes = &self.area[range];
        if bytes.len() < PackedPublicKey::HEADER_SIZE {
            return Err(CodecError::Truncated);
        }
        PackedPublicKey::parse(bytes)
    }

    pub fn root_key(&self) -> Result<PackedPublicKey, CodecError> {
        self.key_at(self.header.rootkey_range())
    }

    pub fn recovery_key(&self) -> Result<PackedPublicKey, CodecError> {
        self.key_at(self.header.recovery_key_range())
    }
}

/// Lays out a GBB area: header, HWID, root key, recovery key.
#[derive(Clone, Debug, Default)]
pub struct GbbBuilder {
    hwid: String,
    flags: u32,
    root_key: Option<PackedPublicKey>,
    recovery_key: Option<PackedPublicKey>,
}

impl GbbBuilder {
    pub fn new(hwid: &str) -> Self {
        GbbBuilder {
            hwid: hwid.to_string(),
            ..Default::default()
        }
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn root_key(mut self, key: PackedPublicKey) -> Self {
        self.root_key = Some(key);
        self
    }

    pub fn recovery_key(mut self, key: PackedPublicKey) -> Self {
        self.recovery_key = Some(key);
        self
    }

    /// Encode the GBB padded with zeroes to `area_len` bytes.
    pub fn build(&self, area_len: usize) -> Result<Vec<u8>, CodecError> {
        let mut hwid = self.hwid.as_bytes().to_vec();
        hwid.push(0);
        let root_key = self
            .root_key
            .as_ref()
            .map(PackedPublicKey::to_bytes)
            .unwrap_or_default();
        let recovery_key = self
            .recovery_key
            .as_ref()
            .map(PackedPublicKey::to_bytes)
            .unwrap_or_default();

        let hwid_offset = GBB_HEADER_SIZE;
        let rootkey_offset = hwid_offset + hwid.len();
        let recovery_key_offset = rootkey_offset + root_key.len();
        let total = recovery_key_offset + recovery_key.len();
        if total > area_len {
            return Err(CodecError::AreaTooSmall {
                needed: total,
                available: area_len,
            });
        }

        let to_u32 = |v: usize| u32::try_from(v).map_err(|_| CodecError::NonCanonical("GBB offset"));
        let header = GbbHeader {
            major_version: GBB_MAJOR_VER,
            minor_version: GBB_MINOR_VER,
            header_size: GBB_HEADER_SIZE as u32,
            flags: self.flags,
            hwid_offset: to_u32(hwid_offset)?,
            hwid_size: to_u32(hwid.len())?,
            rootkey_offset: to_u32(rootkey_offset)?,
            rootkey_size: to_u32(root_key.len())?,
            recovery_key_offset: to_u32(recovery_key_offset)?,
            recovery_key_size: to_u32(recovery_key.len())?,
        };
        let mut out = Vec::with_capacity(area_len);
        header.write(&mut out)?;
        out.extend_from_slice(&hwid);
        out.extend_from_slice(&root_key);
        out.extend_from_slice(&recovery_key);
        out.resize(area_len, 0);
        Ok(out)
    }
}
