//! Flash map (FMAP) region table.
//!
//! An FMAP can live anywhere in an image. It names the areas of the image
//! with fixed-width, not necessarily NUL-terminated names.

use crate::error::*;
use crate::kernel::KERNEL_MAGIC;
use crate::rwsig::{EC_RW, RWSIG_DEFAULT_SIZE, SIG_RW};
use crate::vblock::{Signature, SignatureKind};
use crate::vblock::wire::{self, Reader};

pub const FMAP_SIGNATURE: &[u8; 8] = b"__FMAP__";
pub const FMAP_VER_MAJOR: u8 = 1;
pub const FMAP_VER_MINOR: u8 = 1;
pub const FMAP_NAMELEN: usize = 32;

/// signature + ver_major + ver_minor + base + size + name + nareas
pub const FMAP_HEADER_SIZE: usize = 8 + 1 + 1 + 8 + 4 + FMAP_NAMELEN + 2;
/// offset + size + name + flags
pub const FMAP_AREA_SIZE: usize = 4 + 4 + FMAP_NAMELEN + 2;

pub const FMAP_AREA_STATIC: u16 = 1 << 0;
pub const FMAP_AREA_COMPRESSED: u16 = 1 << 1;
pub const FMAP_AREA_RO: u16 = 1 << 2;
pub const FMAP_AREA_PRESERVE: u16 = 1 << 3;

fn name_bytes(name: &[u8; FMAP_NAMELEN]) -> &[u8] {
    let end = name.iter().position(|&b| b == 0).unwrap_or(FMAP_NAMELEN);
    &name[..end]
}

fn pack_name(name: &str) -> [u8; FMAP_NAMELEN] {
    let mut packed = [0u8; FMAP_NAMELEN];
    let len = name.len().min(FMAP_NAMELEN);
    packed[..len].copy_from_slice(&name.as_bytes()[..len]);
    packed
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct FmapArea {
    pub offset: u32,
    pub size: u32,
    pub name: [u8; FMAP_NAMELEN],
    pub flags: u16,
}

impl FmapArea {
    pub fn new(name: &str, offset: u32, size: u32) -> Self {
        FmapArea {
            offset,
            size,
            name: pack_name(name),
            flags: 0,
        }
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(name_bytes(&self.name)).into_owned()
    }

    pub fn name_matches(&self, name: &str) -> bool {
        name_bytes(&self.name) == name.as_bytes()
    }

    /// Replace an area that does not fit in `buffer_len` bytes with `{0,0}`.
    pub fn clamp(mut self, buffer_len: usize) -> Self {
        let end = self.offset.checked_add(self.size);
        if end.is_none_or(|end| end as usize > buffer_len) {
            log::debug!(
                "{} {:#x} + {:#x} > {:#x}",
                self.name(),
                self.offset,
                self.size,
                buffer_len
            );
            self.offset = 0;
            self.size = 0;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(FmapArea {
            offset: wire::get32(reader)?,
            size: wire::get32(reader)?,
            name: wire::get_array(reader)?,
            flags: wire::get16(reader)?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        wire::put32(out, self.offset)?;
        wire::put32(out, self.size)?;
        out.extend_from_slice(&self.name);
        wire::put16(out, self.flags)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fmap {
    /// Offset of the table in the buffer it was found in.
    pub position: usize,
    pub ver_major: u8,
    pub ver_minor: u8,
    pub base: u64,
    pub size: u32,
    pub name: [u8; FMAP_NAMELEN],
    pub areas: Vec<FmapArea>,
}

impl Fmap {
    /// Scan `buf` for an FMAP.
    ///
    /// Candidates with an unsupported major version or an area table
    /// running past the end of the buffer are skipped.
    pub fn find(buf: &[u8]) -> Option<Self> {
        let mut start = 0;
        while let Some(pos) = find_signature(&buf[start..]) {
            let position = start + pos;
            match Self::parse_at(buf, position) {
                Ok(fmap) => return Some(fmap),
                Err(e) => log::debug!("Ignoring FMAP candidate at {:#x}: {}", position, e),
            }
            start = position + 1;
        }
        None
    }

    /// Parse an FMAP located at `position` in `buf`.
    pub fn parse_at(buf: &[u8], position: usize) -> Result<Self, CodecError> {
        let data = buf.get(position..).ok_or(CodecError::Truncated)?;
        let mut reader = Reader::new(data);
        let signature: [u8; 8] = wire::get_array(&mut reader)?;
        if &signature != FMAP_SIGNATURE {
            return Err(CodecError::BadMagic);
        }
        let ver_major = wire::get8(&mut reader)?;
        if ver_major != FMAP_VER_MAJOR {
            return Err(CodecError::UnsupportedVersion(ver_major as u32));
        }
        let ver_minor = wire::get8(&mut reader)?;
        let base = wire::get64(&mut reader)?;
        let size = wire::get32(&mut reader)?;
        let name = wire::get_array(&mut reader)?;
        let nareas = wire::get16(&mut reader)? as usize;

        let needed = FMAP_HEADER_SIZE + nareas * FMAP_AREA_SIZE;
        if needed > data.len() {
            return Err(CodecError::OutOfBounds {
                needed,
                available: data.len(),
            });
        }
        let areas = (0..nareas)
            .map(|_| FmapArea::read(&mut reader))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Fmap {
            position,
            ver_major,
            ver_minor,
            base,
            size,
            name,
            areas,
        })
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(name_bytes(&self.name)).into_owned()
    }

    /// Look up an area by name. The first match wins.
    pub fn find_area(&self, name: &str) -> Option<FmapArea> {
        self.areas.iter().find(|a| a.name_matches(name)).copied()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        let nareas = u16::try_from(self.areas.len())
            .map_err(|_| CodecError::NonCanonical("FMAP area count"))?;
        let mut out = Vec::with_capacity(FMAP_HEADER_SIZE + self.areas.len() * FMAP_AREA_SIZE);
        out.extend_from_slice(FMAP_SIGNATURE);
        wire::put8(&mut out, self.ver_major)?;
        wire::put8(&mut out, self.ver_minor)?;
        wire::put64(&mut out, self.base)?;
        wire::put32(&mut out, self.size)?;
        out.extend_from_slice(&self.name);
        wire::put16(&mut out, nareas)?;
        for area in &self.areas {
            area.write(&mut out)?;
        }
        Ok(out)
    }
}

fn find_signature(buf: &[u8]) -> Option<usize> {
    buf.windows(FMAP_SIGNATURE.len())
        .position(|w| w == FMAP_SIGNATURE)
}

/// Builds FMAP tables.
#[derive(Clone, Debug, Default)]
pub struct FmapBuilder {
    name: String,
    base: u64,
    size: u32,
    areas: Vec<FmapArea>,
}

impl FmapBuilder {
    pub fn new(name: &str, size: u32) -> Self {
        FmapBuilder {
            name: name.to_string(),
            size,
            ..Default::default()
        }
    }

    pub fn base(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    pub fn area(mut self, name: &str, offset: u32, size: u32) -> Self {
        self.areas.push(FmapArea::new(name, offset, size));
        self
    }

    pub fn area_with_flags(mut self, name: &str, offset: u32, size: u32, flags: u16) -> Self {
        let mut area = FmapArea::new(name, offset, size);
        area.flags = flags;
        self.areas.push(area);
        self
    }

    pub fn build(self) -> Fmap {
        Fmap {
            position: 0,
            ver_major: FMAP_VER_MAJOR,
            ver_minor: FMAP_VER_MINOR,
            base: self.base,
            size: self.size,
            name: pack_name(&self.name),
            areas: self.areas,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageKind {
    Bios,
    Kernel,
    /// RW image checked by a single signature, with or without an FMAP.
    RwSig,
    Unknown,
}

/// Guess the container type of an image.
pub fn recognize(buf: &[u8]) -> ImageKind {
    if buf.starts_with(KERNEL_MAGIC) {
        return ImageKind::Kernel;
    }
    if let Some(fmap) = Fmap::find(buf) {
        let required = ["GBB", "FW_MAIN_A", "VBLOCK_A"];
        if required.iter().all(|name| fmap.find_area(name).is_some()) {
            return ImageKind::Bios;
        }
        if [SIG_RW, EC_RW].iter().all(|name| fmap.find_area(name).is_some()) {
            return ImageKind::RwSig;
        }
        return ImageKind::Unknown;
    }
    if has_trailing_signature(buf) {
        return ImageKind::RwSig;
    }
    ImageKind::Unknown
}

fn has_trailing_signature(buf: &[u8]) -> bool {
    let Some(data_len) = buf.len().checked_sub(RWSIG_DEFAULT_SIZE) else {
        return false;
    };
    Signature::parse(&buf[data_len..]).is_ok_and(|sig| {
        sig.kind == SignatureKind::Classical
            && !sig.sig_data.is_empty()
            && sig.data_size as usize <= data_len
    })
}
