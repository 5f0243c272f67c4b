//! Slots: a trust chain area paired with the body area it signs.

use crate::fmap::FmapArea;
use crate::payload::MetadataHash;
use std::fmt;
use std::ops::Range;

/// A non-owning view into an image buffer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Area {
    pub offset: usize,
    pub len: usize,
}

impl Area {
    pub fn new(offset: usize, len: usize) -> Self {
        Area { offset, len }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset.saturating_add(self.len)
    }

    /// Borrow the area from `buf`, `None` if it does not fit.
    pub fn slice<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
        buf.get(self.range())
    }

    pub fn slice_mut<'a>(&self, buf: &'a mut [u8]) -> Option<&'a mut [u8]> {
        buf.get_mut(self.range())
    }
}

impl From<FmapArea> for Area {
    fn from(area: FmapArea) -> Self {
        Area::new(area.offset as usize, area.size as usize)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    pub const ALL: [SlotId; 2] = [SlotId::A, SlotId::B];

    pub fn letter(self) -> &'static str {
        match self {
            SlotId::A => "A",
            SlotId::B => "B",
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.letter())
    }
}

/// Where a container keeps the trust chain and body of each slot.
pub trait ChainLayout {
    /// Slots the container can hold, in evaluation order.
    fn slot_ids(&self) -> &'static [SlotId];

    /// Display name of an area, used in logs and errors.
    fn area_name(&self, id: SlotId, body: bool) -> String;

    fn trust_chain_area(&self, id: SlotId) -> Option<Area>;

    fn body_area(&self, id: SlotId) -> Option<Area>;

    /// Both areas of a slot, if present and non-empty.
    fn locate(&self, id: SlotId) -> Option<Slot> {
        let trust_chain = self.trust_chain_area(id).filter(|a| !a.is_empty())?;
        let body = self.body_area(id).filter(|a| !a.is_empty())?;
        Some(Slot::new(id, body, trust_chain))
    }
}

/// A slot prepared for verification or signing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Slot {
    pub id: SlotId,
    pub body: Area,
    pub trust_chain: Area,
    pub version: u16,
    pub flags: u32,
    /// Number of body bytes covered by the body signature.
    pub body_len: usize,
    pub metadata_hash: Option<MetadataHash>,
}

impl Slot {
    pub fn new(id: SlotId, body: Area, trust_chain: Area) -> Self {
        Slot {
            id,
            body,
            trust_chain,
            version: 1,
            flags: 0,
            body_len: body.len,
            metadata_hash: None,
        }
    }

    /// The signed part of the body.
    pub fn signed_body(&self) -> Area {
        Area::new(self.body.offset, self.body_len.min(self.body.len))
    }
}
