//! Firmware images located through an FMAP.
//!
//! Five areas matter: the GBB holding the root key, and two slots each made
//! of a firmware body (`FW_MAIN_x`) and its trust chain (`VBLOCK_x`).

use crate::error::*;
use crate::fmap::Fmap;
use crate::gbb::Gbb;
use crate::payload::{PayloadFormat, RawPayload};
use crate::sign::{SignReport, SlotSigner};
use crate::slot::{Area, ChainLayout, SlotId};
use crate::vblock::PackedPublicKey;
use crate::verify::{SlotVerdict, Stage, UntrustedReason, Verifier, VerifyOptions};

use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AreaKind {
    Gbb,
    FirmwareBody,
    TrustChain,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BiosComponent {
    Gbb,
    FwMainA,
    FwMainB,
    VblockA,
    VblockB,
}

impl BiosComponent {
    /// Evaluation order: bodies are looked at before the chains signing them.
    pub const ALL: [BiosComponent; 5] = [
        BiosComponent::Gbb,
        BiosComponent::FwMainA,
        BiosComponent::FwMainB,
        BiosComponent::VblockA,
        BiosComponent::VblockB,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BiosComponent::Gbb => "GBB",
            BiosComponent::FwMainA => "FW_MAIN_A",
            BiosComponent::FwMainB => "FW_MAIN_B",
            BiosComponent::VblockA => "VBLOCK_A",
            BiosComponent::VblockB => "VBLOCK_B",
        }
    }

    pub fn kind(self) -> AreaKind {
        match self {
            BiosComponent::Gbb => AreaKind::Gbb,
            BiosComponent::FwMainA | BiosComponent::FwMainB => AreaKind::FirmwareBody,
            BiosComponent::VblockA | BiosComponent::VblockB => AreaKind::TrustChain,
        }
    }

    pub fn slot(self) -> Option<SlotId> {
        match self {
            BiosComponent::Gbb => None,
            BiosComponent::FwMainA | BiosComponent::VblockA => Some(SlotId::A),
            BiosComponent::FwMainB | BiosComponent::VblockB => Some(SlotId::B),
        }
    }

    pub fn body(id: SlotId) -> Self {
        match id {
            SlotId::A => BiosComponent::FwMainA,
            SlotId::B => BiosComponent::FwMainB,
        }
    }

    pub fn vblock(id: SlotId) -> Self {
        match id {
            SlotId::A => BiosComponent::VblockA,
            SlotId::B => BiosComponent::VblockB,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BiosComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Areas of the firmware components, clamped to the image.
///
/// An area that is missing from the FMAP is `None`; one that does not fit
/// in the image is an empty area.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BiosLayout {
    areas: [Option<Area>; 5],
}

impl BiosLayout {
    pub fn from_image(buf: &[u8]) -> Result<Self, VbError> {
        let fmap = Fmap::find(buf).ok_or(VbError::UnsupportedImage)?;
        Ok(Self::from_fmap(&fmap, buf.len()))
    }

    pub fn from_fmap(fmap: &Fmap, image_len: usize) -> Self {
        let mut areas = [None; 5];
        for component in BiosComponent::ALL {
            areas[component.index()] = fmap
                .find_area(component.name())
                .map(|a| Area::from(a.clamp(image_len)));
        }
        BiosLayout { areas }
    }

    pub fn area(&self, component: BiosComponent) -> Option<Area> {
        self.areas[component.index()]
    }
}

impl ChainLayout for BiosLayout {
    fn slot_ids(&self) -> &'static [SlotId] {
        &SlotId::ALL
    }

    fn area_name(&self, id: SlotId, body: bool) -> String {
        let component = if body {
            BiosComponent::body(id)
        } else {
            BiosComponent::vblock(id)
        };
        component.name().to_string()
    }

    fn trust_chain_area(&self, id: SlotId) -> Option<Area> {
        self.area(BiosComponent::vblock(id))
    }

    fn body_area(&self, id: SlotId) -> Option<Area> {
        self.area(BiosComponent::body(id))
    }
}

/// What the GBB area holds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GbbSummary {
    pub area: Area,
    pub hwid: String,
    pub flags: u32,
    pub root_key: Option<PackedPublicKey>,
    pub recovery_key: Option<PackedPublicKey>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BiosVerifyReport {
    pub gbb: Option<GbbSummary>,
    pub a: SlotVerdict,
    pub b: SlotVerdict,
}

impl BiosVerifyReport {
    pub fn slot(&self, id: SlotId) -> &SlotVerdict {
        match id {
            SlotId::A => &self.a,
            SlotId::B => &self.b,
        }
    }

    /// Slot A is trusted and slot B is trusted or absent.
    pub fn is_success(&self) -> bool {
        self.a.is_trusted() && (self.b.is_trusted() || self.b.is_missing())
    }
}

/// A firmware image buffer with its layout.
pub struct BiosImage<B> {
    buf: B,
    layout: BiosLayout,
}

impl<B: AsRef<[u8]>> BiosImage<B> {
    pub fn parse(buf: B) -> Result<Self, VbError> {
        let layout = BiosLayout::from_image(buf.as_ref())?;
        Ok(BiosImage { buf, layout })
    }

    pub fn layout(&self) -> &BiosLayout {
        &self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    pub fn area_bytes(&self, component: BiosComponent) -> Option<&[u8]> {
        self.layout.area(component)?.slice(self.buf.as_ref())
    }

    pub fn gbb(&self) -> Result<GbbSummary, VbError> {
        let area = self
            .layout
            .area(BiosComponent::Gbb)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| PolicyError::MissingArea(BiosComponent::Gbb.name().to_string()))?;
        let bytes = area
            .slice(self.buf.as_ref())
            .ok_or_else(|| PolicyError::MissingArea(BiosComponent::Gbb.name().to_string()))?;
        let gbb = Gbb::parse(bytes)?;
        let root_key = gbb
            .root_key()
            .map_err(|e| log::warn!("GBB root key is invalid: {}", e))
            .ok();
        let recovery_key = gbb
            .recovery_key()
            .map_err(|e| log::warn!("GBB recovery key is invalid: {}", e))
            .ok();
        Ok(GbbSummary {
            area,
            hwid: gbb.hwid(),
            flags: gbb.header.flags,
            root_key,
            recovery_key,
        })
    }

    /// Verify both slots with the default payload format.
    pub fn verify(&self, options: VerifyOptions) -> BiosVerifyReport {
        self.verify_with(options, &RawPayload)
    }

    pub fn verify_with(&self, options: VerifyOptions, payload: &dyn PayloadFormat) -> BiosVerifyReport {
        let buf = self.buf.as_ref();
        let mut gbb = None;
        let mut root_key = options.root_key.clone();
        let mut bodies: [Option<&[u8]>; 2] = [None, None];
        let mut verdicts = [SlotVerdict::missing(), SlotVerdict::missing()];
        let verifier = Verifier::new(options).with_payload_format(payload);

        for component in BiosComponent::ALL {
            let Some(area) = self.layout.area(component) else {
                log::debug!("{} area not found", component);
                continue;
            };
            let bytes = area.slice(buf).filter(|b| !b.is_empty());
            match component.kind() {
                AreaKind::Gbb => match self.gbb() {
                    Ok(summary) => {
                        if root_key.is_none() {
                            root_key = summary.root_key.clone();
                        }
                        gbb = Some(summary);
                    }
                    Err(e) => log::warn!("GBB is invalid: {}", e),
                },
                AreaKind::FirmwareBody => {
                    if let Some(id) = component.slot() {
                        bodies[id as usize] = bytes;
                    }
                }
                AreaKind::TrustChain => {
                    let Some(id) = component.slot() else {
                        continue;
                    };
                    let (Some(chain), Some(body)) = (bytes, bodies[id as usize]) else {
                        log::warn!("{}: {} (reached: {})", component, UntrustedReason::MissingArea, Stage::Start);
                        continue;
                    };
                    verdicts[id as usize] = match &root_key {
                        Some(key) => verifier.verify_chain(component.name(), key, chain, body),
                        None => {
                            log::warn!("{}: {}", component, UntrustedReason::RootKeyUnavailable);
                            SlotVerdict::Untrusted {
                                reason: UntrustedReason::RootKeyUnavailable,
                                stage: Stage::Start,
                            }
                        }
                    };
                }
            }
        }

        let [a, b] = verdicts;
        BiosVerifyReport { gbb, a, b }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BiosImage<B> {
    /// Re-sign the slots in place.
    pub fn sign(&mut self, signer: &SlotSigner<'_>) -> Result<SignReport, VbError> {
        signer.sign_layout(self.buf.as_mut(), &self.layout)
    }
}

/// Verify a firmware image.
pub fn verify_bios(buf: &[u8], options: VerifyOptions) -> Result<BiosVerifyReport, VbError> {
    Ok(BiosImage::parse(buf)?.verify(options))
}

/// Sign a firmware image in place.
pub fn sign_bios(buf: &mut [u8], signer: &SlotSigner<'_>) -> Result<SignReport, VbError> {
    BiosImage::parse(buf)?.sign(signer)
}
