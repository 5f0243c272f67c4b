//! Slot signing.
//!
//! Signing rebuilds the preamble of each slot, and the keyblock too when a
//! fresh chain is requested, then writes the chain at the start of the
//! slot's trust chain area. Everything is computed before the first byte of
//! the image is touched, so a failing slot leaves the image unmodified.

use crate::crypto::{SigningKey, SoftwarePrimitives, TrustPrimitives};
use crate::error::*;
use crate::payload::{MetadataHash, PayloadFormat, RawPayload};
use crate::slot::{Area, ChainLayout, Slot, SlotId};
use crate::vblock::{Keyblock, KeyblockFlags, PackedPublicKey, Preamble, Signature, encode_chain};

use serde::{Deserialize, Serialize};

/// Where the keyblock of the new chains comes from.
pub enum ChainSource<'a> {
    /// Sign a new keyblock for `data_key` with `root_key`.
    Fresh {
        root_key: &'a dyn SigningKey,
        data_key: PackedPublicKey,
        flags: KeyblockFlags,
    },
    /// Reuse an existing, already signed keyblock.
    Reuse(&'a [u8]),
}

impl ChainSource<'_> {
    pub fn keyblock(&self) -> Result<Keyblock, VbError> {
        match self {
            ChainSource::Fresh {
                root_key,
                data_key,
                flags,
            } => Keyblock::create(data_key.clone(), *flags, *root_key),
            ChainSource::Reuse(bytes) => {
                Keyblock::parse(bytes).map_err(|e| PolicyError::InvalidReusedChain(e).into())
            }
        }
    }
}

/// Whether body integrity metadata is signed instead of the body.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityPolicy {
    /// Follow what the payload declares.
    #[default]
    Auto,
    /// Every present slot must carry integrity metadata.
    Required,
    Disabled,
}

/// Caller choices for signing.
#[derive(Clone, Debug, Default)]
pub struct SignOptions {
    /// Preamble version, inherited from the existing chain when unset.
    pub version: Option<u16>,
    /// Preamble flags, inherited from the existing chain when unset.
    pub flags: Option<u32>,
    /// Kernel subkey to embed in the preamble.
    pub kernel_subkey: Option<PackedPublicKey>,
    pub integrity: IntegrityPolicy,
    body_lens: [Option<usize>; 2],
}

impl SignOptions {
    pub fn with_version(mut self, version: u16) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn with_kernel_subkey(mut self, subkey: PackedPublicKey) -> Self {
        self.kernel_subkey = Some(subkey);
        self
    }

    pub fn with_integrity(mut self, integrity: IntegrityPolicy) -> Self {
        self.integrity = integrity;
        self
    }

    /// Sign exactly `len` bytes of the body of slot `id`.
    pub fn with_body_len(mut self, id: SlotId, len: usize) -> Self {
        self.body_lens[slot_index(id)] = Some(len);
        self
    }

    pub fn body_len(&self, id: SlotId) -> Option<usize> {
        self.body_lens[slot_index(id)]
    }
}

fn slot_index(id: SlotId) -> usize {
    match id {
        SlotId::A => 0,
        SlotId::B => 1,
    }
}

/// Version, flags and body length of a chain that was already in place.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExistingChain {
    pub version: u16,
    pub flags: u32,
    pub body_len: usize,
}

/// Look at the chain currently stored in a trust chain area.
///
/// The keyblock is not checked against any root key: only its checksum,
/// its data key, and the preamble signature made with that data key.
/// Problems are logged as warnings and yield `None`.
pub fn inspect_existing_chain(
    name: &str,
    chain_area: &[u8],
    body_area_len: usize,
    primitives: &dyn TrustPrimitives,
) -> Option<ExistingChain> {
    let keyblock = match Keyblock::parse(chain_area) {
        Ok(keyblock) => keyblock,
        Err(e) => {
            log::warn!("{} keyblock is invalid: {}", name, e);
            return None;
        }
    };
    if let Err(e) = primitives.check_key(&keyblock.data_key) {
        log::warn!("{} data key is invalid: {}", name, e);
        return None;
    }
    let preamble = match Preamble::parse(chain_area, keyblock.keyblock_size as usize) {
        Ok(preamble) => preamble,
        Err(e) => {
            log::warn!("{} preamble is invalid: {}", name, e);
            return None;
        }
    };
    if let Err(e) = preamble.verify_signature(&keyblock.data_key, primitives) {
        log::warn!("{} preamble is invalid: {}", name, e);
        return None;
    }
    if preamble.body_len() > body_area_len {
        log::warn!("{} says the body is larger than its area", name);
        return None;
    }
    Some(ExistingChain {
        version: preamble.version,
        flags: preamble.flags,
        body_len: preamble.body_len(),
    })
}

/// What was done to one slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignedSlot {
    pub id: SlotId,
    pub version: u16,
    pub flags: u32,
    pub body_len: usize,
    pub chain_len: usize,
    /// The metadata digest was signed rather than the body.
    pub digest_signed: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SignReport {
    pub slots: Vec<SignedSlot>,
    /// Trust chain areas after signing, for separate distribution.
    pub vblocks: Vec<(SlotId, Vec<u8>)>,
}

impl SignReport {
    pub fn slot(&self, id: SlotId) -> Option<&SignedSlot> {
        self.slots.iter().find(|s| s.id == id)
    }
}

/// Builds trust chains for slots with one keyblock and one data key.
pub struct SlotSigner<'a> {
    keyblock: Keyblock,
    data_key: &'a dyn SigningKey,
    options: SignOptions,
    primitives: &'a dyn TrustPrimitives,
    payload: &'a dyn PayloadFormat,
}

impl<'a> SlotSigner<'a> {
    /// The keyblock is built or parsed here, before any body is signed.
    pub fn new(
        source: ChainSource<'_>,
        data_key: &'a dyn SigningKey,
        options: SignOptions,
    ) -> Result<Self, VbError> {
        let keyblock = source.keyblock()?;
        let packed = &keyblock.data_key;
        if packed.algorithm != data_key.algorithm().to_raw()
            || packed.key_data != data_key.public_key_data()
        {
            return Err(PolicyError::KeyMismatch.into());
        }
        Ok(SlotSigner {
            keyblock,
            data_key,
            options,
            primitives: &SoftwarePrimitives,
            payload: &RawPayload,
        })
    }

    pub fn with_primitives(mut self, primitives: &'a dyn TrustPrimitives) -> Self {
        self.primitives = primitives;
        self
    }

    pub fn with_payload_format(mut self, payload: &'a dyn PayloadFormat) -> Self {
        self.payload = payload;
        self
    }

    pub fn keyblock(&self) -> &Keyblock {
        &self.keyblock
    }

    pub fn options(&self) -> &SignOptions {
        &self.options
    }

    /// Whether integrity mode applies to an image with these bodies.
    pub fn integrity_mode(&self, bodies: &[&[u8]]) -> bool {
        match self.options.integrity {
            IntegrityPolicy::Required => true,
            IntegrityPolicy::Disabled => false,
            IntegrityPolicy::Auto => bodies.iter().any(|b| self.payload.integrity_declared(b)),
        }
    }

    /// Decide version, flags and body length for a located slot.
    ///
    /// In integrity mode the signed range is the payload content, which must
    /// match the index it carries.
    pub fn prepare_slot(
        &self,
        image: &[u8],
        mut slot: Slot,
        names: (&str, &str),
        integrity: bool,
    ) -> Result<Slot, VbError> {
        let (body_name, chain_name) = names;
        log::debug!("Preparing areas: {} and {}", body_name, chain_name);
        let body = slot
            .body
            .slice(image)
            .ok_or_else(|| PolicyError::MissingArea(body_name.to_string()))?;
        let chain_area = slot
            .trust_chain
            .slice(image)
            .ok_or_else(|| PolicyError::MissingArea(chain_name.to_string()))?;

        let existing = inspect_existing_chain(chain_name, chain_area, body.len(), self.primitives);

        let too_large = |requested: usize| -> VbError {
            PolicyError::BodySizeExceedsArea {
                area: body_name.to_string(),
                requested,
                available: body.len(),
            }
            .into()
        };
        slot.body_len = if let Some(len) = self.options.body_len(slot.id) {
            if len > body.len() {
                return Err(too_large(len));
            }
            len
        } else if let Some(len) = self.payload.content_len(body) {
            log::debug!("Payload found in area {}, {:#x} bytes used", body_name, len);
            if len > body.len() {
                return Err(too_large(len));
            }
            len
        } else if integrity {
            body.len()
        } else if let Some(existing) = &existing {
            existing.body_len
        } else {
            log::warn!(
                "{} does not contain a self-describing payload. Trying to sign entire area.",
                body_name
            );
            body.len()
        };

        if integrity {
            let signed = &body[..slot.body_len];
            let hash = self
                .payload
                .metadata_hash(signed, self.primitives)
                .ok_or_else(|| PolicyError::MissingMetadata(body_name.to_string()))?;
            if !self.payload.content_matches(signed, self.primitives) {
                return Err(PolicyError::MetadataMismatch(body_name.to_string()).into());
            }
            log::debug!("Integrity metadata found in area {}", body_name);
            slot.metadata_hash = Some(hash);
        }

        slot.version = self
            .options
            .version
            .or(existing.map(|e| e.version))
            .unwrap_or(1);
        slot.flags = self.options.flags.or(existing.map(|e| e.flags)).unwrap_or(0);
        Ok(slot)
    }

    /// Build the signed chain for a prepared slot.
    pub fn build_chain(&self, image: &[u8], slot: &Slot) -> Result<Vec<u8>, VbError> {
        let body = slot
            .signed_body()
            .slice(image)
            .ok_or_else(|| VbError::InternalError("slot body out of range".to_string()))?;
        self.build_chain_for(
            body,
            slot.metadata_hash.as_ref(),
            slot.version,
            slot.flags,
            slot.trust_chain.len,
        )
    }

    /// Build a chain signing `body`, or the metadata digest when given.
    pub fn build_chain_for(
        &self,
        body: &[u8],
        metadata_hash: Option<&MetadataHash>,
        version: u16,
        flags: u32,
        capacity: usize,
    ) -> Result<Vec<u8>, VbError> {
        let data_size =
            u32::try_from(body.len()).map_err(|_| CodecError::NonCanonical("body length"))?;
        let body_signature = match metadata_hash {
            Some(hash) => Signature::from_metadata_hash(hash, data_size),
            None => Signature::classical(
                self.data_key.algorithm(),
                data_size,
                self.data_key.sign(body)?,
            ),
        };
        let preamble = Preamble::create(
            version,
            flags,
            body_signature,
            self.options.kernel_subkey.clone(),
            self.data_key,
        )?;
        Ok(encode_chain(&self.keyblock, &preamble, capacity)?)
    }

    /// Sign every slot of `layout` in `image`.
    ///
    /// The first slot is mandatory. Other slots are skipped with a notice
    /// when their body area is absent, but a slot whose body exists and
    /// cannot be prepared fails the whole operation.
    pub fn sign_layout(
        &self,
        image: &mut [u8],
        layout: &dyn ChainLayout,
    ) -> Result<SignReport, VbError> {
        let ids = layout.slot_ids();
        let mut located = Vec::new();
        for (i, &id) in ids.iter().enumerate() {
            let body_name = layout.area_name(id, true);
            let chain_name = layout.area_name(id, false);
            let body = layout.body_area(id).filter(|a| !a.is_empty());
            let chain = layout.trust_chain_area(id).filter(|a| !a.is_empty());
            match (body, chain) {
                (Some(body), Some(chain)) => located.push(Slot::new(id, body, chain)),
                (None, _) if i > 0 => {
                    log::info!(
                        "Image does not have {}. Signing only {}",
                        body_name,
                        layout.area_name(ids[0], true)
                    );
                }
                (None, _) => return Err(PolicyError::MissingArea(body_name).into()),
                (Some(_), None) => return Err(PolicyError::MissingArea(chain_name).into()),
            }
        }

        let bodies: Vec<&[u8]> = located
            .iter()
            .filter_map(|s| s.body.slice(&*image))
            .collect();
        let integrity = self.integrity_mode(&bodies);

        let mut prepared = Vec::with_capacity(located.len());
        for slot in located {
            let names = (layout.area_name(slot.id, true), layout.area_name(slot.id, false));
            let slot = self
                .prepare_slot(&*image, slot, (&names.0, &names.1), integrity)
                .map_err(|e| e.in_area(&names.1))?;
            let chain = self
                .build_chain(&*image, &slot)
                .map_err(|e| e.in_area(&names.1))?;
            prepared.push((slot, chain));
        }

        let mut report = SignReport::default();
        for (slot, chain) in prepared {
            let area = Area::new(slot.trust_chain.offset, chain.len());
            let dest = area
                .slice_mut(image)
                .ok_or_else(|| VbError::InternalError("trust chain area out of range".to_string()))?;
            dest.copy_from_slice(&chain);
            log::info!(
                "Signed {} ({:#x} body bytes, version {}, flags {:#x})",
                layout.area_name(slot.id, false),
                slot.body_len,
                slot.version,
                slot.flags
            );
            report.slots.push(SignedSlot {
                id: slot.id,
                version: slot.version,
                flags: slot.flags,
                body_len: slot.body_len,
                chain_len: chain.len(),
                digest_signed: slot.metadata_hash.is_some(),
            });
            if let Some(area) = slot.trust_chain.slice(image) {
                report.vblocks.push((slot.id, area.to_vec()));
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::payload::{IndexedPayload, PayloadFlags};
    use crate::verify::{UntrustedReason, Verifier};

    /// Two slots laid out back to back: chain A, body A, chain B, body B.
    struct TestLayout {
        chain_len: usize,
        body_len: usize,
        has_b: bool,
    }

    impl TestLayout {
        fn image_len(&self) -> usize {
            2 * (self.chain_len + self.body_len)
        }
    }

    impl ChainLayout for TestLayout {
        fn slot_ids(&self) -> &'static [SlotId] {
            &SlotId::ALL
        }

        fn area_name(&self, id: SlotId, body: bool) -> String {
            if body {
                format!("BODY_{}", id.letter())
            } else {
                format!("CHAIN_{}", id.letter())
            }
        }

        fn trust_chain_area(&self, id: SlotId) -> Option<Area> {
            let stride = self.chain_len + self.body_len;
            match id {
                SlotId::A => Some(Area::new(0, self.chain_len)),
                SlotId::B if self.has_b => Some(Area::new(stride, self.chain_len)),
                SlotId::B => None,
            }
        }

        fn body_area(&self, id: SlotId) -> Option<Area> {
            let stride = self.chain_len + self.body_len;
            match id {
                SlotId::A => Some(Area::new(self.chain_len, self.body_len)),
                SlotId::B if self.has_b => Some(Area::new(stride + self.chain_len, self.body_len)),
                SlotId::B => None,
            }
        }
    }

    struct Keys {
        root: KeyPair,
        data: KeyPair,
    }

    fn keys() -> Keys {
        Keys {
            root: KeyPair::generate(1),
            data: KeyPair::generate(1),
        }
    }

    fn fresh<'a>(keys: &'a Keys) -> ChainSource<'a> {
        ChainSource::Fresh {
            root_key: &keys.root.sk,
            data_key: keys.data.pk.to_packed(),
            flags: KeyblockFlags::default(),
        }
    }

    fn verify_slot(image: &[u8], layout: &TestLayout, id: SlotId, keys: &Keys) -> crate::verify::SlotVerdict {
        let chain = layout.trust_chain_area(id).unwrap().slice(image).unwrap();
        let body = layout.body_area(id).unwrap().slice(image).unwrap();
        Verifier::default().verify_chain("test", &keys.root.pk.to_packed(), chain, body)
    }

    #[test]
    fn test_sign_layout_both_slots() {
        let keys = keys();
        let layout = TestLayout {
            chain_len: 0x200,
            body_len: 0x100,
            has_b: true,
        };
        let mut image = vec![0x11; layout.image_len()];
        let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default()).unwrap();
        let report = signer.sign_layout(&mut image, &layout).unwrap();

        assert_eq!(report.slots.len(), 2);
        assert_eq!(report.vblocks.len(), 2);
        assert_eq!(report.vblocks[0].1.len(), 0x200);
        let a = report.slot(SlotId::A).unwrap();
        assert_eq!((a.version, a.flags, a.body_len), (1, 0, 0x100));
        assert!(verify_slot(&image, &layout, SlotId::A, &keys).is_trusted());
        assert!(verify_slot(&image, &layout, SlotId::B, &keys).is_trusted());
    }

    #[test]
    fn test_resign_inherits_version_and_length() {
        let keys = keys();
        let layout = TestLayout {
            chain_len: 0x200,
            body_len: 0x100,
            has_b: false,
        };
        let mut image = vec![0x22; layout.image_len()];
        let options = SignOptions::default()
            .with_version(7)
            .with_flags(0x3)
            .with_body_len(SlotId::A, 0x80);
        let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, options).unwrap();
        signer.sign_layout(&mut image, &layout).unwrap();

        let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default()).unwrap();
        let report = signer.sign_layout(&mut image, &layout).unwrap();
        let a = report.slot(SlotId::A).unwrap();
        assert_eq!((a.version, a.flags, a.body_len), (7, 0x3, 0x80));
    }

    #[test]
    fn test_malformed_existing_chain_uses_defaults() {
        let keys = keys();
        let layout = TestLayout {
            chain_len: 0x200,
            body_len: 0x100,
            has_b: false,
        };
        let mut image = vec![0xFF; layout.image_len()];
        let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default()).unwrap();
        let report = signer.sign_layout(&mut image, &layout).unwrap();
        let a = report.slot(SlotId::A).unwrap();
        assert_eq!((a.version, a.flags, a.body_len), (1, 0, 0x100));
    }

    #[test]
    fn test_explicit_length_larger_than_area() {
        let keys = keys();
        let layout = TestLayout {
            chain_len: 0x200,
            body_len: 0x100,
            has_b: false,
        };
        let mut image = vec![0x33; layout.image_len()];
        let original = image.clone();
        let options = SignOptions::default().with_body_len(SlotId::A, 0x101);
        let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, options).unwrap();
        let err = signer.sign_layout(&mut image, &layout).unwrap_err();
        match err {
            VbError::InArea { area, source } => {
                assert_eq!(area, "CHAIN_A");
                assert!(matches!(
                    *source,
                    VbError::Policy(PolicyError::BodySizeExceedsArea { .. })
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(image, original);
    }

    #[test]
    fn test_payload_length_bounds_signature() {
        let keys = keys();
        let layout = TestLayout {
            chain_len: 0x200,
            body_len: 0x100,
            has_b: false,
        };
        let mut image = vec![0xFF; layout.image_len()];
        let payload = IndexedPayload::build(b"firmware", PayloadFlags::empty()).unwrap();
        image[0x200..0x200 + payload.len()].copy_from_slice(&payload);

        let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default())
            .unwrap()
            .with_payload_format(&IndexedPayload);
        let report = signer.sign_layout(&mut image, &layout).unwrap();
        assert_eq!(report.slot(SlotId::A).unwrap().body_len, payload.len());

        // Bytes past the payload are not covered.
        image[0x2F0] ^= 1;
        assert!(verify_slot(&image, &layout, SlotId::A, &keys).is_trusted());
    }

    #[test]
    fn test_integrity_required_without_metadata() {
        let keys = keys();
        let layout = TestLayout {
            chain_len: 0x200,
            body_len: 0x100,
            has_b: false,
        };
        let mut image = vec![0x44; layout.image_len()];
        let original = image.clone();
        let options = SignOptions::default().with_integrity(IntegrityPolicy::Required);
        let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, options)
            .unwrap()
            .with_payload_format(&IndexedPayload);
        let err = signer.sign_layout(&mut image, &layout).unwrap_err();
        let VbError::InArea { source, .. } = err else {
            panic!("expected area context");
        };
        assert!(matches!(
            *source,
            VbError::Policy(PolicyError::MissingMetadata(ref area)) if area == "BODY_A"
        ));
        assert_eq!(image, original);
    }

    #[test]
    fn test_integrity_auto_signs_digest() {
        let keys = keys();
        let layout = TestLayout {
            chain_len: 0x200,
            body_len: 0x100,
            has_b: false,
        };
        let mut image = vec![0xFF; layout.image_len()];
        let payload = IndexedPayload::build(b"firmware", PayloadFlags::INTEGRITY).unwrap();
        image[0x200..0x200 + payload.len()].copy_from_slice(&payload);

        let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default())
            .unwrap()
            .with_payload_format(&IndexedPayload);
        let report = signer.sign_layout(&mut image, &layout).unwrap();
        let a = report.slot(SlotId::A).unwrap();
        assert!(a.digest_signed);
        assert_eq!(a.body_len, payload.len());

        let chain = layout.trust_chain_area(SlotId::A).unwrap().slice(&image).unwrap();
        let body = layout.body_area(SlotId::A).unwrap().slice(&image).unwrap();
        let verifier = Verifier::default().with_payload_format(&IndexedPayload);
        assert!(
            verifier
                .verify_chain("A", &keys.root.pk.to_packed(), chain, body)
                .is_trusted()
        );
    }

    #[test]
    fn test_integrity_content_mismatch_is_fatal() {
        let keys = keys();
        let layout = TestLayout {
            chain_len: 0x200,
            body_len: 0x100,
            has_b: false,
        };
        let mut image = vec![0xFF; layout.image_len()];
        let payload = IndexedPayload::build(b"firmware", PayloadFlags::INTEGRITY).unwrap();
        image[0x200..0x200 + payload.len()].copy_from_slice(&payload);
        image[0x200 + payload.len() - 1] ^= 1;
        let original = image.clone();

        let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default())
            .unwrap()
            .with_payload_format(&IndexedPayload);
        let err = signer.sign_layout(&mut image, &layout).unwrap_err();
        let VbError::InArea { source, .. } = err else {
            panic!("expected area context");
        };
        assert!(matches!(
            *source,
            VbError::Policy(PolicyError::MetadataMismatch(ref area)) if area == "BODY_A"
        ));
        assert_eq!(image, original);
    }

    #[test]
    fn test_reused_keyblock_bad_checksum() {
        let keys = keys();
        let keyblock =
            Keyblock::create(keys.data.pk.to_packed(), KeyblockFlags::default(), &keys.root.sk).unwrap();
        let mut bytes = keyblock.to_bytes().unwrap();
        bytes[40] ^= 1;
        let result = SlotSigner::new(ChainSource::Reuse(&bytes), &keys.data.sk, SignOptions::default());
        assert!(matches!(
            result,
            Err(VbError::Policy(PolicyError::InvalidReusedChain(
                CodecError::ChecksumMismatch
            )))
        ));
    }

    #[test]
    fn test_reused_keyblock_key_mismatch() {
        let keys = keys();
        let other = KeyPair::generate(1);
        let keyblock =
            Keyblock::create(keys.data.pk.to_packed(), KeyblockFlags::default(), &keys.root.sk).unwrap();
        let bytes = keyblock.to_bytes().unwrap();
        let result = SlotSigner::new(ChainSource::Reuse(&bytes), &other.sk, SignOptions::default());
        assert!(matches!(
            result,
            Err(VbError::Policy(PolicyError::KeyMismatch))
        ));
    }

    #[test]
    fn test_chain_area_too_small_leaves_image() {
        let keys = keys();
        let layout = TestLayout {
            chain_len: 340,
            body_len: 0x100,
            has_b: true,
        };
        let mut image = vec![0x55; layout.image_len()];
        let original = image.clone();
        let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default()).unwrap();
        let err = signer.sign_layout(&mut image, &layout).unwrap_err();
        let VbError::InArea { source, .. } = err else {
            panic!("expected area context");
        };
        assert!(matches!(
            *source,
            VbError::Codec(CodecError::AreaTooSmall {
                needed: 344,
                available: 340
            })
        ));
        assert_eq!(image, original);
    }

    #[test]
    fn test_build_chain_wrong_body_not_trusted() {
        let keys = keys();
        let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default()).unwrap();
        let chain = signer.build_chain_for(b"body", None, 1, 0, 0x200).unwrap();
        let verdict =
            Verifier::default().verify_chain("t", &keys.root.pk.to_packed(), &chain, b"bodY");
        assert_eq!(verdict.reason(), Some(UntrustedReason::BodySignatureInvalid));
    }
}
