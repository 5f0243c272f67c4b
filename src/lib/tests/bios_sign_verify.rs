//! Signing and verifying complete firmware images.
//!
//! Images are laid out with an FMAP at offset 0, a GBB holding the root
//! key, and up to two slots.

use vbsign::bios::{BiosComponent, BiosImage};
use vbsign::fmap::FmapBuilder;
use vbsign::gbb::GbbBuilder;
use vbsign::payload::PayloadFlags;
use vbsign::{
    ChainSource, CodecError, IndexedPayload, KeyPair, Keyblock, KeyblockFlags, PolicyError,
    SignOptions, SlotId, SlotSigner, TrustChain, UntrustedReason, VbError, VerifyOptions,
    sign_bios, verify_bios,
};

const IMAGE_LEN: usize = 0x4000;

const GBB: (u32, u32) = (0x400, 0x400);
const VBLOCK_A: (u32, u32) = (0x800, 0x200);
const VBLOCK_B: (u32, u32) = (0xA00, 0x200);
const FW_MAIN_A: (u32, u32) = (0x1000, 0x1000);
const FW_MAIN_B: (u32, u32) = (0x2000, 0x1000);

struct Keys {
    root: KeyPair,
    data: KeyPair,
}

fn keys() -> Keys {
    Keys {
        root: KeyPair::generate(1),
        data: KeyPair::generate(2),
    }
}

fn fresh(keys: &Keys) -> ChainSource<'_> {
    ChainSource::Fresh {
        root_key: &keys.root.sk,
        data_key: keys.data.pk.to_packed(),
        flags: KeyblockFlags::default(),
    }
}

fn range((offset, size): (u32, u32)) -> std::ops::Range<usize> {
    offset as usize..(offset + size) as usize
}

/// Build an image with the given areas besides FMAP and GBB.
fn build_image(keys: &Keys, areas: &[(&str, (u32, u32))]) -> Vec<u8> {
    let mut builder = FmapBuilder::new("FLASH", IMAGE_LEN as u32)
        .area("FMAP", 0, 0x400)
        .area("GBB", GBB.0, GBB.1);
    for &(name, (offset, size)) in areas {
        builder = builder.area(name, offset, size);
    }
    let fmap = builder.build().serialize().unwrap();

    let mut image = vec![0xFF; IMAGE_LEN];
    image[..fmap.len()].copy_from_slice(&fmap);
    let gbb = GbbBuilder::new("TEST BOARD A1B-C2D")
        .root_key(keys.root.pk.to_packed())
        .build(GBB.1 as usize)
        .unwrap();
    image[range(GBB)].copy_from_slice(&gbb);

    for (i, b) in image[range(FW_MAIN_A)].iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    for (i, b) in image[range(FW_MAIN_B)].iter_mut().enumerate() {
        *b = (i % 241) as u8;
    }
    image
}

fn dual_slot_image(keys: &Keys) -> Vec<u8> {
    build_image(
        keys,
        &[
            ("VBLOCK_A", VBLOCK_A),
            ("VBLOCK_B", VBLOCK_B),
            ("FW_MAIN_A", FW_MAIN_A),
            ("FW_MAIN_B", FW_MAIN_B),
        ],
    )
}

#[test]
fn test_sign_and_verify_both_slots() {
    let keys = keys();
    let mut image = dual_slot_image(&keys);
    let signer = SlotSigner::new(
        fresh(&keys),
        &keys.data.sk,
        SignOptions::default().with_version(3),
    )
    .unwrap();

    let report = sign_bios(&mut image, &signer).unwrap();
    assert_eq!(report.slots.len(), 2);
    assert_eq!(report.slot(SlotId::A).unwrap().chain_len, 344);
    assert_eq!(report.vblocks.len(), 2);
    assert_eq!(report.vblocks[0].1.len(), VBLOCK_A.1 as usize);

    let result = verify_bios(&image, VerifyOptions::default()).unwrap();
    assert!(result.is_success());
    let gbb = result.gbb.as_ref().unwrap();
    assert_eq!(gbb.hwid, "TEST BOARD A1B-C2D");
    for id in SlotId::ALL {
        let slot = result.slot(id).trusted().unwrap();
        assert_eq!(slot.version, 3);
        assert_eq!(slot.key_version, 2);
        assert_eq!(slot.combined_version(), (2 << 16) | 3);
        assert_eq!(slot.body_len, 0x1000);
    }
}

#[test]
fn test_resign_keeps_existing_version() {
    let keys = keys();
    let mut image = dual_slot_image(&keys);
    let first = SlotSigner::new(
        fresh(&keys),
        &keys.data.sk,
        SignOptions::default()
            .with_version(7)
            .with_body_len(SlotId::A, 0x800),
    )
    .unwrap();
    sign_bios(&mut image, &first).unwrap();

    let second = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default()).unwrap();
    let report = sign_bios(&mut image, &second).unwrap();
    let a = report.slot(SlotId::A).unwrap();
    assert_eq!(a.version, 7);
    assert_eq!(a.body_len, 0x800);

    let result = verify_bios(&image, VerifyOptions::default()).unwrap();
    assert_eq!(result.a.trusted().unwrap().body_len, 0x800);
    assert!(result.b.is_trusted());
}

#[test]
fn test_single_slot_image() {
    let keys = keys();
    let mut image = build_image(&keys, &[("VBLOCK_A", VBLOCK_A), ("FW_MAIN_A", FW_MAIN_A)]);
    let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default()).unwrap();

    let report = sign_bios(&mut image, &signer).unwrap();
    assert_eq!(report.slots.len(), 1);
    assert!(report.slot(SlotId::B).is_none());

    let result = verify_bios(&image, VerifyOptions::default()).unwrap();
    assert!(result.a.is_trusted());
    assert!(result.b.is_missing());
    assert!(result.is_success());
}

#[test]
fn test_bit_flip_is_never_trusted() {
    let keys = keys();
    let mut image = dual_slot_image(&keys);
    let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default()).unwrap();
    sign_bios(&mut image, &signer).unwrap();

    let chain_start = VBLOCK_A.0 as usize;
    let body_start = FW_MAIN_A.0 as usize;
    let offsets = (chain_start..chain_start + 344)
        .chain([body_start, body_start + 0x7FF, body_start + 0xFFF]);
    for offset in offsets {
        let mut tampered = image.clone();
        tampered[offset] ^= 0x01;
        let result = verify_bios(&tampered, VerifyOptions::default()).unwrap();
        assert!(
            !result.a.is_trusted(),
            "flipping byte {:#x} kept slot A trusted",
            offset
        );
        assert!(result.b.is_trusted());
    }
}

#[test]
fn test_wrong_root_key_is_rejected() {
    let keys = keys();
    let mut image = dual_slot_image(&keys);
    let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default()).unwrap();
    sign_bios(&mut image, &signer).unwrap();

    let other = KeyPair::generate(1);
    let options = VerifyOptions::default().with_root_key(other.pk.to_packed());
    let result = verify_bios(&image, options).unwrap();
    assert_eq!(result.a.reason(), Some(UntrustedReason::KeyblockSignatureInvalid));
    assert!(!result.is_success());
}

#[test]
fn test_rollback_is_rejected() {
    let keys = keys();
    let mut image = dual_slot_image(&keys);
    let signer = SlotSigner::new(
        fresh(&keys),
        &keys.data.sk,
        SignOptions::default().with_version(1),
    )
    .unwrap();
    sign_bios(&mut image, &signer).unwrap();

    let options = VerifyOptions::default().with_min_version((2 << 16) | 2);
    let result = verify_bios(&image, options).unwrap();
    assert_eq!(result.a.reason(), Some(UntrustedReason::RollbackRejected));
}

#[test]
fn test_chain_area_too_small_leaves_image_unchanged() {
    let keys = keys();
    let mut image = build_image(
        &keys,
        &[
            ("VBLOCK_A", VBLOCK_A),
            ("VBLOCK_B", (VBLOCK_B.0, 340)),
            ("FW_MAIN_A", FW_MAIN_A),
            ("FW_MAIN_B", FW_MAIN_B),
        ],
    );
    let original = image.clone();
    let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default()).unwrap();

    let err = sign_bios(&mut image, &signer).unwrap_err();
    match err {
        VbError::InArea { area, source } => {
            assert_eq!(area, "VBLOCK_B");
            assert!(matches!(
                *source,
                VbError::Codec(CodecError::AreaTooSmall {
                    needed: 344,
                    available: 340
                })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(image, original);
}

#[test]
fn test_reused_keyblock() {
    let keys = keys();
    let mut image = dual_slot_image(&keys);
    let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default()).unwrap();
    sign_bios(&mut image, &signer).unwrap();

    let chain_area = &image[range(VBLOCK_A)];
    let keyblock = Keyblock::parse(chain_area).unwrap();
    let keyblock_bytes = chain_area[..keyblock.keyblock_size as usize].to_vec();

    let mut other = dual_slot_image(&keys);
    let signer = SlotSigner::new(
        ChainSource::Reuse(&keyblock_bytes),
        &keys.data.sk,
        SignOptions::default().with_version(5),
    )
    .unwrap();
    sign_bios(&mut other, &signer).unwrap();
    let result = verify_bios(&other, VerifyOptions::default()).unwrap();
    assert!(result.is_success());
    assert_eq!(result.b.trusted().unwrap().version, 5);

    let mut corrupted = keyblock_bytes.clone();
    corrupted[70] ^= 0x80;
    let result = SlotSigner::new(
        ChainSource::Reuse(&corrupted),
        &keys.data.sk,
        SignOptions::default(),
    );
    assert!(matches!(
        result,
        Err(VbError::Policy(PolicyError::InvalidReusedChain(
            CodecError::ChecksumMismatch
        )))
    ));
}

#[test]
fn test_areas_past_the_image_are_clamped() {
    let keys = keys();
    let mut image = build_image(
        &keys,
        &[
            ("VBLOCK_A", VBLOCK_A),
            ("VBLOCK_B", VBLOCK_B),
            ("FW_MAIN_A", FW_MAIN_A),
            ("FW_MAIN_B", (0x3000, 0x2000)),
        ],
    );
    let bios = BiosImage::parse(image.as_slice()).unwrap();
    assert!(bios.layout().area(BiosComponent::FwMainB).unwrap().is_empty());

    let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default()).unwrap();
    let report = sign_bios(&mut image, &signer).unwrap();
    assert_eq!(report.slots.len(), 1);

    let result = verify_bios(&image, VerifyOptions::default()).unwrap();
    assert!(result.a.is_trusted());
    assert!(result.b.is_missing());
}

#[test]
fn test_integrity_metadata_is_signed() {
    let keys = keys();
    let mut image = dual_slot_image(&keys);
    for area in [FW_MAIN_A, FW_MAIN_B] {
        let body = IndexedPayload::build(&[0x22; 0x200], PayloadFlags::INTEGRITY).unwrap();
        image[range(area)][..body.len()].copy_from_slice(&body);
    }
    let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default())
        .unwrap()
        .with_payload_format(&IndexedPayload);

    let report = sign_bios(&mut image, &signer).unwrap();
    assert!(report.slots.iter().all(|s| s.digest_signed));

    let bios = BiosImage::parse(image.as_slice()).unwrap();
    let result = bios.verify_with(VerifyOptions::default(), &IndexedPayload);
    assert!(result.is_success());

    let chain = TrustChain::parse(bios.area_bytes(BiosComponent::VblockA).unwrap()).unwrap();
    assert_eq!(chain.preamble.body_signature.sig_data.len(), 32);

    let body_len = result.a.trusted().unwrap().body_len;
    assert!(report.slots.iter().all(|s| s.body_len == body_len));

    let verify_flipped = |offset: usize| {
        let mut tampered = image.clone();
        tampered[FW_MAIN_A.0 as usize + offset] ^= 0x01;
        BiosImage::parse(tampered.as_slice())
            .unwrap()
            .verify_with(VerifyOptions::default(), &IndexedPayload)
            .a
    };
    // Index, first content byte, last content byte.
    for offset in [20, body_len - 0x200, body_len - 1] {
        assert_eq!(
            verify_flipped(offset).reason(),
            Some(UntrustedReason::BodySignatureInvalid),
            "offset {offset:#x}"
        );
    }
    // Padding after the payload is outside the signed range.
    assert!(verify_flipped(body_len).is_trusted());
}

#[test]
fn test_integrity_missing_metadata_is_fatal() {
    let keys = keys();
    let mut image = dual_slot_image(&keys);
    let body = IndexedPayload::build(&[0x22; 0x200], PayloadFlags::INTEGRITY).unwrap();
    image[range(FW_MAIN_A)][..body.len()].copy_from_slice(&body);
    let original = image.clone();

    let signer = SlotSigner::new(fresh(&keys), &keys.data.sk, SignOptions::default())
        .unwrap()
        .with_payload_format(&IndexedPayload);
    let err = sign_bios(&mut image, &signer).unwrap_err();
    match err {
        VbError::InArea { area, source } => {
            assert_eq!(area, "VBLOCK_B");
            assert!(matches!(
                *source,
                VbError::Policy(PolicyError::MissingMetadata(_))
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(image, original);
}
