//! Fuzz target for FMAP discovery and firmware image verification
//!
//! Arbitrary bytes are searched for an FMAP, every area is clamped to the
//! buffer, and both slots are verified. None of this may panic, and an
//! image without a root key can never have a trusted slot.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vbsign::bios::BiosImage;
use vbsign::fmap::Fmap;
use vbsign::VerifyOptions;

fuzz_target!(|data: &[u8]| {
    if let Some(fmap) = Fmap::find(data) {
        for area in &fmap.areas {
            let clamped = area.clamp(data.len());
            assert!(clamped.offset as usize + clamped.size as usize <= data.len());
        }
        if let Ok(bytes) = fmap.serialize() {
            let _ = Fmap::parse_at(&bytes, 0);
        }
    }

    if let Ok(image) = BiosImage::parse(data) {
        let _ = image.gbb();
        let report = image.verify(VerifyOptions::default());
        if report.gbb.as_ref().is_none_or(|g| g.root_key.is_none()) {
            assert!(!report.a.is_trusted());
            assert!(!report.b.is_trusted());
        }
    }
});
