//! Fuzz target for RW image verification
//!
//! Arbitrary bytes are laid out as an RW image, with or without an FMAP,
//! and verified with the key they may carry. A trusted verdict never
//! claims more signed bytes than the RW data area holds.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vbsign::rwsig::{RWSIG_DEFAULT_SIZE, RwSigImage};
use vbsign::RwSigVerdict;

fuzz_target!(|data: &[u8]| {
    for sig_size in [RWSIG_DEFAULT_SIZE, 0x80] {
        let Ok(image) = RwSigImage::parse(data, sig_size) else {
            continue;
        };
        let layout = *image.layout();
        assert!(layout.data.range().end <= data.len());
        let _ = image.signature();
        if let RwSigVerdict::Trusted { data_size, .. } = image.verify(None) {
            assert!(data_size <= layout.data.len);
        }
    }
});
