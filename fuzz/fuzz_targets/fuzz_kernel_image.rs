//! Fuzz target for kernel image parsing and verification
//!
//! The first 44 bytes are used as a kernel subkey, the rest as the image.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vbsign::kernel::{KernelImage, verify_kernel};
use vbsign::{PackedPublicKey, VerifyOptions};

fuzz_target!(|data: &[u8]| {
    let Some((key, image)) = data.split_at_checked(44) else {
        return;
    };
    if let Ok(kernel) = KernelImage::parse(image) {
        let _ = kernel.vblock();
        let _ = kernel.keyblock_bytes();
        assert_eq!(kernel.body().len(), kernel.body_size as usize);
    }
    if let Ok(key) = PackedPublicKey::parse(key) {
        let _ = verify_kernel(image, &key, VerifyOptions::default());
    }
});
