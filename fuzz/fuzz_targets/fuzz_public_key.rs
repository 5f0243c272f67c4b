//! Fuzz target for public key parsing
//!
//! Covers the packed key blob, DER and PEM forms, and format detection.
//! A packed key that parses must encode back to the same bytes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vbsign::{PackedPublicKey, PrivateKey, PublicKey};

fuzz_target!(|data: &[u8]| {
    if let Ok(packed) = PackedPublicKey::parse(data) {
        let bytes = packed.to_bytes();
        assert_eq!(&bytes[..], &data[..packed.byte_len()]);
    }

    if let Ok(pk) = PublicKey::from_bytes(data) {
        let bytes = pk.to_bytes();
        assert_eq!(PublicKey::from_bytes(&bytes).ok(), Some(pk));
    }

    if let Ok(pk) = PublicKey::from_der(data, 1) {
        let _ = pk.to_pem();
    }

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = PublicKey::from_pem(s, 1);
        let _ = PrivateKey::from_pem(s);
    }

    let _ = PublicKey::from_any(data);
    let _ = PrivateKey::from_bytes(data);
    let _ = PrivateKey::from_der(data);
});
