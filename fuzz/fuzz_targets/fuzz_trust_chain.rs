//! Fuzz target for keyblock and preamble parsing
//!
//! Parsing is canonical: anything that parses must encode back to exactly
//! the bytes it was read from.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vbsign::{Keyblock, Preamble, TrustChain};

fuzz_target!(|data: &[u8]| {
    if let Ok(keyblock) = Keyblock::parse(data) {
        let bytes = keyblock.to_bytes().expect("parsed keyblock encodes");
        assert_eq!(&bytes[..], &data[..keyblock.keyblock_size as usize]);
    }

    if let Ok(preamble) = Preamble::parse(data, 0) {
        let bytes = preamble.to_bytes().expect("parsed preamble encodes");
        assert_eq!(&bytes[..], &data[..preamble.preamble_size as usize]);
    }

    if let Ok(chain) = TrustChain::parse(data) {
        let bytes = chain.encode(data.len()).expect("parsed chain encodes");
        assert_eq!(&bytes[..], &data[..chain.encoded_len()]);
    }
});
