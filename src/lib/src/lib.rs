//! Verified boot trust chains for firmware and kernel images.
//!
//! A trust chain is a keyblock, signed by a root key, that carries a data
//! key, followed by a preamble signed by that data key, that carries the
//! signature of a body. Firmware images hold two such slots located through
//! an FMAP, with the root key in the GBB. Kernel images hold one chain in
//! their header. RW images of embedded controllers carry a single
//! signature checked with a key kept in RO.
//!
//! [`Verifier`] checks chains and reports a [`SlotVerdict`] per slot.
//! [`SlotSigner`] builds new chains, and never writes a partial result.

#![forbid(unsafe_code)]

mod error;

/// Trust primitives: digests, signature checks and key handling.
pub mod crypto;

/// Secure file operations with restrictive permissions
///
/// Private keys are written with 0600 permissions on Unix systems.
pub mod secure_file;

/// Wire formats of packed keys, signatures, keyblocks and preambles.
pub mod vblock;

pub mod slot;

/// Flash map parsing and area clamping.
pub mod fmap;

/// Google Binary Block: hardware ID and root keys.
pub mod gbb;

/// Body formats able to declare integrity metadata.
pub mod payload;

/// Slot verification state machine.
pub mod verify;

/// Slot signing.
pub mod sign;

/// Dual-slot firmware images.
pub mod bios;

/// Single-chain kernel images.
pub mod kernel;

/// RW images verified by one signature, without keyblock.
pub mod rwsig;

/// Signing profiles stored as TOML.
pub mod profile;

pub use error::*;

pub use bios::{BiosImage, BiosLayout, BiosVerifyReport, sign_bios, verify_bios};
pub use crypto::{Algorithm, KeyPair, PrivateKey, PublicKey, SigningKey, SoftwarePrimitives, TrustPrimitives};
pub use fmap::{Fmap, ImageKind, recognize};
pub use kernel::{KernelImage, KernelSignOptions, resign_kernel, sign_kernel, verify_kernel};
pub use payload::{IndexedPayload, MetadataHash, PayloadFormat, RawPayload};
pub use profile::SigningProfile;
pub use rwsig::{RwSigImage, RwSigLayout, RwSigOptions, RwSigVerdict, sign_rwsig, verify_rwsig};
pub use sign::{ChainSource, IntegrityPolicy, SignOptions, SignReport, SlotSigner};
pub use slot::{Area, ChainLayout, SlotId};
pub use vblock::{Keyblock, KeyblockFlags, PackedPublicKey, Preamble, Signature, TrustChain};
pub use verify::{BootMode, SlotVerdict, UntrustedReason, Verifier, VerifyOptions};

pub mod reexports {
    pub use {bitflags, byteorder, ct_codecs, ed25519_compact, hmac_sha256, log, thiserror, toml};
}
