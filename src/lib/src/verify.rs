//! Slot verification.
//!
//! A slot is verified in stages, each one relying on the previous:
//!
//! 1. the keyblock checksum is recomputed,
//! 2. the keyblock signature is checked with the signer key (root key for
//!    firmware, kernel subkey for kernels),
//! 3. the data key is unpacked,
//! 4. the preamble signature is checked with the data key,
//! 5. the body is checked against the preamble's body signature.
//!
//! Verification never fails with an error and never mutates the image: the
//! outcome of each slot is a [`SlotVerdict`] that records the reason and the
//! last stage reached when the slot is not trusted.

use crate::crypto::{SoftwarePrimitives, TrustPrimitives};
use crate::error::CodecError;
use crate::payload::{PayloadFormat, RawPayload};
use crate::vblock::{
    Keyblock, KeyblockFlags, MAX_KEY_VERSION, PackedPublicKey, Preamble, Signature, SignatureKind,
};
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Start,
    KeyblockChecksumOk,
    KeyblockSigVerified,
    DataKeyValid,
    PreambleSigVerified,
    BodyVerified,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Start => "start",
            Stage::KeyblockChecksumOk => "keyblock checksum ok",
            Stage::KeyblockSigVerified => "keyblock signature verified",
            Stage::DataKeyValid => "data key valid",
            Stage::PreambleSigVerified => "preamble signature verified",
            Stage::BodyVerified => "body verified",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum UntrustedReason {
    MissingArea,
    /// The keyblock header is not a well-formed keyblock.
    KeyblockMalformed,
    ChecksumMismatch,
    KeyblockSignatureInvalid,
    KeyblockFlagsMismatch,
    DataKeyMalformed,
    PreambleMalformed,
    PreambleSignatureInvalid,
    RollbackRejected,
    BodyTooLarge,
    BodySignatureInvalid,
    RootKeyUnavailable,
}

impl fmt::Display for UntrustedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UntrustedReason::MissingArea => "area missing",
            UntrustedReason::KeyblockMalformed => "keyblock is malformed",
            UntrustedReason::ChecksumMismatch => "keyblock checksum mismatch",
            UntrustedReason::KeyblockSignatureInvalid => "keyblock signature invalid",
            UntrustedReason::KeyblockFlagsMismatch => "keyblock flags do not allow this boot mode",
            UntrustedReason::DataKeyMalformed => "data key is malformed",
            UntrustedReason::PreambleMalformed => "preamble is malformed",
            UntrustedReason::PreambleSignatureInvalid => "preamble signature invalid",
            UntrustedReason::RollbackRejected => "version is below the minimum",
            UntrustedReason::BodyTooLarge => "signed body is larger than its area",
            UntrustedReason::BodySignatureInvalid => "body signature invalid",
            UntrustedReason::RootKeyUnavailable => "root key unavailable",
        };
        f.write_str(s)
    }
}

/// Facts established about a trusted slot.
///
/// A trusted slot has reached [`Stage::BodyVerified`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrustedSlot {
    pub version: u16,
    pub flags: u32,
    /// Version of the data key, at most [`MAX_KEY_VERSION`].
    pub key_version: u32,
    pub body_len: usize,
    pub keyblock_flags: KeyblockFlags,
    pub data_key: PackedPublicKey,
    pub subkey: Option<PackedPublicKey>,
}

impl TrustedSlot {
    /// Version used for rollback checks.
    pub fn combined_version(&self) -> u32 {
        (self.key_version << 16) | self.version as u32
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SlotVerdict {
    Trusted(TrustedSlot),
    Untrusted {
        reason: UntrustedReason,
        /// Last stage reached.
        stage: Stage,
    },
}

impl SlotVerdict {
    pub fn missing() -> Self {
        SlotVerdict::Untrusted {
            reason: UntrustedReason::MissingArea,
            stage: Stage::Start,
        }
    }

    pub fn is_trusted(&self) -> bool {
        matches!(self, SlotVerdict::Trusted(_))
    }

    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            SlotVerdict::Untrusted {
                reason: UntrustedReason::MissingArea,
                ..
            }
        )
    }

    /// Last stage reached.
    pub fn stage(&self) -> Stage {
        match self {
            SlotVerdict::Trusted(_) => Stage::BodyVerified,
            SlotVerdict::Untrusted { stage, .. } => *stage,
        }
    }

    pub fn trusted(&self) -> Option<&TrustedSlot> {
        match self {
            SlotVerdict::Trusted(slot) => Some(slot),
            SlotVerdict::Untrusted { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<UntrustedReason> {
        match self {
            SlotVerdict::Trusted(_) => None,
            SlotVerdict::Untrusted { reason, .. } => Some(*reason),
        }
    }
}

impl fmt::Display for SlotVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotVerdict::Trusted(slot) => write!(
                f,
                "trusted (version {}, flags {:#x}, key version {}, {} body bytes)",
                slot.version, slot.flags, slot.key_version, slot.body_len
            ),
            SlotVerdict::Untrusted { reason, stage } => {
                write!(f, "untrusted: {} (reached: {})", reason, stage)
            }
        }
    }
}

/// Switch positions the keyblock flags are checked against.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct BootMode {
    pub developer: bool,
    pub recovery: bool,
    pub minios: bool,
}

/// Caller choices for verification.
#[derive(Clone, Debug, Default)]
pub struct VerifyOptions {
    /// Use this key instead of the one stored in the image.
    pub root_key: Option<PackedPublicKey>,
    /// Check keyblock flags against this boot mode.
    pub boot_mode: Option<BootMode>,
    /// Reject slots whose combined version is lower.
    pub min_version: Option<u32>,
}

impl VerifyOptions {
    pub fn with_root_key(mut self, key: PackedPublicKey) -> Self {
        self.root_key = Some(key);
        self
    }

    pub fn with_boot_mode(mut self, mode: BootMode) -> Self {
        self.boot_mode = Some(mode);
        self
    }

    pub fn with_min_version(mut self, version: u32) -> Self {
        self.min_version = Some(version);
        self
    }
}

/// Runs the slot verification state machine.
pub struct Verifier<'a> {
    options: VerifyOptions,
    primitives: &'a dyn TrustPrimitives,
    payload: &'a dyn PayloadFormat,
}

impl Default for Verifier<'_> {
    fn default() -> Self {
        Self::new(VerifyOptions::default())
    }
}

impl<'a> Verifier<'a> {
    pub fn new(options: VerifyOptions) -> Self {
        Verifier {
            options,
            primitives: &SoftwarePrimitives,
            payload: &RawPayload,
        }
    }

    pub fn with_primitives(mut self, primitives: &'a dyn TrustPrimitives) -> Self {
        self.primitives = primitives;
        self
    }

    pub fn with_payload_format(mut self, payload: &'a dyn PayloadFormat) -> Self {
        self.payload = payload;
        self
    }

    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    /// Verify the chain stored at the start of `chain_area` and the body it
    /// signs. `signer_key` is the key expected to have signed the keyblock.
    pub fn verify_chain(
        &self,
        label: &str,
        signer_key: &PackedPublicKey,
        chain_area: &[u8],
        body_area: &[u8],
    ) -> SlotVerdict {
        let verdict = self.run(signer_key, chain_area, body_area);
        match &verdict {
            SlotVerdict::Trusted(slot) => log::debug!(
                "{}: {}, version {} key version {}",
                label,
                Stage::BodyVerified,
                slot.version,
                slot.key_version
            ),
            SlotVerdict::Untrusted { reason, stage } => {
                log::warn!("{}: {} (reached: {})", label, reason, stage)
            }
        }
        verdict
    }

    fn run(&self, signer_key: &PackedPublicKey, chain_area: &[u8], body_area: &[u8]) -> SlotVerdict {
        let reject = |reason, stage| SlotVerdict::Untrusted { reason, stage };

        let keyblock = match Keyblock::parse(chain_area) {
            Ok(keyblock) => keyblock,
            Err(CodecError::ChecksumMismatch) => {
                return reject(UntrustedReason::ChecksumMismatch, Stage::Start);
            }
            Err(e) => {
                log::debug!("Keyblock parse failed: {}", e);
                return reject(UntrustedReason::KeyblockMalformed, Stage::Start);
            }
        };
        let stage = Stage::KeyblockChecksumOk;

        if let Err(e) = keyblock.verify_signature(signer_key, self.primitives) {
            log::debug!("Keyblock signature check failed: {}", e);
            return reject(UntrustedReason::KeyblockSignatureInvalid, stage);
        }
        let stage = Stage::KeyblockSigVerified;

        if let Some(mode) = self.options.boot_mode {
            if !keyblock.allows(mode) {
                return reject(UntrustedReason::KeyblockFlagsMismatch, stage);
            }
        }
        let data_key = &keyblock.data_key;
        if let Err(e) = self.primitives.check_key(data_key) {
            log::debug!("Data key check failed: {}", e);
            return reject(UntrustedReason::DataKeyMalformed, stage);
        }
        if data_key.key_version > MAX_KEY_VERSION {
            log::debug!("Data key version {:#x} is out of range", data_key.key_version);
            return reject(UntrustedReason::DataKeyMalformed, stage);
        }
        let stage = Stage::DataKeyValid;

        let preamble = match Preamble::parse(chain_area, keyblock.keyblock_size as usize) {
            Ok(preamble) => preamble,
            Err(e) => {
                log::debug!("Preamble parse failed: {}", e);
                return reject(UntrustedReason::PreambleMalformed, stage);
            }
        };
        if let Err(e) = preamble.verify_signature(data_key, self.primitives) {
            log::debug!("Preamble signature check failed: {}", e);
            return reject(UntrustedReason::PreambleSignatureInvalid, stage);
        }
        let stage = Stage::PreambleSigVerified;

        if let Some(min_version) = self.options.min_version {
            let Some(version) = preamble.combined_version(data_key) else {
                return reject(UntrustedReason::DataKeyMalformed, stage);
            };
            if version < min_version {
                log::debug!("Version {:#x} < {:#x}", version, min_version);
                return reject(UntrustedReason::RollbackRejected, stage);
            }
        }

        let body_len = preamble.body_len();
        if body_len > body_area.len() {
            return reject(UntrustedReason::BodyTooLarge, stage);
        }
        let body = &body_area[..body_len];
        let body_sig = &preamble.body_signature;
        let body_ok = match body_sig.kind {
            SignatureKind::Classical => body_sig
                .verify_data(data_key, body, self.primitives)
                .map_err(|e| log::debug!("Body signature check failed: {}", e))
                .is_ok(),
            SignatureKind::Digest => self.check_integrity_metadata(body, body_sig),
        };
        if !body_ok {
            return reject(UntrustedReason::BodySignatureInvalid, stage);
        }

        SlotVerdict::Trusted(TrustedSlot {
            version: preamble.version,
            flags: preamble.flags,
            key_version: data_key.key_version,
            body_len,
            keyblock_flags: keyblock.flags,
            data_key: keyblock.data_key.clone(),
            subkey: preamble.subkey.clone(),
        })
    }

    /// The signed metadata digest must match, and so must the content the
    /// metadata describes.
    fn check_integrity_metadata(&self, body: &[u8], body_sig: &Signature) -> bool {
        let Some(hash) = self.payload.metadata_hash(body, self.primitives) else {
            log::debug!("Body carries no integrity metadata");
            return false;
        };
        if hash.algorithm.to_raw() != body_sig.algorithm || hash.digest != body_sig.sig_data {
            log::debug!("Integrity metadata digest mismatch");
            return false;
        }
        if !self.payload.content_matches(body, self.primitives) {
            log::debug!("Body content does not match its integrity metadata");
            return false;
        }
        true
    }
}
