//! Signing profiles.
//!
//! A profile collects the keys and options used to sign a family of images,
//! so that they do not need to be repeated on every command line.
//!
//! # Profile File Format (TOML)
//!
//! ```toml
//! [keys]
//! signprivate = "firmware_data_key.vbprivk"
//! keyblock = "firmware.keyblock"       # reuse an existing keyblock
//! root_private = "root_key.vbprivk"    # or build a fresh one
//! data_public = "firmware_data_key.vbpubk"
//! kernel_subkey = "kernel_subkey.vbpubk"
//!
//! [firmware]
//! version = 2
//! flags = 0
//! keyblock_flags = 0x3f
//! integrity = "auto"                   # or "required", "disabled"
//! fv_size_a = 0x100000
//!
//! [kernel]
//! version = 1
//! keyblock_flags = 0x3f
//! padding = 0x10000
//!
//! [loem]
//! dir = "out"
//! id = "OEM1"
//! ```

use crate::error::VbError;
use crate::sign::{IntegrityPolicy, SignOptions};
use crate::slot::SlotId;
use crate::vblock::KeyblockFlags;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningProfile {
    #[serde(default)]
    pub keys: KeyPaths,

    #[serde(default)]
    pub firmware: FirmwareProfile,

    #[serde(default)]
    pub kernel: KernelProfile,

    #[serde(default)]
    pub loem: Option<LoemProfile>,
}

/// Key files. Relative paths are resolved by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPaths {
    /// Data private key signing bodies and preambles.
    #[serde(default)]
    pub signprivate: Option<PathBuf>,

    /// Existing keyblock to reuse.
    #[serde(default)]
    pub keyblock: Option<PathBuf>,

    /// Private key signing a fresh keyblock.
    #[serde(default)]
    pub root_private: Option<PathBuf>,

    /// Data public key to put in a fresh keyblock.
    #[serde(default)]
    pub data_public: Option<PathBuf>,

    #[serde(default)]
    pub kernel_subkey: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareProfile {
    #[serde(default)]
    pub version: Option<u16>,

    #[serde(default)]
    pub flags: Option<u32>,

    /// Raw keyblock flags for fresh keyblocks; all modes when unset.
    #[serde(default)]
    pub keyblock_flags: Option<u32>,

    #[serde(default)]
    pub integrity: IntegrityPolicy,

    #[serde(default)]
    pub fv_size_a: Option<usize>,

    #[serde(default)]
    pub fv_size_b: Option<usize>,
}

impl FirmwareProfile {
    pub fn sign_options(&self) -> SignOptions {
        let mut options = SignOptions::default().with_integrity(self.integrity);
        if let Some(version) = self.version {
            options = options.with_version(version);
        }
        if let Some(flags) = self.flags {
            options = options.with_flags(flags);
        }
        if let Some(len) = self.fv_size_a {
            options = options.with_body_len(SlotId::A, len);
        }
        if let Some(len) = self.fv_size_b {
            options = options.with_body_len(SlotId::B, len);
        }
        options
    }

    pub fn keyblock_flags(&self) -> KeyblockFlags {
        keyblock_flags(self.keyblock_flags)
    }
}

fn keyblock_flags(raw: Option<u32>) -> KeyblockFlags {
    raw.map(KeyblockFlags::from_bits_retain).unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelProfile {
    #[serde(default)]
    pub version: Option<u16>,

    #[serde(default)]
    pub flags: Option<u32>,

    #[serde(default)]
    pub keyblock_flags: Option<u32>,

    #[serde(default)]
    pub padding: Option<usize>,
}

impl KernelProfile {
    pub fn sign_options(&self) -> SignOptions {
        let mut options = SignOptions::default();
        if let Some(version) = self.version {
            options = options.with_version(version);
        }
        if let Some(flags) = self.flags {
            options = options.with_flags(flags);
        }
        options
    }

    pub fn keyblock_flags(&self) -> KeyblockFlags {
        keyblock_flags(self.keyblock_flags)
    }
}

/// Where to write per-slot trust chains for separate distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoemProfile {
    #[serde(default = "default_loem_dir")]
    pub dir: PathBuf,
    pub id: String,
}

fn default_loem_dir() -> PathBuf {
    PathBuf::from(".")
}

impl LoemProfile {
    /// Output path for a slot: `<dir>/vblock_<slot>.<id>`.
    pub fn path(&self, id: SlotId) -> PathBuf {
        self.dir.join(format!("vblock_{}.{}", id.letter(), self.id))
    }
}

impl SigningProfile {
    /// Parse a profile from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, VbError> {
        toml::from_str(toml_str).map_err(|e| VbError::ProfileError(e.to_string()))
    }

    /// Load a profile from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, VbError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| VbError::ProfileError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Serialize the profile to a TOML string.
    pub fn to_toml(&self) -> Result<String, VbError> {
        toml::to_string_pretty(self).map_err(|e| VbError::ProfileError(e.to_string()))
    }
}
