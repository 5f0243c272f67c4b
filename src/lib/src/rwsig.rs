//! Self-verifying RW images.
//!
//! Some embedded controllers check their own RW image at boot with a public
//! key kept in their RO image. There is no keyblock and no preamble: a
//! single [`Signature`] made with the RW key covers the start of the RW
//! data, and whatever follows the signed bytes must be `0xFF` padding.
//!
//! Two containers hold such a signature:
//!
//! * a full image whose FMAP has `SIG_RW` and `EC_RW` areas, and usually a
//!   `KEY_RO` area with the packed public key,
//! * a bare RW blob whose last bytes (1 KiB unless told otherwise) are
//!   reserved for the signature.

use crate::crypto::{SigningKey, SoftwarePrimitives, TrustPrimitives};
use crate::error::*;
use crate::fmap::Fmap;
use crate::slot::Area;
use crate::vblock::{PackedPublicKey, Signature, SignatureKind};

use std::fmt;

/// Space reserved for the signature at the end of a bare RW blob.
pub const RWSIG_DEFAULT_SIZE: usize = 1024;

pub const KEY_RO: &str = "KEY_RO";
pub const SIG_RW: &str = "SIG_RW";
pub const EC_RW: &str = "EC_RW";

const PADDING: u8 = 0xFF;

/// Where the key, signature and signed data of an RW image live.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RwSigLayout {
    /// Packed public key in RO, only in full images.
    pub key: Option<Area>,
    pub signature: Area,
    /// Signed data followed by padding. Never overlaps `signature`.
    pub data: Area,
}

impl RwSigLayout {
    /// Use the FMAP when there is one, otherwise treat `buf` as a bare RW
    /// blob ending with `sig_size` signature bytes.
    pub fn from_image(buf: &[u8], sig_size: usize) -> Result<Self, VbError> {
        match Fmap::find(buf) {
            Some(fmap) => Self::from_fmap(&fmap, buf.len()),
            None => Self::bare(buf.len(), sig_size),
        }
    }

    pub fn from_fmap(fmap: &Fmap, image_len: usize) -> Result<Self, VbError> {
        let area = |name: &str| {
            fmap.find_area(name)
                .map(|a| Area::from(a.clamp(image_len)))
                .filter(|a| !a.is_empty())
        };
        let signature = area(SIG_RW).ok_or_else(|| PolicyError::MissingArea(SIG_RW.to_string()))?;
        let mut data = area(EC_RW).ok_or_else(|| PolicyError::MissingArea(EC_RW.to_string()))?;
        let key = area(KEY_RO);

        // SIG_RW is commonly placed at the end of EC_RW.
        let (sig_range, data_range) = (signature.range(), data.range());
        if sig_range.start >= data_range.start && sig_range.start < data_range.end {
            data.len = sig_range.start - data_range.start;
        } else if data_range.start >= sig_range.start && data_range.start < sig_range.end {
            return Err(CodecError::NonCanonical("EC_RW starts inside SIG_RW").into());
        }
        Ok(RwSigLayout {
            key,
            signature,
            data,
        })
    }

    pub fn bare(image_len: usize, sig_size: usize) -> Result<Self, VbError> {
        if image_len < sig_size {
            return Err(CodecError::AreaTooSmall {
                needed: sig_size,
                available: image_len,
            }
            .into());
        }
        let data_len = image_len - sig_size;
        Ok(RwSigLayout {
            key: None,
            signature: Area::new(data_len, sig_size),
            data: Area::new(0, data_len),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RwSigFailure {
    SignatureMalformed,
    KeyUnavailable,
    KeyMalformed,
    DataTooLarge,
    SignatureInvalid,
    PaddingInvalid,
}

impl fmt::Display for RwSigFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RwSigFailure::SignatureMalformed => "signature is malformed",
            RwSigFailure::KeyUnavailable => "no public key available",
            RwSigFailure::KeyMalformed => "public key is malformed",
            RwSigFailure::DataTooLarge => "signed data is larger than the RW area",
            RwSigFailure::SignatureInvalid => "signature invalid",
            RwSigFailure::PaddingInvalid => "data after the signed range is not padding",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RwSigVerdict {
    Trusted { data_size: usize, key_version: u32 },
    Untrusted(RwSigFailure),
}

impl RwSigVerdict {
    pub fn is_trusted(&self) -> bool {
        matches!(self, RwSigVerdict::Trusted { .. })
    }

    pub fn failure(&self) -> Option<RwSigFailure> {
        match self {
            RwSigVerdict::Trusted { .. } => None,
            RwSigVerdict::Untrusted(failure) => Some(*failure),
        }
    }
}

impl fmt::Display for RwSigVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RwSigVerdict::Trusted {
                data_size,
                key_version,
            } => write!(
                f,
                "trusted ({:#x} signed bytes, key version {})",
                data_size, key_version
            ),
            RwSigVerdict::Untrusted(failure) => write!(f, "untrusted: {}", failure),
        }
    }
}

/// An RW image buffer with its layout.
pub struct RwSigImage<B> {
    buf: B,
    layout: RwSigLayout,
}

impl<B: AsRef<[u8]>> RwSigImage<B> {
    pub fn parse(buf: B, sig_size: usize) -> Result<Self, VbError> {
        let layout = RwSigLayout::from_image(buf.as_ref(), sig_size)?;
        Ok(RwSigImage { buf, layout })
    }

    pub fn layout(&self) -> &RwSigLayout {
        &self.layout
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    fn area(&self, area: Area) -> Result<&[u8], VbError> {
        area.slice(self.buf.as_ref())
            .ok_or_else(|| VbError::InternalError("RW area out of range".to_string()))
    }

    pub fn signature(&self) -> Result<Signature, VbError> {
        Ok(Signature::parse(self.area(self.layout.signature)?)?)
    }

    /// The public key stored in `KEY_RO`, if the image has one.
    pub fn stored_key(&self) -> Option<Result<PackedPublicKey, VbError>> {
        let area = self.layout.key?;
        Some(
            self.area(area)
                .and_then(|bytes| Ok(PackedPublicKey::parse(bytes)?)),
        )
    }

    /// Verify with `key`, or with the key stored in `KEY_RO` when `None`.
    pub fn verify(&self, key: Option<&PackedPublicKey>) -> RwSigVerdict {
        self.verify_with(key, &SoftwarePrimitives)
    }

    pub fn verify_with(
        &self,
        key: Option<&PackedPublicKey>,
        primitives: &dyn TrustPrimitives,
    ) -> RwSigVerdict {
        let verdict = self.run(key, primitives);
        match &verdict {
            RwSigVerdict::Trusted { .. } => log::debug!("{}: {}", SIG_RW, verdict),
            RwSigVerdict::Untrusted(failure) => log::warn!("{}: {}", SIG_RW, failure),
        }
        verdict
    }

    fn run(&self, key: Option<&PackedPublicKey>, primitives: &dyn TrustPrimitives) -> RwSigVerdict {
        let reject = RwSigVerdict::Untrusted;

        let signature = match self.signature() {
            Ok(sig) if sig.kind == SignatureKind::Classical => sig,
            Ok(_) => return reject(RwSigFailure::SignatureMalformed),
            Err(e) => {
                log::debug!("RW signature parse failed: {}", e);
                return reject(RwSigFailure::SignatureMalformed);
            }
        };
        let key = match (key, self.stored_key()) {
            (Some(key), _) => key.clone(),
            (None, Some(Ok(key))) => key,
            (None, Some(Err(e))) => {
                log::debug!("{} is invalid: {}", KEY_RO, e);
                return reject(RwSigFailure::KeyMalformed);
            }
            (None, None) => return reject(RwSigFailure::KeyUnavailable),
        };
        if let Err(e) = primitives.check_key(&key) {
            log::debug!("RW key check failed: {}", e);
            return reject(RwSigFailure::KeyMalformed);
        }

        let Ok(data) = self.area(self.layout.data) else {
            return reject(RwSigFailure::DataTooLarge);
        };
        let data_size = signature.data_size as usize;
        if data_size > data.len() {
            return reject(RwSigFailure::DataTooLarge);
        }
        let (signed, padding) = data.split_at(data_size);
        if let Err(e) = signature.verify_data(&key, signed, primitives) {
            log::debug!("RW signature check failed: {}", e);
            return reject(RwSigFailure::SignatureInvalid);
        }
        if let Some(pos) = padding.iter().position(|&b| b != PADDING) {
            log::debug!("Unexpected byte at {:#x} in RW padding", data_size + pos);
            return reject(RwSigFailure::PaddingInvalid);
        }
        RwSigVerdict::Trusted {
            data_size,
            key_version: key.key_version,
        }
    }
}

/// Caller choices for signing an RW image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RwSigOptions {
    /// Number of RW bytes to sign, inherited from the existing signature
    /// when unset.
    pub data_size: Option<usize>,
    /// Version stored with the public key written to `KEY_RO`.
    pub key_version: u32,
}

impl Default for RwSigOptions {
    fn default() -> Self {
        RwSigOptions {
            data_size: None,
            key_version: 1,
        }
    }
}

/// What signing an RW image did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RwSigReport {
    pub data_size: usize,
    pub signature: Signature,
    /// The public key was written to `KEY_RO`.
    pub key_written: bool,
}

/// Sign `data` with `key`, without any container.
pub fn sign_rw_data(data: &[u8], key: &dyn SigningKey) -> Result<Signature, VbError> {
    let data_size =
        u32::try_from(data.len()).map_err(|_| CodecError::NonCanonical("RW data size"))?;
    Ok(Signature::classical(key.algorithm(), data_size, key.sign(data)?))
}

fn fill(dest: &mut [u8], content: &[u8]) {
    dest.fill(PADDING);
    dest[..content.len()].copy_from_slice(content);
}

fn checked_fit(content: Vec<u8>, area: Area) -> Result<Vec<u8>, VbError> {
    if content.len() > area.len {
        return Err(CodecError::AreaTooSmall {
            needed: content.len(),
            available: area.len,
        }
        .into());
    }
    Ok(content)
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> RwSigImage<B> {
    /// Re-sign the RW data in place, and store the public key in `KEY_RO`
    /// when the image has that area.
    ///
    /// Nothing is written unless both the signature and the key fit.
    pub fn sign(&mut self, key: &dyn SigningKey, options: RwSigOptions) -> Result<RwSigReport, VbError> {
        let layout = self.layout;
        let data = self.area(layout.data)?;
        let data_size = match options.data_size {
            Some(size) => size,
            None => match self.signature() {
                Ok(existing) if existing.data_size as usize <= data.len() => {
                    log::debug!("Reusing the signed size of the existing signature");
                    existing.data_size as usize
                }
                _ => {
                    log::warn!("No valid signature found. Signing the entire RW area.");
                    data.len()
                }
            },
        };
        if data_size > data.len() {
            return Err(PolicyError::BodySizeExceedsArea {
                area: EC_RW.to_string(),
                requested: data_size,
                available: data.len(),
            }
            .into());
        }

        let signature = sign_rw_data(&data[..data_size], key)?;
        let sig_bytes = checked_fit(signature.to_bytes()?, layout.signature).map_err(|e| e.in_area(SIG_RW))?;
        let key_bytes = match layout.key {
            Some(area) => {
                let packed = PackedPublicKey {
                    algorithm: key.algorithm().to_raw(),
                    key_version: options.key_version,
                    key_data: key.public_key_data(),
                };
                Some((area, checked_fit(packed.to_bytes(), area).map_err(|e| e.in_area(KEY_RO))?))
            }
            None => {
                log::info!("No {} area, the public key is not stored", KEY_RO);
                None
            }
        };

        let buf = self.buf.as_mut();
        let dest = layout
            .signature
            .slice_mut(buf)
            .ok_or_else(|| VbError::InternalError("RW signature area out of range".to_string()))?;
        fill(dest, &sig_bytes);
        let key_written = key_bytes.is_some();
        if let Some((area, bytes)) = key_bytes {
            let dest = area
                .slice_mut(buf)
                .ok_or_else(|| VbError::InternalError("RO key area out of range".to_string()))?;
            fill(dest, &bytes);
        }
        log::info!("Signed {:#x} RW bytes", data_size);
        Ok(RwSigReport {
            data_size,
            signature,
            key_written,
        })
    }
}

/// Verify an RW image or blob.
pub fn verify_rwsig(
    buf: &[u8],
    key: Option<&PackedPublicKey>,
    sig_size: usize,
) -> Result<RwSigVerdict, VbError> {
    Ok(RwSigImage::parse(buf, sig_size)?.verify(key))
}

/// Sign an RW image or blob in place.
pub fn sign_rwsig(
    buf: &mut [u8],
    key: &dyn SigningKey,
    sig_size: usize,
    options: RwSigOptions,
) -> Result<RwSigReport, VbError> {
    RwSigImage::parse(buf, sig_size)?.sign(key, options)
}
