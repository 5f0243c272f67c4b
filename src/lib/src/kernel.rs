//! Monolithic kernel images.
//!
//! ```text
//! magic[8] = "VBKERNEL"
//! header_size: u32   offset of the body from the start of the file
//! body_size: u32
//! keyblock, preamble, zero padding up to header_size
//! body[body_size]
//! ```

use crate::error::*;
use crate::sign::SlotSigner;
use crate::slot::{Area, ChainLayout, SlotId};
use crate::vblock::wire::{self, Reader};
use crate::vblock::{PackedPublicKey, TrustChain};
use crate::verify::{SlotVerdict, Verifier, VerifyOptions};

pub const KERNEL_MAGIC: &[u8; 8] = b"VBKERNEL";

/// magic + header_size + body_size
pub const KERNEL_PREFIX_SIZE: usize = 16;

const KERNEL_AREA_NAMES: (&str, &str) = ("kernel body", "kernel vblock");

/// A parsed kernel image borrowing its bytes.
#[derive(Clone, Copy, Debug)]
pub struct KernelImage<'a> {
    pub header_size: u32,
    pub body_size: u32,
    bytes: &'a [u8],
}

impl<'a> KernelImage<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, VbError> {
        let mut reader = Reader::new(bytes);
        let magic: [u8; 8] = wire::get_array(&mut reader)?;
        if &magic != KERNEL_MAGIC {
            return Err(VbError::UnsupportedImage);
        }
        let header_size = wire::get32(&mut reader)?;
        let body_size = wire::get32(&mut reader)?;
        if (header_size as usize) < KERNEL_PREFIX_SIZE {
            return Err(CodecError::SizeMismatch {
                declared: header_size as usize,
                actual: KERNEL_PREFIX_SIZE,
            }
            .into());
        }
        let needed = header_size as usize + body_size as usize;
        if needed > bytes.len() {
            return Err(CodecError::OutOfBounds {
                needed,
                available: bytes.len(),
            }
            .into());
        }
        if needed < bytes.len() {
            log::debug!("Ignoring {} bytes after the kernel body", bytes.len() - needed);
        }
        Ok(KernelImage {
            header_size,
            body_size,
            bytes,
        })
    }

    pub fn chain_area(&self) -> &'a [u8] {
        &self.bytes[KERNEL_PREFIX_SIZE..self.header_size as usize]
    }

    pub fn body(&self) -> &'a [u8] {
        let start = self.header_size as usize;
        &self.bytes[start..start + self.body_size as usize]
    }

    pub fn trust_chain(&self) -> Result<TrustChain, VbError> {
        Ok(TrustChain::parse(self.chain_area())?)
    }

    /// The keyblock and preamble, without padding.
    pub fn vblock(&self) -> Result<Vec<u8>, VbError> {
        let chain = self.trust_chain()?;
        Ok(self.chain_area()[..chain.encoded_len()].to_vec())
    }

    /// The keyblock alone, for reuse when signing other kernels.
    pub fn keyblock_bytes(&self) -> Result<Vec<u8>, VbError> {
        let chain = self.trust_chain()?;
        Ok(self.chain_area()[..chain.keyblock.encoded_len()].to_vec())
    }
}

impl ChainLayout for KernelImage<'_> {
    fn slot_ids(&self) -> &'static [SlotId] {
        &[SlotId::A]
    }

    fn area_name(&self, _id: SlotId, body: bool) -> String {
        if body {
            KERNEL_AREA_NAMES.0.to_string()
        } else {
            KERNEL_AREA_NAMES.1.to_string()
        }
    }

    fn trust_chain_area(&self, id: SlotId) -> Option<Area> {
        match id {
            SlotId::A => Some(Area::new(
                KERNEL_PREFIX_SIZE,
                self.header_size as usize - KERNEL_PREFIX_SIZE,
            )),
            SlotId::B => None,
        }
    }

    fn body_area(&self, id: SlotId) -> Option<Area> {
        match id {
            SlotId::A => Some(Area::new(self.header_size as usize, self.body_size as usize)),
            SlotId::B => None,
        }
    }
}

/// Header layout for a new kernel image.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct KernelSignOptions {
    /// Pad the header to this many bytes. Zero keeps it as small as possible.
    pub padding: usize,
}

fn assemble(chain: &[u8], body: &[u8], header_size: usize) -> Result<Vec<u8>, VbError> {
    let minimum = KERNEL_PREFIX_SIZE + chain.len();
    if header_size < minimum {
        return Err(CodecError::AreaTooSmall {
            needed: minimum,
            available: header_size,
        }
        .into());
    }
    let to_u32 = |v: usize| u32::try_from(v).map_err(|_| CodecError::NonCanonical("kernel size"));
    let mut out = Vec::with_capacity(header_size + body.len());
    out.extend_from_slice(KERNEL_MAGIC);
    wire::put32(&mut out, to_u32(header_size)?)?;
    wire::put32(&mut out, to_u32(body.len())?)?;
    out.extend_from_slice(chain);
    out.resize(header_size, 0);
    out.extend_from_slice(body);
    Ok(out)
}

/// Build a signed kernel image for `body`.
///
/// Version and flags come from the signer options, defaulting to 1 and 0.
pub fn sign_kernel(
    body: &[u8],
    signer: &SlotSigner<'_>,
    options: KernelSignOptions,
) -> Result<Vec<u8>, VbError> {
    let version = signer.options().version.unwrap_or(1);
    let flags = signer.options().flags.unwrap_or(0);
    let chain = signer.build_chain_for(body, None, version, flags, usize::MAX)?;
    let header_size = if options.padding == 0 {
        KERNEL_PREFIX_SIZE + chain.len()
    } else {
        options.padding
    };
    let image = assemble(&chain, body, header_size)?;
    log::info!(
        "Signed kernel: {:#x} header bytes, {:#x} body bytes, version {}",
        header_size,
        body.len(),
        version
    );
    Ok(image)
}

/// Re-sign an existing kernel image, keeping its header size.
///
/// Version, flags and signed length not given in the signer options are
/// taken from the existing chain when it is intact.
pub fn resign_kernel(image: &[u8], signer: &SlotSigner<'_>) -> Result<Vec<u8>, VbError> {
    let kernel = KernelImage::parse(image)?;
    let mut out = image.to_vec();
    signer.sign_layout(&mut out, &kernel)?;
    Ok(out)
}

/// Verify a kernel image with the key that signed its keyblock.
pub fn verify_kernel(
    bytes: &[u8],
    key: &PackedPublicKey,
    options: VerifyOptions,
) -> Result<SlotVerdict, VbError> {
    let kernel = KernelImage::parse(bytes)?;
    let verifier = Verifier::new(options);
    Ok(verifier.verify_chain(KERNEL_AREA_NAMES.1, key, kernel.chain_area(), kernel.body()))
}
