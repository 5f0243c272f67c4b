use std::io;

/// Malformed or truncated binary structures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Bad magic")]
    BadMagic,

    #[error("Unsupported header version: {0}")]
    UnsupportedVersion(u32),

    #[error("Header checksum mismatch")]
    ChecksumMismatch,

    #[error("Structure out of bounds (needs {needed} bytes, {available} available)")]
    OutOfBounds { needed: usize, available: usize },

    #[error("Destination area too small (needs {needed} bytes, {available} available)")]
    AreaTooSmall { needed: usize, available: usize },

    #[error("Declared size {declared} does not match encoded size {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("Non-canonical encoding of {0}")]
    NonCanonical(&'static str),

    #[error("Truncated data")]
    Truncated,

    #[error("I/O error")]
    Io(#[from] io::Error),
}

/// Signature and key validity failures.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed key: {0}")]
    MalformedKey(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(u32),

    #[error("Algorithm mismatch between key ({key}) and signature ({signature})")]
    AlgorithmMismatch { key: u32, signature: u32 },

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Ed25519 signature function error")]
    CryptoError(#[from] ed25519_compact::Error),
}

/// Caller-requested modes that the input does not satisfy.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Reused trust chain is invalid: {0}")]
    InvalidReusedChain(#[source] CodecError),

    #[error("Integrity metadata not found in area {0}, it is required for this image")]
    MissingMetadata(String),

    #[error("Content of area {0} does not match its integrity metadata")]
    MetadataMismatch(String),

    #[error("{0} area not found")]
    MissingArea(String),

    #[error("{area} size is incorrect ({requested:#x} > {available:#x})")]
    BodySizeExceedsArea {
        area: String,
        requested: usize,
        available: usize,
    },

    #[error("Signing key does not match the keyblock data key")]
    KeyMismatch,
}

/// The vbsign error type.
#[derive(Debug, thiserror::Error)]
pub enum VbError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Trust error: {0}")]
    Trust(#[from] TrustError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("{area}: {source}")]
    InArea {
        area: String,
        #[source]
        source: Box<VbError>,
    },

    #[error("I/O error")]
    IOError(#[from] io::Error),

    #[error("Parse error")]
    ParseError,

    #[error("Unsupported key type")]
    UnsupportedKeyType,

    #[error("Unsupported image type")]
    UnsupportedImage,

    #[error("Verification failed")]
    VerificationFailed,

    #[error("Usage error: {0}")]
    UsageError(&'static str),

    #[error("Profile error: {0}")]
    ProfileError(String),

    #[error("Internal error: [{0}]")]
    InternalError(String),
}

impl VbError {
    /// Attach the name of the area an error occurred in.
    pub fn in_area(self, area: impl Into<String>) -> Self {
        VbError::InArea {
            area: area.into(),
            source: Box::new(self),
        }
    }
}

impl From<ed25519_compact::Error> for VbError {
    fn from(err: ed25519_compact::Error) -> Self {
        VbError::Trust(TrustError::CryptoError(err))
    }
}
