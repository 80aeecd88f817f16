//! Platform resolution error types.

use thiserror::Error;

/// Errors raised while resolving or materializing a platform artifact.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("platform {platform} has no version {version}")]
    UnknownVersion { platform: String, version: String },

    #[error("download of {reference} failed: {reason}")]
    Download { reference: String, reason: String },

    #[error("checksum mismatch for {reference}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        reference: String,
        expected: String,
        actual: String,
    },

    #[error("invalid catalogue: {0}")]
    Catalogue(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PlatformResult<T> = Result<T, PlatformError>;
