//! Error types for the core lookup, workbook, and forwarding logic.

use thiserror::Error;

/// Errors produced by the core domain logic.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The caller is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A lookup file, backup, or resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input did not parse or failed validation.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A lookup name contains characters that are not allowed.
    #[error("Invalid lookup file name: {0}")]
    InvalidName(String),

    /// A lookup file exceeds the editable size ceiling.
    #[error("Lookup file is too large to load ({size} bytes)")]
    FileTooBig {
        /// Size of the offending file in bytes.
        size: u64,
    },

    /// The lookup type is not one the editor understands.
    #[error("Unsupported lookup type: {0}")]
    UnsupportedType(String),

    /// Free disk space is below the backup threshold.
    #[error("Insufficient disk space to make a backup")]
    LowDiskSpace,

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parse or write failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encode/decode failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything without a more specific category.
    #[error("{0}")]
    Internal(String),
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
