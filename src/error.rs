use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `ndarchive` crate.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Bad magic marker, unknown version, malformed header, or a payload that
    /// disagrees with its shape.
    #[error("Format error: {0}")]
    Format(String),

    /// The declared payload is longer than the bytes available.
    #[error("Truncated data: expected {expected} bytes, only {available} available")]
    TruncatedData { expected: u64, available: u64 },

    /// The element type cannot be encoded or decoded by the record format.
    #[error("Unsupported element type: {0}")]
    UnsupportedType(String),

    /// No archive entry with this name.
    #[error("No entry named '{0}' in archive")]
    KeyNotFound(String),

    /// The writer or archive was already closed.
    #[error("Handle is closed")]
    ClosedHandle,

    /// The generic-object path was requested with `allow_pickle == false`.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// An archive entry name was used twice in one writer session.
    #[error("Duplicate entry name '{0}'")]
    DuplicateName(String),

    /// An I/O error occurred while reading or writing. `path` is empty for
    /// in-memory streams.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// An error from the underlying zip container.
    #[error("Container error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// An error while (de)serializing a generic object body.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ArchiveError {
    /// Attaches a path to a bare I/O error.
    pub(crate) fn with_path(self, path: impl Into<PathBuf>) -> Self {
        match self {
            ArchiveError::Io { source, .. } => ArchiveError::Io { source, path: path.into() },
            other => other,
        }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        ArchiveError::Io { source: err, path: PathBuf::new() }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
