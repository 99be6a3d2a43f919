//! # Entry Compression
//!
//! Compression is a per-entry storage transform inside the archive container and
//! never changes the record bytes a reader gets back.

use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime};

/// Entries at or above this size are written with zip64 extensions.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Defines the available compression algorithms for archive entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionAlgo {
    /// Plain storage without any compression.
    #[default]
    Store,
    /// Deflate, readable by every zip implementation. `None` uses the codec's
    /// default level.
    Deflate { level: Option<i32> },
    /// Zstandard. Smaller and faster than deflate, but not every zip reader
    /// understands it.
    Zstd { level: Option<i32> },
}

impl CompressionAlgo {
    /// The algorithm used by `savez_compressed`.
    pub const fn standard() -> Self {
        CompressionAlgo::Deflate { level: None }
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self, CompressionAlgo::Store)
    }

    fn method_and_level(&self) -> (CompressionMethod, Option<i32>) {
        match *self {
            CompressionAlgo::Store => (CompressionMethod::Stored, None),
            CompressionAlgo::Deflate { level } => (CompressionMethod::Deflated, level),
            CompressionAlgo::Zstd { level } => (CompressionMethod::Zstd, level),
        }
    }
}

/// Holds the configuration of an archive write.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Compression applied to every entry.
    pub compression: CompressionAlgo,
}

impl WriteOptions {
    pub fn compressed() -> Self {
        Self { compression: CompressionAlgo::standard() }
    }

    /// Zip member options for an entry of `size` bytes. The timestamp is fixed
    /// so that equal inputs produce equal archives.
    pub(crate) fn entry_options(&self, size: u64) -> FileOptions {
        let (method, level) = self.compression.method_and_level();
        FileOptions::default()
            .compression_method(method)
            .compression_level(level)
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644)
            .large_file(size >= ZIP64_THRESHOLD)
    }
}
