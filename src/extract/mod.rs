//! # Archive Reader
//!
//! Opens an array archive and decodes its entries lazily. Opening reads only the
//! container's central directory; an entry's record is decoded when it is asked
//! for by name.

use std::io::{self, Read, Seek};

use tracing::{debug, warn};
use zip::ZipArchive;

use crate::archive::RECORD_EXTENSION;
use crate::common::Array;
use crate::object::{self, Object};
use crate::record::{self, read_full, ReadOptions, PREALLOC_LIMIT};
use crate::ArchiveError;

/// A single entry in the reader's index.
#[derive(Debug, Clone)]
struct IndexEntry {
    /// Name the entry is looked up by (member name without `.npy`).
    key: String,
    /// Full zip member name.
    member: String,
    /// Position of the member in the container.
    position: usize,
}

/// A reader for array archives.
///
/// Holds the open source plus an index of entry names. Use
/// [`ArchiveReader::scoped`] to have the archive closed on every exit path, or
/// call [`ArchiveReader::close`] explicitly. A closed reader lists no keys and
/// fails every lookup with [`ArchiveError::ClosedHandle`].
pub struct ArchiveReader<R: Read + Seek> {
    zip: Option<ZipArchive<R>>,
    index: Vec<IndexEntry>,
    allow_pickle: bool,
    options: ReadOptions,
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Opens an archive with the default read limits.
    ///
    /// `allow_pickle` is applied to every generic-object entry read through this
    /// reader.
    pub fn open(source: R, allow_pickle: bool) -> Result<Self, ArchiveError> {
        Self::open_with(source, allow_pickle, ReadOptions::default())
    }

    /// Opens an archive, reading the container index without decoding any entry.
    pub fn open_with(source: R, allow_pickle: bool, options: ReadOptions) -> Result<Self, ArchiveError> {
        let mut zip = ZipArchive::new(source)?;
        let mut index = Vec::with_capacity(zip.len());
        for position in 0..zip.len() {
            let member = zip.by_index_raw(position)?.name().to_string();
            if member.ends_with('/') {
                warn!(%member, "skipping directory member");
                continue;
            }
            let key = member
                .strip_suffix(RECORD_EXTENSION)
                .unwrap_or(&member)
                .to_string();
            index.push(IndexEntry { key, member, position });
        }
        debug!(entries = index.len(), allow_pickle, "opened archive");
        Ok(Self { zip: Some(zip), index, allow_pickle, options })
    }

    /// Opens an archive, runs `f` on it and closes it again, also when `f`
    /// fails or panics.
    pub fn scoped<T, F>(source: R, allow_pickle: bool, f: F) -> Result<T, ArchiveError>
    where
        F: FnOnce(&mut ArchiveReader<R>) -> Result<T, ArchiveError>,
    {
        let archive = Self::open(source, allow_pickle)?;
        let mut guard = scopeguard::guard(archive, |mut archive| archive.close());
        f(&mut *guard)
    }

    /// Entry names in container order. Empty once closed.
    pub fn keys(&self) -> Vec<&str> {
        self.index.iter().map(|e| e.key.as_str()).collect()
    }

    /// True if `name` (with or without the `.npy` suffix) is an entry.
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.zip.is_none()
    }

    pub fn allow_pickle(&self) -> bool {
        self.allow_pickle
    }

    fn find(&self, name: &str) -> Option<&IndexEntry> {
        self.index
            .iter()
            .find(|e| e.key == name)
            .or_else(|| self.index.iter().find(|e| e.member == name))
    }

    fn locate(&mut self, name: &str) -> Result<(&mut ZipArchive<R>, usize), ArchiveError> {
        if self.zip.is_none() {
            return Err(ArchiveError::ClosedHandle);
        }
        let position = self
            .find(name)
            .map(|e| e.position)
            .ok_or_else(|| ArchiveError::KeyNotFound(name.to_string()))?;
        let zip = self.zip.as_mut().ok_or(ArchiveError::ClosedHandle)?;
        Ok((zip, position))
    }

    /// Decodes the entry called `name` into an array.
    ///
    /// Entries written through the object gate are accepted when the reader was
    /// opened with `allow_pickle` and the object is an array.
    pub fn get(&mut self, name: &str) -> Result<Array, ArchiveError> {
        match self.get_object(name)? {
            Object::Array(array) => Ok(array),
            Object::Value(_) => Err(ArchiveError::Format(format!(
                "entry '{}' holds a generic object, not an array",
                name
            ))),
        }
    }

    /// Decodes the entry called `name`, whether it holds an Array-Record or a
    /// generic object. Anything that is not an Array-Record goes through the
    /// object gate with this reader's `allow_pickle`.
    pub fn get_object(&mut self, name: &str) -> Result<Object, ArchiveError> {
        let allow_pickle = self.allow_pickle;
        let options = self.options.clone();
        let (zip, position) = self.locate(name)?;
        let mut member = zip.by_index(position)?;
        debug!(entry = %name, compressed = member.compressed_size(), "decoding archive entry");

        let mut magic = [0u8; 6];
        let got = read_full(&mut member, &mut magic)?;
        let mut stream = (&magic[..got]).chain(&mut member);
        let decoded = if record::is_record(&magic[..got]) {
            Object::Array(record::read_array(&mut stream, &options)?)
        } else {
            object::decode_object(&mut stream, allow_pickle)?
        };
        // Reading to the end makes the container verify the member checksum.
        io::copy(&mut stream, &mut io::sink())?;
        Ok(decoded)
    }

    /// Raw bytes of the entry called `name`, without decoding.
    pub fn get_bytes(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let (zip, position) = self.locate(name)?;
        let mut member = zip.by_index(position)?;
        let mut bytes = Vec::with_capacity(member.size().min(PREALLOC_LIMIT as u64) as usize);
        member.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Releases the underlying source. Idempotent and infallible.
    pub fn close(&mut self) {
        if self.zip.take().is_some() {
            debug!(entries = self.index.len(), "closed archive");
        }
        self.index.clear();
    }

    /// Closes the archive and hands back the source, if it was still open.
    pub fn into_inner(mut self) -> Option<R> {
        self.index.clear();
        self.zip.take().map(ZipArchive::into_inner)
    }
}

impl<R: Read + Seek> std::fmt::Debug for ArchiveReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("keys", &self.keys())
            .field("closed", &self.is_closed())
            .field("allow_pickle", &self.allow_pickle)
            .finish()
    }
}
