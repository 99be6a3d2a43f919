//! # Archive Writer
//!
//! Writes named Array-Records into a zip container. Every entry is stored as a
//! member called `<name>.npy` holding exactly one record, optionally compressed
//! according to [`WriteOptions`].

use std::collections::HashSet;
use std::io::{Seek, Write};

use serde::Serialize;
use tracing::debug;
use zip::ZipWriter;

use crate::common::ArrayHandle;
use crate::compress::WriteOptions;
use crate::object;
use crate::record::{self, RecordHeader};
use crate::ArchiveError;

/// Extension of the zip members that hold records.
pub const RECORD_EXTENSION: &str = ".npy";

/// Prefix of the names given to entries written without a name.
pub const AUTO_NAME_PREFIX: &str = "arr_";

/// Room reserved for the record header when choosing zip64 for an entry.
const HEADER_ALLOWANCE: u64 = 64 * 1024;

/// A writer responsible for constructing an array archive.
///
/// The writer owns the sink until [`ArchiveWriter::into_inner`]. Dropping an
/// unfinished writer still writes the central directory, but any error is
/// lost; call [`ArchiveWriter::finish`] to observe it.
pub struct ArchiveWriter<W: Write + Seek> {
    zip: Option<ZipWriter<W>>,
    sink: Option<W>,
    options: WriteOptions,
    names: HashSet<String>,
    /// Number of entries named automatically so far.
    auto_index: usize,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    /// Begins a new archive over `sink`.
    pub fn new(sink: W, options: WriteOptions) -> Self {
        debug!(compression = ?options.compression, "opening archive writer");
        Self {
            zip: Some(ZipWriter::new(sink)),
            sink: None,
            options,
            names: HashSet::new(),
            auto_index: 0,
        }
    }

    /// The name the next unnamed entry will get.
    pub fn next_auto_name(&self) -> String {
        format!("{}{}", AUTO_NAME_PREFIX, self.auto_index)
    }

    /// Number of entries written.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.zip.is_none()
    }

    /// Encodes `array` and appends it as a new entry.
    ///
    /// `None` names the entry `arr_<k>`, where `k` counts the unnamed entries of
    /// this writer only. A name already used in this writer fails with
    /// [`ArchiveError::DuplicateName`] and writes nothing. Once the zip member
    /// is opened the name counts as used, even if encoding into it fails.
    /// Returns the name used.
    pub fn write_entry<A>(&mut self, name: Option<&str>, array: &A) -> Result<String, ArchiveError>
    where
        A: ArrayHandle + ?Sized,
    {
        if self.zip.is_none() {
            return Err(ArchiveError::ClosedHandle);
        }
        let (name, auto) = self.resolve_name(name)?;
        // Reject unencodable arrays before a zip member is opened for them.
        RecordHeader::describe(array)?;

        let size = array.bytes().len() as u64 + HEADER_ALLOWANCE;
        let member = format!("{}{}", name, RECORD_EXTENSION);
        let options = self.options.entry_options(size);
        let zip = self.zip.as_mut().ok_or(ArchiveError::ClosedHandle)?;
        zip.start_file(member.as_str(), options)?;
        // The member exists from here on, even if writing its record fails.
        self.commit_name(&name, auto);
        let zip = self.zip.as_mut().ok_or(ArchiveError::ClosedHandle)?;
        record::write_array(&mut *zip, array)?;

        debug!(entry = %name, bytes = array.bytes().len(), "added archive entry");
        Ok(name)
    }

    /// Appends a generic object as a new entry through the object gate. Fails
    /// with [`ArchiveError::PermissionDenied`] unless `allow_pickle` is set.
    pub fn write_object<T>(
        &mut self,
        name: Option<&str>,
        value: &T,
        allow_pickle: bool,
    ) -> Result<String, ArchiveError>
    where
        T: Serialize + ?Sized,
    {
        if self.zip.is_none() {
            return Err(ArchiveError::ClosedHandle);
        }
        let (name, auto) = self.resolve_name(name)?;
        let bytes = object::encode_value(value, allow_pickle)?;

        let member = format!("{}{}", name, RECORD_EXTENSION);
        let options = self.options.entry_options(bytes.len() as u64);
        let zip = self.zip.as_mut().ok_or(ArchiveError::ClosedHandle)?;
        zip.start_file(member.as_str(), options)?;
        self.commit_name(&name, auto);
        let zip = self.zip.as_mut().ok_or(ArchiveError::ClosedHandle)?;
        zip.write_all(&bytes)?;

        debug!(entry = %name, bytes = bytes.len(), "added object entry");
        Ok(name)
    }

    fn resolve_name(&self, name: Option<&str>) -> Result<(String, bool), ArchiveError> {
        let (name, auto) = match name {
            Some("") => return Err(ArchiveError::Format("entry name must not be empty".into())),
            Some(explicit) => (explicit.to_string(), false),
            None => (self.next_auto_name(), true),
        };
        if self.names.contains(&name) {
            return Err(ArchiveError::DuplicateName(name));
        }
        Ok((name, auto))
    }

    fn commit_name(&mut self, name: &str, auto: bool) {
        self.names.insert(name.to_string());
        if auto {
            self.auto_index += 1;
        }
    }

    /// Finalizes the archive: writes the central directory and flushes the
    /// sink. Calling it again is a no-op.
    pub fn finish(&mut self) -> Result<(), ArchiveError> {
        if let Some(mut zip) = self.zip.take() {
            let mut sink = zip.finish()?;
            sink.flush()?;
            debug!(entries = self.names.len(), "archive finalized");
            self.sink = Some(sink);
        }
        Ok(())
    }

    /// Finalizes the archive if needed and returns the sink.
    pub fn into_inner(mut self) -> Result<W, ArchiveError> {
        self.finish()?;
        self.sink.take().ok_or(ArchiveError::ClosedHandle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Array;
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    fn sample(n: usize) -> Array {
        Array::from_vec(vec![n], (0..n as i32).collect()).unwrap()
    }

    fn member_names(bytes: Vec<u8>) -> Result<Vec<String>, Box<dyn std::error::Error>> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut names = Vec::new();
        for i in 0..zip.len() {
            names.push(zip.by_index(i)?.name().to_string());
        }
        Ok(names)
    }

    /// Tests that a new, empty archive can be created and finalized correctly.
    #[test]
    fn test_archive_writer_new_and_finalize_empty() -> Result<(), Box<dyn std::error::Error>> {
        let writer = ArchiveWriter::new(Cursor::new(Vec::new()), WriteOptions::default());
        let bytes = writer.into_inner()?.into_inner();
        assert!(bytes.len() >= 22, "Archive should have an end-of-directory record");
        assert!(member_names(bytes)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_auto_names_skip_explicit_entries() -> Result<(), Box<dyn std::error::Error>> {
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()), WriteOptions::default());
        assert_eq!(writer.write_entry(None, &sample(1))?, "arr_0");
        assert_eq!(writer.write_entry(Some("weights"), &sample(2))?, "weights");
        assert_eq!(writer.write_entry(None, &sample(3))?, "arr_1");
        assert_eq!(writer.len(), 3);

        let bytes = writer.into_inner()?.into_inner();
        assert_eq!(member_names(bytes)?, vec!["arr_0.npy", "weights.npy", "arr_1.npy"]);
        Ok(())
    }

    #[test]
    fn test_duplicate_names_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()), WriteOptions::default());
        writer.write_entry(Some("arr_0"), &sample(1))?;
        assert!(matches!(
            writer.write_entry(None, &sample(1)),
            Err(ArchiveError::DuplicateName(n)) if n == "arr_0"
        ));
        assert!(matches!(
            writer.write_entry(Some("arr_0"), &sample(1)),
            Err(ArchiveError::DuplicateName(_))
        ));
        // the failed auto name is not consumed
        assert_eq!(writer.next_auto_name(), "arr_0");
        assert_eq!(writer.len(), 1);
        Ok(())
    }

    #[test]
    fn test_write_after_finish_fails() -> Result<(), Box<dyn std::error::Error>> {
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()), WriteOptions::default());
        writer.write_entry(None, &sample(4))?;
        writer.finish()?;
        writer.finish()?;
        assert!(writer.is_finished());
        assert!(matches!(
            writer.write_entry(None, &sample(4)),
            Err(ArchiveError::ClosedHandle)
        ));
        assert!(matches!(
            writer.write_object(None, &1u8, true),
            Err(ArchiveError::ClosedHandle)
        ));
        Ok(())
    }

    #[test]
    fn test_entry_bytes_are_one_record() -> Result<(), Box<dyn std::error::Error>> {
        let array = sample(10);
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()), WriteOptions::compressed());
        writer.write_entry(Some("x"), &array)?;
        let bytes = writer.into_inner()?.into_inner();

        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut member = zip.by_name("x.npy")?;
        assert_eq!(member.compression(), zip::CompressionMethod::Deflated);
        let mut raw = Vec::new();
        member.read_to_end(&mut raw)?;
        assert_eq!(raw, record::encode(&array)?);
        Ok(())
    }

    /// A seekable sink that accepts only `budget` bytes.
    struct ShortSink {
        inner: Cursor<Vec<u8>>,
        budget: usize,
    }

    impl Write for ShortSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.budget == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "sink is full"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.inner.write(&buf[..n])
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Seek for ShortSink {
        fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_failed_entry_keeps_its_name() {
        let sink = ShortSink { inner: Cursor::new(Vec::new()), budget: 100 };
        let mut writer = ArchiveWriter::new(sink, WriteOptions::default());

        assert!(matches!(writer.write_entry(Some("x"), &sample(1000)), Err(ArchiveError::Io { .. })));
        assert!(matches!(
            writer.write_entry(Some("x"), &sample(1)),
            Err(ArchiveError::DuplicateName(n)) if n == "x"
        ));


        let sink = ShortSink { inner: Cursor::new(Vec::new()), budget: 100 };
        let mut writer = ArchiveWriter::new(sink, WriteOptions::default());
        assert!(writer.write_entry(None, &sample(1000)).is_err());
        assert_eq!(writer.next_auto_name(), "arr_1");
    }

    #[test]
    fn test_object_entry_requires_permission() -> Result<(), Box<dyn std::error::Error>> {
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()), WriteOptions::default());
        assert!(matches!(
            writer.write_object(Some("meta"), &vec!["a", "b"], false),
            Err(ArchiveError::PermissionDenied(_))
        ));
        assert!(writer.is_empty());
        writer.write_object(Some("meta"), &vec!["a", "b"], true)?;
        assert_eq!(writer.len(), 1);
        Ok(())
    }
}
