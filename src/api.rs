//! # Save/Load API
//!
//! The surface most callers need: [`save`] a single array, [`savez`] /
//! [`savez_compressed`] a named collection, [`load`] whatever was written.
//!
//! `allow_pickle` is a parameter of every call that may touch a generic-object
//! payload. It is never stored globally.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::archive::{ArchiveWriter, AUTO_NAME_PREFIX};
use crate::common::{Array, ArrayHandle};
use crate::compress::WriteOptions;
use crate::extract::ArchiveReader;
use crate::object::{self, Object};
use crate::record::{self, read_full, ReadOptions, RecordHeader};
use crate::ArchiveError;

/// Local file header signature of a zip member.
const ZIP_PREFIX: &[u8; 4] = b"PK\x03\x04";
/// End-of-central-directory signature; an empty zip starts with it.
const ZIP_EMPTY_PREFIX: &[u8; 4] = b"PK\x05\x06";

/// What [`load`] found in a source.
#[derive(Debug)]
pub enum Loaded<R: Read + Seek> {
    /// A bare Array-Record, or an array dumped through the object gate.
    Array(Array),
    /// A multi-entry archive, still open. Close it or let it drop.
    Archive(ArchiveReader<R>),
    /// A generic object (only with `allow_pickle`).
    Object(serde_json::Value),
}

impl<R: Read + Seek> Loaded<R> {
    /// The loaded array; fails with [`ArchiveError::Format`] for archives and
    /// generic objects.
    pub fn into_array(self) -> Result<Array, ArchiveError> {
        match self {
            Loaded::Array(array) => Ok(array),
            Loaded::Archive(_) => Err(ArchiveError::Format("source holds an archive, not a single array".into())),
            Loaded::Object(_) => Err(ArchiveError::Format("source holds a generic object, not an array".into())),
        }
    }

    /// The opened archive; fails with [`ArchiveError::Format`] otherwise.
    pub fn into_archive(self) -> Result<ArchiveReader<R>, ArchiveError> {
        match self {
            Loaded::Archive(archive) => Ok(archive),
            _ => Err(ArchiveError::Format("source does not hold an archive".into())),
        }
    }
}

/// Writes one array as a bare Array-Record, no container.
pub fn save<W, A>(sink: W, array: &A) -> Result<(), ArchiveError>
where
    W: Write,
    A: ArrayHandle + ?Sized,
{
    record::write_array(sink, array)
}

/// Writes a generic object. Fails before writing anything unless
/// `allow_pickle` is set.
pub fn save_object<W, T>(sink: W, value: &T, allow_pickle: bool) -> Result<(), ArchiveError>
where
    W: Write,
    T: Serialize + ?Sized,
{
    object::encode_object(sink, value, allow_pickle)
}

/// Serializes an array through the object gate rather than as an Array-Record.
/// Loading the result requires `allow_pickle`.
pub fn dump<W, A>(sink: W, array: &A) -> Result<(), ArchiveError>
where
    W: Write,
    A: ArrayHandle + ?Sized,
{
    object::dump_array(sink, &Array::from_handle(array)?)
}

/// Writes an uncompressed archive. Positional arrays are named `arr_0`,
/// `arr_1`, ...; `named` arrays keep their names. Returns the sink.
pub fn savez<W: Write + Seek>(
    sink: W,
    positional: &[&dyn ArrayHandle],
    named: &[(&str, &dyn ArrayHandle)],
) -> Result<W, ArchiveError> {
    savez_with(sink, positional, named, WriteOptions::default())
}

/// Like [`savez`], with every entry deflate-compressed.
pub fn savez_compressed<W: Write + Seek>(
    sink: W,
    positional: &[&dyn ArrayHandle],
    named: &[(&str, &dyn ArrayHandle)],
) -> Result<W, ArchiveError> {
    savez_with(sink, positional, named, WriteOptions::compressed())
}

/// Writes an archive with explicit options.
///
/// Names and element types are checked for every array before the first entry
/// is written: an explicit name that repeats, or that equals one of the
/// positional names, fails with [`ArchiveError::DuplicateName`].
pub fn savez_with<W: Write + Seek>(
    sink: W,
    positional: &[&dyn ArrayHandle],
    named: &[(&str, &dyn ArrayHandle)],
    options: WriteOptions,
) -> Result<W, ArchiveError> {
    let mut names: HashSet<String> = (0..positional.len())
        .map(|i| format!("{}{}", AUTO_NAME_PREFIX, i))
        .collect();
    for (name, _) in named {
        if name.is_empty() {
            return Err(ArchiveError::Format("entry name must not be empty".into()));
        }
        if !names.insert(name.to_string()) {
            return Err(ArchiveError::DuplicateName(name.to_string()));
        }
    }
    for array in positional {
        RecordHeader::describe(*array)?;
    }
    for (_, array) in named {
        RecordHeader::describe(*array)?;
    }

    debug!(
        positional = positional.len(),
        named = named.len(),
        compression = ?options.compression,
        "saving archive"
    );
    let mut writer = ArchiveWriter::new(sink, options);
    for array in positional {
        writer.write_entry(None, *array)?;
    }
    for (name, array) in named {
        writer.write_entry(Some(*name), *array)?;
    }
    writer.into_inner()
}

/// Loads whatever `source` holds, with the default read limits.
///
/// - a zip container opens as [`Loaded::Archive`];
/// - a bare Array-Record decodes to [`Loaded::Array`];
/// - anything else goes through the object gate, which refuses it unless
///   `allow_pickle` is set.
pub fn load<R: Read + Seek>(source: R, allow_pickle: bool) -> Result<Loaded<R>, ArchiveError> {
    load_with(source, allow_pickle, ReadOptions::default())
}

/// [`load`] with explicit read limits.
pub fn load_with<R: Read + Seek>(
    mut source: R,
    allow_pickle: bool,
    options: ReadOptions,
) -> Result<Loaded<R>, ArchiveError> {
    let start = source.stream_position()?;
    let mut magic = [0u8; 6];
    let got = read_full(&mut source, &mut magic)?;
    if got == 0 {
        return Err(ArchiveError::TruncatedData { expected: magic.len() as u64, available: 0 });
    }
    source.seek(SeekFrom::Start(start))?;
    let prefix = &magic[..got];

    if prefix.starts_with(ZIP_PREFIX) || prefix.starts_with(ZIP_EMPTY_PREFIX) {
        debug!("source is an archive");
        return ArchiveReader::open_with(source, allow_pickle, options).map(Loaded::Archive);
    }
    if record::is_record(prefix) {
        debug!("source is a single array record");
        return record::read_array(&mut source, &options).map(Loaded::Array);
    }
    match object::decode_object(&mut source, allow_pickle)? {
        Object::Array(array) => Ok(Loaded::Array(array)),
        Object::Value(value) => Ok(Loaded::Object(value)),
    }
}

fn with_extension(path: &Path, extension: &str) -> PathBuf {
    if path.extension().map_or(false, |ext| ext == extension) {
        return path.to_path_buf();
    }
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn create(path: &Path) -> Result<BufWriter<File>, ArchiveError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| ArchiveError::from(e).with_path(path))
}

/// Saves one array to a file, appending `.npy` to the name if it lacks that
/// extension. Returns the path written.
pub fn save_path<A: ArrayHandle + ?Sized>(path: impl AsRef<Path>, array: &A) -> Result<PathBuf, ArchiveError> {
    let path = with_extension(path.as_ref(), "npy");
    let mut out = create(&path)?;
    save(&mut out, array).map_err(|e| e.with_path(&path))?;
    out.flush().map_err(|e| ArchiveError::from(e).with_path(&path))?;
    Ok(path)
}

/// Saves an archive to a file, appending `.npz` to the name if it lacks that
/// extension. Returns the path written.
pub fn savez_path(
    path: impl AsRef<Path>,
    positional: &[&dyn ArrayHandle],
    named: &[(&str, &dyn ArrayHandle)],
) -> Result<PathBuf, ArchiveError> {
    savez_path_with(path.as_ref(), positional, named, WriteOptions::default())
}

/// [`savez_path`] with compressed entries.
pub fn savez_compressed_path(
    path: impl AsRef<Path>,
    positional: &[&dyn ArrayHandle],
    named: &[(&str, &dyn ArrayHandle)],
) -> Result<PathBuf, ArchiveError> {
    savez_path_with(path.as_ref(), positional, named, WriteOptions::compressed())
}

fn savez_path_with(
    path: &Path,
    positional: &[&dyn ArrayHandle],
    named: &[(&str, &dyn ArrayHandle)],
    options: WriteOptions,
) -> Result<PathBuf, ArchiveError> {
    let path = with_extension(path, "npz");
    let out = create(&path)?;
    let mut out = savez_with(out, positional, named, options).map_err(|e| e.with_path(&path))?;
    out.flush().map_err(|e| ArchiveError::from(e).with_path(&path))?;
    Ok(path)
}

/// Opens `path` and [`load`]s it.
pub fn load_path(
    path: impl AsRef<Path>,
    allow_pickle: bool,
) -> Result<Loaded<BufReader<File>>, ArchiveError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ArchiveError::from(e).with_path(path))?;
    load(BufReader::new(file), allow_pickle).map_err(|e| e.with_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_with_extension() {
        assert_eq!(with_extension(Path::new("a/b"), "npy"), PathBuf::from("a/b.npy"));
        assert_eq!(with_extension(Path::new("a/b.npy"), "npy"), PathBuf::from("a/b.npy"));
        assert_eq!(with_extension(Path::new("b.bin"), "npz"), PathBuf::from("b.bin.npz"));
    }

    #[test]
    fn test_empty_source_is_truncated() {
        let err = load(Cursor::new(Vec::new()), true).unwrap_err();
        assert!(matches!(err, ArchiveError::TruncatedData { expected: 6, available: 0 }));
    }

    #[test]
    fn test_load_respects_stream_offset() -> Result<(), ArchiveError> {
        let a = Array::from_vec(vec![3], vec![1u8, 2, 3])?;
        let mut bytes = b"junk".to_vec();
        save(&mut bytes, &a)?;
        let mut cursor = Cursor::new(bytes);
        cursor.seek(SeekFrom::Start(4))?;
        assert_eq!(load(cursor, false)?.into_array()?, a);
        Ok(())
    }

    #[test]
    fn test_savez_validates_before_writing() {
        let a = Array::scalar(1i8);
        let mut sink = Cursor::new(Vec::new());
        let err = savez(&mut sink, &[&a, &a], &[("arr_1", &a)]).unwrap_err();
        assert!(matches!(err, ArchiveError::DuplicateName(n) if n == "arr_1"));
        assert!(sink.get_ref().is_empty());

        let err = savez(&mut sink, &[], &[("x", &a), ("x", &a)]).unwrap_err();
        assert!(matches!(err, ArchiveError::DuplicateName(_)));
        assert!(sink.get_ref().is_empty());
    }
}
