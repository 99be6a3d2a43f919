//! # Object-Fallback Gate
//!
//! Generic (non-array) payloads are serialized with serde into a framed body
//! that cannot be mistaken for an Array-Record:
//!
//! ```text
//! "\x93NPOBJ" | 1 | 0 | body_len (u32 LE) | crc32(body) (u32 LE) | body
//! ```
//!
//! The body is a JSON document `{"kind": "array" | "value", "data": ...}`.
//!
//! Every entry point takes `allow_pickle` and checks it before touching the
//! sink or the source. With the flag unset no byte is written and no byte is
//! read, so untrusted input is never interpreted as a generic object.

use std::io::{Read, Write};

use crc32fast::Hasher as Crc32Hasher;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::Array;
use crate::record::{read_exact_or_truncated, read_full, read_payload};
use crate::ArchiveError;

/// Magic marker at the start of every generic object payload.
pub const OBJECT_MAGIC: &[u8; 6] = b"\x93NPOBJ";

const OBJECT_VERSION: [u8; 2] = [1, 0];

const DISABLED_SAVE: &str = "generic object serialization is disabled (allow_pickle is false)";
const DISABLED_LOAD: &str =
    "cannot load a generic object payload when allow_pickle is false";

/// A decoded generic payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// An array that was written through the gate (see [`dump_array`]).
    Array(Array),
    /// Any other serde value.
    Value(serde_json::Value),
}

#[derive(Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
enum EnvelopeRef<'a, T: ?Sized> {
    Array(&'a Array),
    Value(&'a T),
}

#[derive(Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
enum Envelope {
    Array(Array),
    Value(serde_json::Value),
}

/// True if `prefix` starts with the object marker.
pub fn is_object(prefix: &[u8]) -> bool {
    prefix.starts_with(OBJECT_MAGIC)
}

/// Serializes `value` as a generic object. Fails with
/// [`ArchiveError::PermissionDenied`] before writing anything unless
/// `allow_pickle` is set.
pub fn encode_object<W, T>(mut sink: W, value: &T, allow_pickle: bool) -> Result<(), ArchiveError>
where
    W: Write,
    T: Serialize + ?Sized,
{
    let bytes = encode_value(value, allow_pickle)?;
    sink.write_all(&bytes)?;
    Ok(())
}

/// Like [`encode_object`] but returns the framed bytes.
pub fn encode_value<T>(value: &T, allow_pickle: bool) -> Result<Vec<u8>, ArchiveError>
where
    T: Serialize + ?Sized,
{
    if !allow_pickle {
        return Err(ArchiveError::PermissionDenied(DISABLED_SAVE.into()));
    }
    frame(&EnvelopeRef::Value(value))
}

/// Serializes an array through the gate instead of as an Array-Record. The call
/// itself is the caller's explicit request for generic handling.
pub fn dump_array<W: Write>(mut sink: W, array: &Array) -> Result<(), ArchiveError> {
    let bytes = frame(&EnvelopeRef::<()>::Array(array))?;
    sink.write_all(&bytes)?;
    Ok(())
}

fn frame<T: Serialize + ?Sized>(envelope: &EnvelopeRef<'_, T>) -> Result<Vec<u8>, ArchiveError> {
    let body = serde_json::to_vec(envelope)?;
    let body_len = u32::try_from(body.len())
        .map_err(|_| ArchiveError::Format("generic object body exceeds 4 GiB".into()))?;
    let mut crc = Crc32Hasher::new();
    crc.update(&body);

    let mut out = Vec::with_capacity(OBJECT_MAGIC.len() + 10 + body.len());
    out.extend_from_slice(OBJECT_MAGIC);
    out.extend_from_slice(&OBJECT_VERSION);
    out.extend_from_slice(&body_len.to_le_bytes());
    out.extend_from_slice(&crc.finalize().to_le_bytes());
    out.extend_from_slice(&body);
    debug!(body_len, "encoded generic object");
    Ok(out)
}

/// Reads and verifies the framed body. Only called once the flag was checked.
fn read_body<R: Read>(mut source: R) -> Result<Vec<u8>, ArchiveError> {
    let mut magic = [0u8; 6];
    let got = read_full(&mut source, &mut magic)?;
    if got < magic.len() || &magic != OBJECT_MAGIC {
        return Err(ArchiveError::Format(
            "payload is neither an array record nor a generic object".into(),
        ));
    }
    let mut version = [0u8; 2];
    read_exact_or_truncated(&mut source, &mut version)?;
    if version != OBJECT_VERSION {
        return Err(ArchiveError::Format(format!(
            "unsupported object format version {}.{}",
            version[0], version[1]
        )));
    }
    let mut fields = [0u8; 8];
    read_exact_or_truncated(&mut source, &mut fields)?;
    let body_len = u32::from_le_bytes([fields[0], fields[1], fields[2], fields[3]]) as usize;
    let expected_crc = u32::from_le_bytes([fields[4], fields[5], fields[6], fields[7]]);

    let body = read_payload(&mut source, body_len)?;
    let mut crc = Crc32Hasher::new();
    crc.update(&body);
    if crc.finalize() != expected_crc {
        return Err(ArchiveError::Format("generic object checksum mismatch".into()));
    }
    Ok(body)
}

/// Decodes a generic object. Fails with [`ArchiveError::PermissionDenied`]
/// without reading from `source` unless `allow_pickle` is set.
pub fn decode_object<R: Read>(source: R, allow_pickle: bool) -> Result<Object, ArchiveError> {
    if !allow_pickle {
        debug!("refusing generic object payload");
        return Err(ArchiveError::PermissionDenied(DISABLED_LOAD.into()));
    }
    let body = read_body(source)?;
    let object = match serde_json::from_slice(&body)? {
        Envelope::Array(array) => Object::Array(array),
        Envelope::Value(value) => Object::Value(value),
    };
    Ok(object)
}

/// Decodes a generic object directly into `T`.
pub fn decode_object_as<T, R>(source: R, allow_pickle: bool) -> Result<T, ArchiveError>
where
    T: DeserializeOwned,
    R: Read,
{
    let value = match decode_object(source, allow_pickle)? {
        Object::Array(array) => serde_json::to_value(&array)?,
        Object::Value(value) => value,
    };
    Ok(serde_json::from_value(value)?)
}
