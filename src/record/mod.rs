//! # Array-Record Codec
//!
//! Encodes one array to, and decodes it from, a self-describing binary record:
//!
//! ```text
//! "\x93NUMPY" | major | minor | header_len (u16 LE for 1.0, u32 LE for 2.0/3.0) | header | payload
//! ```
//!
//! The header is a dictionary literal (see [`header`]) padded with spaces and a
//! final `'\n'` so that the payload starts on a 64-byte boundary. The payload is
//! `product(shape) * width` raw element bytes in the array's storage order.
//!
//! Writing is deterministic: the same logical array always produces the same
//! bytes. Version 1.0 is written unless the header length needs more than 16 bits.

mod header;

use std::io::{self, Read, Write};

use tracing::trace;

use crate::common::{payload_len, Array, ArrayHandle, DType, ElementType, Order};
use crate::ArchiveError;

use header::HeaderFields;

/// Magic marker at the start of every Array-Record.
pub const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Alignment of the payload relative to the start of the record.
const ARRAY_ALIGN: usize = 64;

/// Largest header accepted by default. Headers are parsed before any payload
/// byte is read, so this bounds the work done on untrusted input.
pub const DEFAULT_MAX_HEADER_SIZE: usize = 10_000;

/// Upper bound on the up-front allocation for a payload. Larger payloads grow
/// as bytes actually arrive, so a lying header cannot force a huge allocation.
pub(crate) const PREALLOC_LIMIT: usize = 64 * 1024 * 1024;

/// Format version of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    /// u16 header length, latin-1 header.
    V1,
    /// u32 header length, latin-1 header.
    V2,
    /// u32 header length, UTF-8 header.
    V3,
}

impl FormatVersion {
    fn from_bytes(major: u8, minor: u8) -> Option<Self> {
        match (major, minor) {
            (1, 0) => Some(FormatVersion::V1),
            (2, 0) => Some(FormatVersion::V2),
            (3, 0) => Some(FormatVersion::V3),
            _ => None,
        }
    }

    fn to_bytes(self) -> [u8; 2] {
        match self {
            FormatVersion::V1 => [1, 0],
            FormatVersion::V2 => [2, 0],
            FormatVersion::V3 => [3, 0],
        }
    }

    fn len_field_size(self) -> usize {
        match self {
            FormatVersion::V1 => 2,
            FormatVersion::V2 | FormatVersion::V3 => 4,
        }
    }
}

/// Limits applied while reading records.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Header lengths above this are rejected with [`ArchiveError::Format`].
    pub max_header_size: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { max_header_size: DEFAULT_MAX_HEADER_SIZE }
    }
}

/// The decoded header of an Array-Record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: FormatVersion,
    pub dtype: DType,
    pub order: Order,
    pub shape: Vec<usize>,
}

impl RecordHeader {
    /// Describes `array`, rejecting element types the format cannot hold and
    /// buffers whose length disagrees with the shape.
    pub fn describe<A: ArrayHandle + ?Sized>(array: &A) -> Result<Self, ArchiveError> {
        let dtype = match array.element_type() {
            ElementType::Native(dtype) => DType::new(dtype.kind, dtype.byte_order),
            ElementType::Foreign(name) => return Err(ArchiveError::UnsupportedType(name)),
        };
        let shape = array.shape().to_vec();
        let expected = payload_len(&shape, dtype.width())
            .ok_or_else(|| ArchiveError::Format(format!("shape {:?} overflows", shape)))?;
        let actual = array.bytes().len();
        if actual != expected {
            return Err(ArchiveError::Format(format!(
                "buffer holds {} bytes but shape {:?} of {} needs {}",
                actual, shape, dtype, expected
            )));
        }
        Ok(Self { version: FormatVersion::V1, dtype, order: array.order(), shape })
    }

    /// Length of the payload that follows this header.
    pub fn payload_len(&self) -> Result<usize, ArchiveError> {
        payload_len(&self.shape, self.dtype.width())
            .ok_or_else(|| ArchiveError::Format(format!("shape {:?} overflows", self.shape)))
    }

    fn fields(&self) -> HeaderFields {
        HeaderFields { dtype: self.dtype, order: self.order, shape: self.shape.clone() }
    }

    /// Magic, version, length field and padded header: everything before the
    /// payload. Picks the smallest version that can hold the header.
    fn encode_prefix(&self) -> Result<Vec<u8>, ArchiveError> {
        let dict = header::render(&self.fields());
        for version in [FormatVersion::V1, FormatVersion::V2] {
            let fixed = MAGIC.len() + 2 + version.len_field_size();
            // +1 for the terminating newline
            let unpadded = fixed + dict.len() + 1;
            let padding = (ARRAY_ALIGN - unpadded % ARRAY_ALIGN) % ARRAY_ALIGN;
            let header_len = dict.len() + padding + 1;

            let len_field = match version {
                FormatVersion::V1 => match u16::try_from(header_len) {
                    Ok(len) => len.to_le_bytes().to_vec(),
                    Err(_) => continue,
                },
                _ => u32::try_from(header_len)
                    .map_err(|_| ArchiveError::Format("header exceeds 4 GiB".into()))?
                    .to_le_bytes()
                    .to_vec(),
            };

            let mut prefix = Vec::with_capacity(fixed + header_len);
            prefix.extend_from_slice(MAGIC);
            prefix.extend_from_slice(&version.to_bytes());
            prefix.extend_from_slice(&len_field);
            prefix.extend_from_slice(dict.as_bytes());
            prefix.resize(prefix.len() + padding, b' ');
            prefix.push(b'\n');
            return Ok(prefix);
        }
        Err(ArchiveError::Format("header does not fit any format version".into()))
    }
}

/// Writes one array as an Array-Record. Nothing is written if the array cannot
/// be encoded.
pub fn write_array<W, A>(mut sink: W, array: &A) -> Result<(), ArchiveError>
where
    W: Write,
    A: ArrayHandle + ?Sized,
{
    let header = RecordHeader::describe(array)?;
    let prefix = header.encode_prefix()?;
    trace!(
        descr = %header.dtype,
        shape = ?header.shape,
        header_len = prefix.len(),
        "writing array record"
    );
    sink.write_all(&prefix)?;
    sink.write_all(array.bytes())?;
    Ok(())
}

/// Encodes one array into a fresh buffer.
pub fn encode<A: ArrayHandle + ?Sized>(array: &A) -> Result<Vec<u8>, ArchiveError> {
    let mut out = Vec::new();
    write_array(&mut out, array)?;
    Ok(out)
}

/// Reads and validates a record header, leaving `source` positioned at the
/// first payload byte.
pub fn read_header<R: Read>(mut source: R, options: &ReadOptions) -> Result<RecordHeader, ArchiveError> {
    let mut magic = [0u8; 6];
    let got = read_full(&mut source, &mut magic)?;
    if got < magic.len() || &magic != MAGIC {
        return Err(ArchiveError::Format(format!(
            "missing array record magic (found {:?})",
            &magic[..got]
        )));
    }

    let mut version = [0u8; 2];
    read_exact_or_truncated(&mut source, &mut version)?;
    let version = FormatVersion::from_bytes(version[0], version[1]).ok_or_else(|| {
        ArchiveError::Format(format!(
            "unsupported record format version {}.{}",
            version[0], version[1]
        ))
    })?;

    let header_len = match version {
        FormatVersion::V1 => {
            let mut buf = [0u8; 2];
            read_exact_or_truncated(&mut source, &mut buf)?;
            u16::from_le_bytes(buf) as usize
        }
        FormatVersion::V2 | FormatVersion::V3 => {
            let mut buf = [0u8; 4];
            read_exact_or_truncated(&mut source, &mut buf)?;
            u32::from_le_bytes(buf) as usize
        }
    };
    if header_len > options.max_header_size {
        return Err(ArchiveError::Format(format!(
            "header length {} exceeds the limit of {} bytes",
            header_len, options.max_header_size
        )));
    }

    let mut raw = vec![0u8; header_len];
    read_exact_or_truncated(&mut source, &mut raw)?;
    let text = match version {
        FormatVersion::V3 => String::from_utf8(raw)
            .map_err(|e| ArchiveError::Format(format!("header is not UTF-8: {}", e)))?,
        FormatVersion::V1 | FormatVersion::V2 => {
            if !raw.is_ascii() {
                return Err(ArchiveError::Format("header is not ASCII".into()));
            }
            String::from_utf8(raw).map_err(|e| ArchiveError::Format(e.to_string()))?
        }
    };

    let fields = header::parse(text.trim_end())?;
    trace!(?version, descr = %fields.dtype, shape = ?fields.shape, "parsed record header");
    let header = RecordHeader {
        version,
        dtype: fields.dtype,
        order: fields.order,
        shape: fields.shape,
    };
    header.payload_len()?;
    Ok(header)
}

/// Reads one complete Array-Record.
pub fn read_array<R: Read>(mut source: R, options: &ReadOptions) -> Result<Array, ArchiveError> {
    let header = read_header(&mut source, options)?;
    let expected = header.payload_len()?;

    let data = read_payload(&mut source, expected)?;
    Array::from_bytes(header.dtype, header.shape, header.order, data)
}

/// Decodes one Array-Record from a byte slice. Trailing bytes are ignored.
pub fn decode(bytes: &[u8]) -> Result<Array, ArchiveError> {
    read_array(bytes, &ReadOptions::default())
}

/// True if `prefix` starts with the record magic.
pub fn is_record(prefix: &[u8]) -> bool {
    prefix.starts_with(MAGIC)
}

/// Reads until `buf` is full or the source is exhausted; returns the byte count.
/// A source that reports `UnexpectedEof` counts as exhausted.
pub(crate) fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reads exactly `len` payload bytes. Running out of input, whether by a clean
/// end of stream or an `UnexpectedEof` error, is [`ArchiveError::TruncatedData`].
pub(crate) fn read_payload<R: Read>(source: &mut R, len: usize) -> Result<Vec<u8>, ArchiveError> {
    let mut data = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    match source.take(len as u64).read_to_end(&mut data) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
        Err(e) => return Err(e.into()),
    }
    if data.len() < len {
        return Err(ArchiveError::TruncatedData {
            expected: len as u64,
            available: data.len() as u64,
        });
    }
    Ok(data)
}

pub(crate) fn read_exact_or_truncated<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<(), ArchiveError> {
    let got = read_full(source, buf)?;
    if got < buf.len() {
        return Err(ArchiveError::TruncatedData {
            expected: buf.len() as u64,
            available: got as u64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ByteOrder, ElementKind};

    fn arange_f32(shape: Vec<usize>) -> Array {
        let n: usize = shape.iter().product();
        Array::from_vec(shape, (0..n).map(|i| i as f32).collect()).unwrap()
    }

    struct ForeignArray;

    impl ArrayHandle for ForeignArray {
        fn element_type(&self) -> ElementType {
            ElementType::Foreign("object".into())
        }
        fn shape(&self) -> &[usize] {
            &[1]
        }
        fn order(&self) -> Order {
            Order::RowMajor
        }
        fn bytes(&self) -> &[u8] {
            &[0; 8]
        }
    }

    #[test]
    fn test_payload_is_64_byte_aligned() -> Result<(), ArchiveError> {
        for shape in [vec![], vec![3], vec![2, 3, 4], vec![1; 20]] {
            let a = arange_f32(shape);
            let bytes = encode(&a)?;
            assert_eq!((bytes.len() - a.as_bytes().len()) % ARRAY_ALIGN, 0);
            assert_eq!(&bytes[..6], MAGIC);
            assert_eq!(&bytes[6..8], &[1, 0]);
            assert_eq!(bytes[bytes.len() - a.as_bytes().len() - 1], b'\n');
        }
        Ok(())
    }

    #[test]
    fn test_encode_is_deterministic() -> Result<(), ArchiveError> {
        let a = arange_f32(vec![2, 3, 4]);
        assert_eq!(encode(&a)?, encode(&a.clone())?);
        Ok(())
    }

    #[test]
    fn test_roundtrip_all_kinds_and_orders() -> Result<(), ArchiveError> {
        for kind in ElementKind::ALL {
            for byte_order in [ByteOrder::Little, ByteOrder::Big] {
                for order in [Order::RowMajor, Order::ColumnMajor] {
                    let dtype = DType::new(kind, byte_order);
                    let data: Vec<u8> = (0..6 * kind.width()).map(|i| (i * 7 % 251) as u8).collect();
                    let a = Array::from_bytes(dtype, vec![2, 3], order, data)?;
                    assert_eq!(decode(&encode(&a)?)?, a);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_zero_length_and_scalar_roundtrip() -> Result<(), ArchiveError> {
        let empty = Array::from_vec::<i64>(vec![4, 0], Vec::new())?;
        let bytes = encode(&empty)?;
        assert_eq!(bytes.len() % ARRAY_ALIGN, 0);
        assert_eq!(decode(&bytes)?, empty);

        let scalar = Array::scalar(42u32);
        assert_eq!(decode(&encode(&scalar)?)?, scalar);
        Ok(())
    }

    #[test]
    fn test_foreign_type_is_rejected_before_writing() {
        let mut out = Vec::new();
        let err = write_array(&mut out, &ForeignArray).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedType(name) if name == "object"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_bad_magic_and_version() -> Result<(), ArchiveError> {
        assert!(matches!(decode(b"NOTNPY\x01\x00"), Err(ArchiveError::Format(_))));
        assert!(matches!(decode(b"\x93NU"), Err(ArchiveError::Format(_))));
        assert!(matches!(decode(b""), Err(ArchiveError::Format(_))));

        let mut bytes = encode(&arange_f32(vec![2]))?;
        bytes[6] = 9;
        assert!(matches!(decode(&bytes), Err(ArchiveError::Format(_))));
        Ok(())
    }

    #[test]
    fn test_truncated_payload() -> Result<(), ArchiveError> {
        let a = arange_f32(vec![2, 3, 4]);
        let bytes = encode(&a)?;
        let cut = &bytes[..bytes.len() - 10];
        match decode(cut) {
            Err(ArchiveError::TruncatedData { expected, available }) => {
                assert_eq!(expected, 96);
                assert_eq!(available, 86);
            }
            other => panic!("expected TruncatedData, got {:?}", other),
        }
        // cut inside the header
        assert!(matches!(decode(&bytes[..20]), Err(ArchiveError::TruncatedData { .. })));
        Ok(())
    }

    /// Yields its bytes, then fails with `UnexpectedEof` like a decompressor
    /// on a cut stream.
    struct CutShort {
        data: Vec<u8>,
        pos: usize,
    }

    impl Read for CutShort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos == self.data.len() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended early"));
            }
            let n = buf.len().min(self.data.len() - self.pos).min(7);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_unexpected_eof_is_truncation() -> Result<(), ArchiveError> {
        let bytes = encode(&arange_f32(vec![2, 3, 4]))?;

        let payload_cut = CutShort { data: bytes[..bytes.len() - 10].to_vec(), pos: 0 };
        match read_array(payload_cut, &ReadOptions::default()) {
            Err(ArchiveError::TruncatedData { expected, available }) => {
                assert_eq!(expected, 96);
                assert_eq!(available, 86);
            }
            other => panic!("expected TruncatedData, got {:?}", other),
        }

        let header_cut = CutShort { data: bytes[..20].to_vec(), pos: 0 };
        assert!(matches!(
            read_array(header_cut, &ReadOptions::default()),
            Err(ArchiveError::TruncatedData { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_deeply_nested_header_is_format_error() {
        let nested = format!("{}{}", "[".repeat(4990), "]".repeat(4990));
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(nested.len() as u16).to_le_bytes());
        bytes.extend_from_slice(nested.as_bytes());
        assert!(matches!(decode(&bytes), Err(ArchiveError::Format(_))));
    }

    #[test]
    fn test_header_limit() -> Result<(), ArchiveError> {
        let a = arange_f32(vec![1; 40]);
        let bytes = encode(&a)?;
        let strict = ReadOptions { max_header_size: 64 };
        assert!(matches!(read_array(&bytes[..], &strict), Err(ArchiveError::Format(_))));
        assert_eq!(read_array(&bytes[..], &ReadOptions::default())?, a);
        Ok(())
    }

    #[test]
    fn test_reads_version_2_and_3_headers() -> Result<(), ArchiveError> {
        let a = arange_f32(vec![3]);
        let dict = "{'descr': '<f4', 'fortran_order': False, 'shape': (3,), }\n";
        for major in [2u8, 3] {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(MAGIC);
            bytes.extend_from_slice(&[major, 0]);
            bytes.extend_from_slice(&(dict.len() as u32).to_le_bytes());
            bytes.extend_from_slice(dict.as_bytes());
            for v in [0f32, 1.0, 2.0] {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            let decoded = decode(&bytes)?;
            assert_eq!(decoded.to_vec::<f32>()?, a.to_vec::<f32>()?);
        }
        Ok(())
    }

    #[test]
    fn test_large_header_switches_to_version_2() -> Result<(), ArchiveError> {
        let shape = vec![1usize; 30_000];
        let a = Array::from_vec(shape, vec![1u8])?;
        let bytes = encode(&a)?;
        assert_eq!(&bytes[6..8], &[2, 0]);
        let relaxed = ReadOptions { max_header_size: 1 << 20 };
        assert_eq!(read_array(&bytes[..], &relaxed)?, a);
        Ok(())
    }

    #[test]
    fn test_header_reports_fields() -> Result<(), ArchiveError> {
        let a = arange_f32(vec![2, 3, 4]);
        let bytes = encode(&a)?;
        let mut cursor = &bytes[..];
        let header = read_header(&mut cursor, &ReadOptions::default())?;
        assert_eq!(header.version, FormatVersion::V1);
        assert_eq!(header.shape, vec![2, 3, 4]);
        assert_eq!(header.dtype, a.dtype());
        assert_eq!(header.payload_len()?, 96);
        assert_eq!(cursor.len(), 96);
        Ok(())
    }
}
