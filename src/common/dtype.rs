//! Element types understood by the record format.
//!
//! A [`DType`] is a closed pair of [`ElementKind`] and [`ByteOrder`]. Its textual
//! form is the `descr` string stored in every record header, e.g. `'<f4'` for a
//! little-endian `f32`, `'>i8'` for a big-endian `i64`, `'|b1'` for `bool`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ArchiveError;

/// Every element kind the record codec can encode.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// IEEE 754 half precision (`half::f16`).
    Float16,
    Float32,
    Float64,
    /// Two `f32` (real, imaginary), `num_complex::Complex<f32>`.
    Complex64,
    /// Two `f64` (real, imaginary), `num_complex::Complex<f64>`.
    Complex128,
}

impl ElementKind {
    /// All supported kinds, in descriptor order.
    pub const ALL: [ElementKind; 14] = [
        ElementKind::Bool,
        ElementKind::Int8,
        ElementKind::Int16,
        ElementKind::Int32,
        ElementKind::Int64,
        ElementKind::UInt8,
        ElementKind::UInt16,
        ElementKind::UInt32,
        ElementKind::UInt64,
        ElementKind::Float16,
        ElementKind::Float32,
        ElementKind::Float64,
        ElementKind::Complex64,
        ElementKind::Complex128,
    ];

    /// Size of one element in bytes.
    pub const fn width(self) -> usize {
        match self {
            ElementKind::Bool | ElementKind::Int8 | ElementKind::UInt8 => 1,
            ElementKind::Int16 | ElementKind::UInt16 | ElementKind::Float16 => 2,
            ElementKind::Int32 | ElementKind::UInt32 | ElementKind::Float32 => 4,
            ElementKind::Int64
            | ElementKind::UInt64
            | ElementKind::Float64
            | ElementKind::Complex64 => 8,
            ElementKind::Complex128 => 16,
        }
    }

    /// Width of the scalar that is byte-swapped. Complex numbers swap each half
    /// independently.
    pub(crate) const fn swap_unit(self) -> usize {
        match self {
            ElementKind::Complex64 => 4,
            ElementKind::Complex128 => 8,
            other => other.width(),
        }
    }

    const fn type_char(self) -> char {
        match self {
            ElementKind::Bool => 'b',
            ElementKind::Int8 | ElementKind::Int16 | ElementKind::Int32 | ElementKind::Int64 => 'i',
            ElementKind::UInt8 | ElementKind::UInt16 | ElementKind::UInt32 | ElementKind::UInt64 => {
                'u'
            }
            ElementKind::Float16 | ElementKind::Float32 | ElementKind::Float64 => 'f',
            ElementKind::Complex64 | ElementKind::Complex128 => 'c',
        }
    }

    fn from_parts(type_char: char, width: usize) -> Option<Self> {
        let kind = match (type_char, width) {
            ('b', 1) | ('?', 1) => ElementKind::Bool,
            ('i', 1) => ElementKind::Int8,
            ('i', 2) => ElementKind::Int16,
            ('i', 4) => ElementKind::Int32,
            ('i', 8) => ElementKind::Int64,
            ('u', 1) => ElementKind::UInt8,
            ('u', 2) => ElementKind::UInt16,
            ('u', 4) => ElementKind::UInt32,
            ('u', 8) => ElementKind::UInt64,
            ('f', 2) => ElementKind::Float16,
            ('f', 4) => ElementKind::Float32,
            ('f', 8) => ElementKind::Float64,
            ('c', 8) => ElementKind::Complex64,
            ('c', 16) => ElementKind::Complex128,
            _ => return None,
        };
        Some(kind)
    }
}

/// Byte order of multi-byte elements.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
    /// Single-byte kinds have no byte order (`'|'`).
    NotApplicable,
}

impl ByteOrder {
    /// Byte order of the running machine.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    const fn symbol(self) -> char {
        match self {
            ByteOrder::Little => '<',
            ByteOrder::Big => '>',
            ByteOrder::NotApplicable => '|',
        }
    }
}

/// Element type of an array: kind plus byte order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DType {
    pub kind: ElementKind,
    pub byte_order: ByteOrder,
}

impl DType {
    /// Builds a dtype, normalizing the byte order: one-byte kinds never carry
    /// one, multi-byte kinds without one use the machine order.
    pub fn new(kind: ElementKind, byte_order: ByteOrder) -> Self {
        let byte_order = match (kind.width(), byte_order) {
            (1, _) => ByteOrder::NotApplicable,
            (_, ByteOrder::NotApplicable) => ByteOrder::native(),
            (_, order) => order,
        };
        Self { kind, byte_order }
    }

    /// Dtype of `kind` in the machine byte order.
    pub fn native(kind: ElementKind) -> Self {
        Self::new(kind, ByteOrder::native())
    }

    pub fn width(&self) -> usize {
        self.kind.width()
    }

    /// True when elements can be read without byte swapping on this machine.
    pub fn is_native_endian(&self) -> bool {
        matches!(self.byte_order, ByteOrder::NotApplicable) || self.byte_order == ByteOrder::native()
    }

    /// The `descr` string written into record headers.
    pub fn descr(&self) -> String {
        format!(
            "{}{}{}",
            self.byte_order.symbol(),
            self.kind.type_char(),
            self.kind.width()
        )
    }

    /// Parses a `descr` string. Well-formed descriptors of kinds this crate does
    /// not encode (strings, datetimes, extended precision, ...) are reported as
    /// [`ArchiveError::UnsupportedType`].
    pub fn from_descr(descr: &str) -> Result<Self, ArchiveError> {
        let unsupported = || ArchiveError::UnsupportedType(descr.to_string());

        let mut chars = descr.chars().peekable();
        let byte_order = match chars.peek() {
            Some('<') => Some(ByteOrder::Little),
            Some('>') => Some(ByteOrder::Big),
            Some('|') => Some(ByteOrder::NotApplicable),
            Some('=') => Some(ByteOrder::native()),
            _ => None,
        };
        if byte_order.is_some() {
            chars.next();
        }
        let type_char = chars.next().ok_or_else(unsupported)?;
        let digits: String = chars.collect();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(unsupported());
        }
        let width: usize = digits.parse().map_err(|_| unsupported())?;
        let kind = ElementKind::from_parts(type_char, width).ok_or_else(unsupported)?;

        Ok(Self::new(kind, byte_order.unwrap_or(ByteOrder::native())))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descr())
    }
}
