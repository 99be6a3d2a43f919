use std::mem;

use half::f16;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use super::{element_count, payload_len, ArrayHandle, ByteOrder, DType, ElementKind, ElementType, Order};
use crate::ArchiveError;

mod private {
    pub trait Sealed {}
}

/// Rust scalar types that map onto an [`ElementKind`].
pub trait Element: Copy + private::Sealed {
    const KIND: ElementKind;

    /// Appends the value in machine byte order.
    fn append_native(self, out: &mut Vec<u8>);

    /// Reads one value from exactly `KIND.width()` bytes stored in `order`.
    fn read_from(bytes: &[u8], order: ByteOrder) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $kind:expr),* $(,)?) => {$(
        impl private::Sealed for $ty {}

        impl Element for $ty {
            const KIND: ElementKind = $kind;

            fn append_native(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn read_from(bytes: &[u8], order: ByteOrder) -> Self {
                let mut raw = [0u8; mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                match order {
                    ByteOrder::Little => <$ty>::from_le_bytes(raw),
                    ByteOrder::Big => <$ty>::from_be_bytes(raw),
                    ByteOrder::NotApplicable => <$ty>::from_ne_bytes(raw),
                }
            }
        }
    )*};
}

impl_element! {
    i8 => ElementKind::Int8,
    i16 => ElementKind::Int16,
    i32 => ElementKind::Int32,
    i64 => ElementKind::Int64,
    u8 => ElementKind::UInt8,
    u16 => ElementKind::UInt16,
    u32 => ElementKind::UInt32,
    u64 => ElementKind::UInt64,
    f16 => ElementKind::Float16,
    f32 => ElementKind::Float32,
    f64 => ElementKind::Float64,
}

// Real and imaginary parts are stored back to back, each in the array's byte order.
macro_rules! impl_complex_element {
    ($($part:ty => $kind:expr),* $(,)?) => {$(
        impl private::Sealed for Complex<$part> {}

        impl Element for Complex<$part> {
            const KIND: ElementKind = $kind;

            fn append_native(self, out: &mut Vec<u8>) {
                self.re.append_native(out);
                self.im.append_native(out);
            }

            fn read_from(bytes: &[u8], order: ByteOrder) -> Self {
                let (re, im) = bytes.split_at(mem::size_of::<$part>());
                Complex::new(<$part>::read_from(re, order), <$part>::read_from(im, order))
            }
        }
    )*};
}

impl_complex_element! {
    f32 => ElementKind::Complex64,
    f64 => ElementKind::Complex128,
}

impl private::Sealed for bool {}

impl Element for bool {
    const KIND: ElementKind = ElementKind::Bool;

    fn append_native(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn read_from(bytes: &[u8], _order: ByteOrder) -> Self {
        bytes[0] != 0
    }
}

/// An owned, immutable array: dtype, shape, storage order and raw element bytes.
///
/// The invariant `bytes.len() == product(shape) * dtype.width()` holds for every
/// value of this type, including deserialized ones.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "ArrayParts")]
pub struct Array {
    dtype: DType,
    shape: Vec<usize>,
    order: Order,
    data: Vec<u8>,
}

#[derive(Deserialize)]
struct ArrayParts {
    dtype: DType,
    shape: Vec<usize>,
    order: Order,
    data: Vec<u8>,
}

impl TryFrom<ArrayParts> for Array {
    type Error = ArchiveError;

    fn try_from(parts: ArrayParts) -> Result<Self, Self::Error> {
        Array::from_bytes(parts.dtype, parts.shape, parts.order, parts.data)
    }
}

impl Array {
    /// Builds an array from raw element bytes, checking the length invariant.
    pub fn from_bytes(
        dtype: DType,
        shape: Vec<usize>,
        order: Order,
        data: Vec<u8>,
    ) -> Result<Self, ArchiveError> {
        let dtype = DType::new(dtype.kind, dtype.byte_order);
        let expected = payload_len(&shape, dtype.width())
            .ok_or_else(|| ArchiveError::Format(format!("shape {:?} overflows", shape)))?;
        if data.len() != expected {
            return Err(ArchiveError::Format(format!(
                "array of shape {:?} and dtype {} needs {} bytes, got {}",
                shape,
                dtype,
                expected,
                data.len()
            )));
        }
        Ok(Self { dtype, shape, order, data })
    }

    /// Builds a row-major array in machine byte order from typed values.
    pub fn from_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Result<Self, ArchiveError> {
        let count = element_count(&shape)
            .ok_or_else(|| ArchiveError::Format(format!("shape {:?} overflows", shape)))?;
        if count != values.len() {
            return Err(ArchiveError::Format(format!(
                "shape {:?} holds {} elements, got {}",
                shape,
                count,
                values.len()
            )));
        }
        let mut data = Vec::with_capacity(count * T::KIND.width());
        for value in values {
            value.append_native(&mut data);
        }
        Ok(Self {
            dtype: DType::native(T::KIND),
            shape,
            order: Order::RowMajor,
            data,
        })
    }

    /// Copies any array handle into an owned array.
    pub fn from_handle<A: ArrayHandle + ?Sized>(handle: &A) -> Result<Self, ArchiveError> {
        let dtype = match handle.element_type() {
            ElementType::Native(dtype) => dtype,
            ElementType::Foreign(name) => return Err(ArchiveError::UnsupportedType(name)),
        };
        Self::from_bytes(dtype, handle.shape().to_vec(), handle.order(), handle.bytes().to_vec())
    }

    /// A zero-dimensional array holding one value.
    pub fn scalar<T: Element>(value: T) -> Self {
        let mut data = Vec::with_capacity(T::KIND.width());
        value.append_native(&mut data);
        Self {
            dtype: DType::native(T::KIND),
            shape: Vec::new(),
            order: Order::RowMajor,
            data,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.width()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Reads the elements as `T`, in storage order, converting from the stored
    /// byte order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, ArchiveError> {
        if T::KIND != self.dtype.kind {
            return Err(ArchiveError::UnsupportedType(format!(
                "cannot read {} elements as {}",
                self.dtype,
                std::any::type_name::<T>()
            )));
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.width())
            .map(|chunk| T::read_from(chunk, self.dtype.byte_order))
            .collect())
    }

    /// Returns a copy whose elements are in machine byte order.
    pub fn to_native_endian(&self) -> Array {
        if self.dtype.is_native_endian() {
            return self.clone();
        }
        let unit = self.dtype.kind.swap_unit();
        let mut data = self.data.clone();
        for scalar in data.chunks_exact_mut(unit) {
            scalar.reverse();
        }
        Array {
            dtype: DType::native(self.dtype.kind),
            shape: self.shape.clone(),
            order: self.order,
            data,
        }
    }
}

impl ArrayHandle for Array {
    fn element_type(&self) -> ElementType {
        ElementType::Native(self.dtype)
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn order(&self) -> Order {
        self.order
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }
}
