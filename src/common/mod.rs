//! Common types module.
// Array handle abstraction, element types and the owned array shared by the codec,
// the archive writer/reader and the object gate.

mod array;
mod dtype;

pub use array::{Array, Element};
pub use dtype::{ByteOrder, DType, ElementKind};

use serde::{Deserialize, Serialize};

/// Memory layout of the element bytes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Order {
    /// C order: the last index varies fastest.
    #[default]
    RowMajor,
    /// Fortran order: the first index varies fastest.
    ColumnMajor,
}

impl Order {
    pub fn is_fortran(self) -> bool {
        matches!(self, Order::ColumnMajor)
    }
}

/// Element type reported by an array handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    /// A kind the record format stores natively.
    Native(DType),
    /// Anything else the array engine knows about (strings, object references,
    /// datetimes, ...). Carries the engine's name for the type.
    Foreign(String),
}

/// The view of an array that the codec consumes.
///
/// Implement this for an external array engine to save its arrays without
/// copying them into an [`Array`] first. `bytes()` must be contiguous and laid
/// out according to `order()`.
pub trait ArrayHandle {
    fn element_type(&self) -> ElementType;
    fn shape(&self) -> &[usize];
    fn order(&self) -> Order;
    fn bytes(&self) -> &[u8];
}

impl<T: ArrayHandle + ?Sized> ArrayHandle for &T {
    fn element_type(&self) -> ElementType {
        (**self).element_type()
    }
    fn shape(&self) -> &[usize] {
        (**self).shape()
    }
    fn order(&self) -> Order {
        (**self).order()
    }
    fn bytes(&self) -> &[u8] {
        (**self).bytes()
    }
}

/// Number of elements described by `shape`; `None` on overflow. An empty shape
/// is a scalar and holds one element.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// Payload length in bytes for `shape` elements of `width` bytes.
pub(crate) fn payload_len(shape: &[usize], width: usize) -> Option<usize> {
    element_count(shape)?.checked_mul(width)
}
