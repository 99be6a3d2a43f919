//! # ndarchive
//!
//! Persists multi-dimensional numeric arrays to a portable binary format and
//! restores them with their shape, element type, byte order and contents intact.
//!
//! A single array is written as an *Array-Record* (`.npy` layout). Several named
//! arrays are written as a zip *archive* (`.npz` layout) whose members each hold
//! one record, optionally compressed. Anything that is not an array goes through
//! an explicit, opt-in object path that is refused unless the caller passes
//! `allow_pickle = true`.
//!
//! ## Key Modules
//!
//! - [`common`]: element types, the [`ArrayHandle`] trait and the owned [`Array`].
//! - [`record`]: the Array-Record codec.
//! - [`archive`]: writes archives.
//! - [`extract`]: reads archives lazily.
//! - [`compress`]: per-entry compression settings.
//! - [`object`]: the generic-object gate.
//!
//! ## Examples
//!
//! ```no_run
//! use std::io::Cursor;
//! use ndarchive::{load, savez, Array, Loaded};
//!
//! # fn main() -> Result<(), ndarchive::ArchiveError> {
//! let a = Array::from_vec(vec![2, 3], (0..6).map(|i| i as f32).collect())?;
//! let b = Array::from_vec(vec![4], vec![1i64, 2, 3, 4])?;
//!
//! let bytes = savez(Cursor::new(Vec::new()), &[&a], &[("counts", &b)])?.into_inner();
//!
//! if let Loaded::Archive(mut archive) = load(Cursor::new(bytes), false)? {
//!     assert_eq!(archive.get("arr_0")?, a);
//!     assert_eq!(archive.get("counts")?, b);
//!     archive.close();
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod archive;
pub mod common;
pub mod compress;
pub mod error;
pub mod extract;
pub mod object;
pub mod record;

pub use error::{ArchiveError, Result};

pub use half::f16;
pub use num_complex::Complex;

pub use api::{
    dump, load, load_path, load_with, save, save_object, save_path, savez, savez_compressed,
    savez_compressed_path, savez_path, savez_with, Loaded,
};
pub use archive::ArchiveWriter;
pub use common::{Array, ArrayHandle, ByteOrder, DType, Element, ElementKind, ElementType, Order};
pub use compress::{CompressionAlgo, WriteOptions};
pub use extract::ArchiveReader;
pub use object::Object;
pub use record::ReadOptions;
