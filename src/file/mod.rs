//! Access to the raw bytes of a document.
//!
//! [`File`] hides where the bytes come from behind the [`Backend`] trait: a memory-mapped
//! file on disk ([`physical::Physical`]) or a buffer already in memory
//! ([`memory::Memory`]). The reader only ever sees a `&[u8]`, so both sources load the same
//! way. [`Parser`] is the cursor the reader walks that slice with.
//!
//! # Examples
//!
//! ```rust
//! use pdfgraph::file::File;
//!
//! let file = File::from_mem(b"%PDF-1.7\n".to_vec())?;
//! assert_eq!(file.data_slice(0, 5)?, b"%PDF-");
//! assert!(File::from_mem(Vec::new()).is_err());
//! # Ok::<(), pdfgraph::Error>(())
//! ```

pub mod parser;

mod memory;
mod physical;

pub use memory::Memory;
pub use parser::{find, is_delimiter, is_regular, is_whitespace, rfind, Parser};
pub use physical::Physical;

use std::path::Path;

use crate::{Error::Empty, Result};

/// A source of document bytes.
///
/// Implementations must be thread-safe so a loaded [`File`] can be shared while several
/// documents are read from it.
pub trait Backend: Send + Sync {
    /// Returns `len` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range does not lie inside the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// The entire data buffer
    fn data(&self) -> &[u8];

    /// Total length of the data
    fn len(&self) -> usize;
}

/// Bounds-checked slicing shared by the backends
pub(crate) fn checked_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let Some(end) = offset.checked_add(len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }
    Ok(&data[offset..end])
}

/// The bytes of a document, from disk or memory.
pub struct File {
    data: Box<dyn Backend>,
}

impl File {
    /// Memory-maps the file at `path`.
    ///
    /// # Errors
    /// [`crate::Error::FileError`] if the file cannot be opened or mapped, and
    /// [`crate::Error::Empty`] if it has no content.
    pub fn from_file(path: &Path) -> Result<File> {
        Self::load(Physical::new(path)?)
    }

    /// Takes ownership of an in-memory buffer.
    ///
    /// # Errors
    /// [`crate::Error::Empty`] if `data` is empty.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        Self::load(Memory::new(data))
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }
        Ok(File {
            data: Box::new(data),
        })
    }

    /// Size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the file has no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole content
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Returns `len` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range does not lie inside the file.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File").field("len", &self.len()).finish()
    }
}
