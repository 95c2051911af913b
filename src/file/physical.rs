//! Memory-mapped file backend.
//!
//! Mapping the file lets the reader jump between `startxref`, the cross-reference data and
//! object offsets without reading the whole file up front; the operating system pages in
//! what is touched.

use super::{checked_slice, Backend};
use crate::{
    Error::{Error, FileError},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A document file mapped into memory.
///
/// The file must not be truncated by another process while it is mapped.
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Opens and maps the file at `path`.
    ///
    /// # Errors
    /// [`crate::Error::FileError`] if the file cannot be opened, [`crate::Error::Error`] if
    /// mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path).map_err(FileError)?;
        Self::from_std_file(&file)
    }

    /// Maps an already open file.
    ///
    /// # Errors
    /// [`crate::Error::Error`] if mapping fails.
    pub fn from_std_file(file: &fs::File) -> Result<Physical> {
        // SAFETY: the mapping is read-only and callers are told not to truncate the file
        let mmap = unsafe { Mmap::map(file) }.map_err(|error| Error(error.to_string()))?;
        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        checked_slice(&self.data, offset, len)
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn physical() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(b"%PDF-1.5\n1 0 obj\nnull\nendobj\n").unwrap();
        temp.flush().unwrap();

        let physical = Physical::new(temp.path()).unwrap();
        assert_eq!(physical.len(), 29);
        assert_eq!(physical.data_slice(9, 7).unwrap(), b"1 0 obj");
        assert!(physical.data_slice(usize::MAX, 1).is_err());
        assert!(physical.data_slice(20, 10).is_err());
    }

    #[test]
    fn test_physical_invalid_file_path() {
        let result = Physical::new("/nonexistent/path/to/file.pdf");
        match result {
            Err(FileError(io_error)) => {
                assert_eq!(io_error.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected FileError"),
        }
    }
}
