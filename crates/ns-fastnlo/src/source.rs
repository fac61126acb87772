//! Memory-mapped or owned bytes backing a table read.

use std::fs;
use std::ops::Deref;
use std::path::Path;

use crate::error::Result;

/// Backing storage for a table file.
///
/// `Mmap` avoids copying large coefficient tables into RAM;
/// `Owned` is used for in-memory tables and testing.
pub enum DataSource {
    /// Bytes owned in a `Vec<u8>`.
    Owned(Vec<u8>),
    /// Memory-mapped file.
    Mmap(memmap2::Mmap),
}

impl DataSource {
    /// Map the file at `path`.
    ///
    /// Empty files are read into an owned buffer since they cannot be mapped
    /// on every platform.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::File::open(path.as_ref())?;
        if file.metadata()?.len() == 0 {
            return Ok(DataSource::Owned(Vec::new()));
        }
        // SAFETY: the mapping is only read, and concurrent modification of a
        // table while it is being read is outside what the reader supports.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(DataSource::Mmap(mmap))
    }
}

impl Deref for DataSource {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        match self {
            DataSource::Owned(v) => v,
            DataSource::Mmap(m) => m,
        }
    }
}

impl AsRef<[u8]> for DataSource {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            DataSource::Owned(_) => "Owned",
            DataSource::Mmap(_) => "Mmap",
        };
        f.debug_struct("DataSource").field("kind", &kind).field("len", &self.len()).finish()
    }
}
