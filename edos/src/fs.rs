//! Filesystem abstraction.
//!
//! The memory subsystems consume files through the narrow contract in
//! [`traits`]: a length, byte-granular positioned reads, and positioned
//! writes that never grow the file. The on-disk filesystem implements these
//! traits elsewhere; [`MemFile`] is the in-memory implementation used by
//! ramfs-style files and by tests.

use crate::{KernelError, sync::SpinLock};
use alloc::{sync::Arc, vec::Vec};

/// Defines traits for file system operations.
pub mod traits {
    use crate::KernelError;

    /// Trait representing a regular file in the filesystem.
    ///
    /// A regular file contains user data and supports basic read and write
    /// operations. Implementations synchronize internally; a single handle
    /// may be used from several kernel contexts at once.
    pub trait RegularFile
    where
        Self: Send + Sync,
    {
        /// Returns the size of the file in bytes.
        fn size(&self) -> usize;

        /// Reads data from the file into the provided buffer.
        ///
        /// # Parameters
        /// - `offset`: The byte offset to read from.
        /// - `buf`: A mutable slice where the file content will be stored.
        ///
        /// # Returns
        /// - `Ok(usize)`: The number of bytes read. Short reads occur only at
        ///   end of file.
        /// - `Err(KernelError)`: An error if the read operation fails.
        fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, KernelError>;

        /// Writes data from the buffer into the file.
        ///
        /// Writes never extend the file: bytes past the current end of file
        /// are discarded.
        ///
        /// # Parameters
        /// - `offset`: The byte offset to write to.
        /// - `buf`: A slice containing the data to write.
        ///
        /// # Returns
        /// - `Ok(usize)`: The number of bytes written.
        /// - `Err(KernelError)`: An error if the write operation fails.
        fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, KernelError>;
    }
}

/// A reference-counted handle to an open regular file.
///
/// Cloning the handle shares the underlying file; the file is closed when the
/// last handle is dropped.
#[derive(Clone)]
pub struct RegularFile(pub Arc<dyn traits::RegularFile>);

impl RegularFile {
    /// Creates a new [`RegularFile`] handle from a given implementation of
    /// [`traits::RegularFile`].
    pub fn new(r: impl traits::RegularFile + 'static) -> Self {
        Self(Arc::new(r))
    }

    /// Returns the size of the file in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Reads data from the file into the provided buffer.
    #[inline]
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        self.0.read_at(offset, buf)
    }

    /// Writes data from the buffer into the file.
    #[inline]
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, KernelError> {
        self.0.write_at(offset, buf)
    }
}

/// An in-memory regular file.
pub struct MemFile {
    data: SpinLock<Vec<u8>>,
}

impl MemFile {
    /// Create a file holding a copy of `content`.
    pub fn with_content(content: &[u8]) -> Self {
        Self {
            data: SpinLock::new(content.to_vec()),
        }
    }

    /// Create an empty file.
    pub fn empty() -> Self {
        Self::with_content(&[])
    }

    /// Snapshot the current file contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl traits::RegularFile for MemFile {
    fn size(&self) -> usize {
        self.data.lock().len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, KernelError> {
        let mut data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }
}
