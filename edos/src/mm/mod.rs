//! Memory Management.
//!
//! This module implements functionality for memory management operations such
//! as allocating and deallocating memory. The core abstraction is the
//! [`Page`], which represents a single memory page.
//!
//! Memory allocation and deallocation in EdOS is closely tied to Rust's
//! ownership and lifetime system: a page is allocated by creating an instance
//! of the [`Page`] struct. Once the [`Page`] instance is dropped, the memory
//! is automatically freed, ensuring proper memory management and preventing
//! memory leaks.
pub mod page_table;

use crate::addressing::PAGE_SIZE;
use alloc::boxed::Box;

/// A representation of a memory page.
///
/// The [`Page`] struct encapsulates a single zero-initialized memory page,
/// providing methods to access and manipulate its contents.
///
/// ## Example:
/// ```
/// # use edos::mm::Page;
/// let mut page = Page::new();
/// page.inner_mut()[0] = 0xEE;
/// assert_eq!(page.inner()[0], 0xEE);
/// ```
pub struct Page {
    inner: Box<[u8; PAGE_SIZE]>,
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Page {
    /// Allocate a new zero-filled page.
    ///
    /// Allocation failure is fatal: a kernel that cannot allocate a page of
    /// bookkeeping memory has no recovery path.
    #[inline]
    pub fn new() -> Self {
        let boxed: Box<[u8]> = alloc::vec![0u8; PAGE_SIZE].into_boxed_slice();
        match boxed.try_into() {
            Ok(inner) => Self { inner },
            Err(_) => unreachable!("page allocation produced a wrong-sized buffer"),
        }
    }

    /// Get a reference to the underlying slice of the page (read-only).
    ///
    /// This method allows access to the contents of the page as a byte slice.
    /// The caller can read from the page's memory, but cannot modify it.
    pub fn inner(&self) -> &[u8] {
        &self.inner[..]
    }

    /// Get a mutable reference to the underlying slice of the page.
    ///
    /// This method allows modification of the contents of the page as a byte
    /// slice. The caller can read from and write to the page's memory.
    pub fn inner_mut(&mut self) -> &mut [u8] {
        &mut self.inner[..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_page_is_zeroed() {
        let page = Page::new();
        assert_eq!(page.inner().len(), PAGE_SIZE);
        assert!(page.inner().iter().all(|&b| b == 0));
    }
}
