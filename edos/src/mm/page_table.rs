//! Per-process page table and memory permissions.
//!
//! Each process owns a [`PageTable`] mapping page-aligned virtual addresses
//! to physical frame numbers. On real hardware this structure would be the
//! radix tree the MMU walks; EdOS keeps a flat software table with the same
//! observable contract, which is all the memory subsystems above it consume:
//!
//! - [`PageTable::install`] / [`PageTable::clear`] add and remove
//!   translations,
//! - [`PageTable::translate`] answers whether an address currently resolves,
//! - [`PageTable::is_accessed`] / [`PageTable::set_accessed`] expose the
//!   per-translation accessed bit that hardware sets on every touch and that
//!   eviction policies sample and clear.
//!
//! The table carries its own lock: the eviction path inspects and clears
//! translations that belong to *other* processes while those processes may
//! concurrently fault, so callers cannot provide the exclusion themselves.

use crate::addressing::Va;
use crate::sync::SpinLock;
use alloc::collections::btree_map::BTreeMap;

bitflags::bitflags! {
    /// Possible memory permissions for a page.
    ///
    /// This defines the various permissions that can be assigned to memory
    /// pages in a page table. Each permission is represented by a single bit,
    /// allowing for efficient bitwise operations to check or modify
    /// permissions.
    pub struct Permission: usize {
        /// Page is readable.
        const READ = 1 << 0;

        /// Page is writable.
        const WRITE = 1 << 1;

        /// Page is executable.
        const EXECUTABLE = 1 << 2;

        /// Page can be referred by user application.
        const USER = 1 << 3;
    }
}

/// One installed translation.
struct Pte {
    pfn: usize,
    perm: Permission,
    accessed: bool,
}

/// A per-process virtual-to-physical translation table.
///
/// The table is shared by reference between the owning process's fault path
/// and the global eviction path, so all methods take `&self` and synchronize
/// internally.
pub struct PageTable {
    entries: SpinLock<BTreeMap<Va, Pte>>,
}

impl PageTable {
    /// Create an empty page table.
    pub fn new() -> Self {
        Self {
            entries: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Install a translation from `va` to physical frame `pfn`.
    ///
    /// The new translation starts with its accessed bit set: the access that
    /// made the translation necessary is about to be retried and would set it
    /// immediately anyway.
    ///
    /// # Panics
    /// Panics if `va` is not page-aligned or is already mapped. A double
    /// install means two frames claim the same virtual page, which is a
    /// kernel bug, not a runtime condition.
    pub fn install(&self, va: Va, pfn: usize, perm: Permission) {
        assert_eq!(va.offset(), 0, "install: unaligned address {va:?}");
        let prev = self.entries.lock().insert(
            va,
            Pte {
                pfn,
                perm,
                accessed: true,
            },
        );
        assert!(prev.is_none(), "install: {va:?} is already mapped");
    }

    /// Remove the translation for `va`, returning the frame it pointed to.
    ///
    /// Returns `None` if `va` was not mapped. Once this returns, no further
    /// access through this table can reach the frame.
    pub fn clear(&self, va: Va) -> Option<usize> {
        self.entries.lock().remove(&va).map(|pte| pte.pfn)
    }

    /// Resolve `va` to its physical frame and permissions, if mapped.
    pub fn translate(&self, va: Va) -> Option<(usize, Permission)> {
        self.entries
            .lock()
            .get(&va)
            .map(|pte| (pte.pfn, pte.perm))
    }

    /// Read the accessed bit for `va`. Unmapped addresses read as not
    /// accessed.
    pub fn is_accessed(&self, va: Va) -> bool {
        self.entries
            .lock()
            .get(&va)
            .is_some_and(|pte| pte.accessed)
    }

    /// Set or clear the accessed bit for `va`.
    ///
    /// Hardware sets the bit on every access; software (the eviction policy,
    /// or a test standing in for hardware) clears it, or sets it to simulate
    /// a touch.
    pub fn set_accessed(&self, va: Va, accessed: bool) {
        if let Some(pte) = self.entries.lock().get_mut(&va) {
            pte.accessed = accessed;
        }
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::PAGE_SIZE;

    fn va(addr: usize) -> Va {
        Va::new(addr).unwrap()
    }

    #[test]
    fn install_then_translate() {
        let pt = PageTable::new();
        pt.install(va(0x1000), 7, Permission::READ | Permission::USER);
        assert_eq!(
            pt.translate(va(0x1000)),
            Some((7, Permission::READ | Permission::USER))
        );
        assert_eq!(pt.translate(va(0x2000)), None);
    }

    #[test]
    fn clear_removes_translation() {
        let pt = PageTable::new();
        pt.install(va(0x1000), 3, Permission::READ);
        assert_eq!(pt.clear(va(0x1000)), Some(3));
        assert_eq!(pt.translate(va(0x1000)), None);
        assert_eq!(pt.clear(va(0x1000)), None);
    }

    #[test]
    fn accessed_bit_set_on_install() {
        let pt = PageTable::new();
        pt.install(va(0x3000), 1, Permission::READ);
        assert!(pt.is_accessed(va(0x3000)));
        pt.set_accessed(va(0x3000), false);
        assert!(!pt.is_accessed(va(0x3000)));
        assert!(!pt.is_accessed(va(0x4000)));
    }

    #[test]
    #[should_panic(expected = "already mapped")]
    fn double_install_panics() {
        let pt = PageTable::new();
        pt.install(va(PAGE_SIZE), 0, Permission::READ);
        pt.install(va(PAGE_SIZE), 1, Permission::READ);
    }

    #[test]
    #[should_panic(expected = "unaligned")]
    fn unaligned_install_panics() {
        let pt = PageTable::new();
        pt.install(va(0x1234), 0, Permission::READ);
    }
}
