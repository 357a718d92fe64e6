//! # Supplemental page table
//!
//! The hardware page table answers one question: does this virtual address
//! currently translate to a frame? For demand paging the kernel needs the
//! complementary answer: when an address does *not* translate, where do its
//! bytes live, and how do we bring them back? The supplemental page table
//! records exactly that: one [`SptEntry`] per virtual page the process may
//! legally touch, keyed by page-aligned address.
//!
//! A page's data lives in exactly one place at a time, captured by
//! [`PageState`]:
//!
//! - [`PageState::NotResident`] with a [`Backing`] that says how to populate
//!   a frame: zero-fill, copy from a lazily loaded program segment, read from
//!   a swap slot, or read a window of a mapped file;
//! - [`PageState::Resident`] with the owning [`FrameId`] and an [`Origin`]
//!   that says what eviction must do with the frame's content.
//!
//! The entry itself outlives any one residency: eviction only moves the
//! state back to `NotResident`, and the entry is destroyed only by `munmap`
//! or process exit.
//!
//! ## The pin
//!
//! Each entry carries a pin flag, the per-page eviction lock. The fault path
//! *waits* for it ([`SptEntry::pin`]); the eviction path only *attempts* it
//! ([`SptEntry::try_pin`]) while scanning candidates, skipping pages that are
//! busy. The asymmetry is load-bearing: a blocking evictor could stall the
//! whole frame allocator behind one in-flight fault, and a page being
//! faulted in must never be chosen as a victim. Whoever holds the pin owns
//! the page's state transitions until [`SptEntry::unpin`].

use crate::{frame::FrameId, swap::SwapSlot};
use alloc::{collections::btree_map::BTreeMap, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};
use edos::{
    addressing::Va,
    fs::RegularFile,
    sync::{SpinLock, SpinLockGuard},
};

/// A source of program-image bytes for lazily loaded segments.
///
/// The process loader hands the paging engine one of these per loadable
/// segment instead of reading the executable up front. When a segment page
/// faults for the first time, [`LazySegment::populate`] is called with the
/// page's byte offset within the segment; the implementation must fill the
/// entire frame, zero-padding past the end of the image data.
pub trait LazySegment
where
    Self: Send + Sync,
{
    /// Fill `frame` with the segment content at `offset`.
    fn populate(&self, offset: usize, frame: &mut [u8]);
}

/// Where a non-resident page's bytes come from.
#[derive(Clone)]
pub enum Backing {
    /// A fresh anonymous page: populate by zero-filling.
    Zero,
    /// A page of a lazily loaded program segment.
    Segment {
        /// The segment image to copy from.
        seg: Arc<dyn LazySegment>,
        /// Byte offset of this page within the segment.
        offset: usize,
    },
    /// An anonymous page whose content was written out to swap.
    Swap(SwapSlot),
    /// A page of a memory-mapped file.
    File {
        /// The backing file.
        file: RegularFile,
        /// Byte offset of this page within the file.
        offset: usize,
    },
}

/// What eviction must do with a resident page's frame content.
#[derive(Clone)]
pub enum Origin {
    /// Read-only content reproducible from its backing: drop the frame and
    /// restore the backing.
    Clean(Backing),
    /// Writable anonymous content: write the frame to a fresh swap slot.
    Anonymous,
    /// File-mapped content: write the frame back to the file window.
    File {
        /// The backing file.
        file: RegularFile,
        /// Byte offset of this page within the file.
        offset: usize,
    },
}

/// The current location of a virtual page's data.
pub enum PageState {
    /// No frame; `Backing` describes how to populate one.
    NotResident(Backing),
    /// Backed by `frame`; `origin` describes the eviction obligation.
    Resident {
        /// The frame currently holding the page.
        frame: FrameId,
        /// The eviction obligation for that frame's content.
        origin: Origin,
    },
}

/// One virtual page of a process, resident or not.
pub struct SptEntry {
    va: Va,
    writable: bool,
    pinned: AtomicBool,
    state: SpinLock<PageState>,
}

impl SptEntry {
    fn new(va: Va, writable: bool, backing: Backing) -> Self {
        Self {
            va,
            writable,
            pinned: AtomicBool::new(false),
            state: SpinLock::new(PageState::NotResident(backing)),
        }
    }

    /// The page-aligned virtual address this entry describes.
    #[inline]
    pub fn va(&self) -> Va {
        self.va
    }

    /// Whether user code may write to this page.
    #[inline]
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Attempt to pin this page without blocking.
    ///
    /// Used by the eviction scan: a page that is already busy is skipped,
    /// never waited for.
    #[inline]
    pub fn try_pin(&self) -> bool {
        self.pinned
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Pin this page, waiting for any in-flight eviction or fault on it.
    pub fn pin(&self) {
        while !self.try_pin() {
            core::hint::spin_loop();
        }
    }

    /// Release the pin taken by [`pin`](Self::pin) or
    /// [`try_pin`](Self::try_pin).
    #[inline]
    pub fn unpin(&self) {
        self.pinned.store(false, Ordering::Release);
    }

    /// Whether the page is currently busy (pinned by a fault or eviction).
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    /// The frame backing this page, if resident.
    pub fn frame(&self) -> Option<FrameId> {
        match &*self.state.lock() {
            PageState::Resident { frame, .. } => Some(*frame),
            PageState::NotResident(_) => None,
        }
    }

    /// Whether the page is currently resident.
    pub fn is_resident(&self) -> bool {
        self.frame().is_some()
    }

    pub(crate) fn lock_state(&self) -> SpinLockGuard<'_, PageState> {
        self.state.lock()
    }
}

/// Per-process map from virtual page to [`SptEntry`].
///
/// The map's *shape* (which pages exist) changes only through the mapping
/// operations and process teardown; the fault path only moves existing
/// entries between states. Inserting over an existing page is a contract
/// violation; overlap must be rejected at the mapping boundary, before any
/// entry is created.
pub struct SupplementalPageTable {
    entries: SpinLock<BTreeMap<Va, Arc<SptEntry>>>,
}

impl SupplementalPageTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Look up the entry for page-aligned `va`.
    pub fn lookup(&self, va: Va) -> Option<Arc<SptEntry>> {
        self.entries.lock().get(&va).cloned()
    }

    /// Whether an entry exists for page-aligned `va`.
    pub fn contains(&self, va: Va) -> bool {
        self.entries.lock().contains_key(&va)
    }

    /// Create the entry for `va`.
    ///
    /// # Panics
    /// Panics if `va` is not page-aligned or already has an entry.
    pub fn insert(&self, va: Va, writable: bool, backing: Backing) -> Arc<SptEntry> {
        assert_eq!(va.offset(), 0, "spt insert: unaligned address {va:?}");
        let entry = Arc::new(SptEntry::new(va, writable, backing));
        let prev = self.entries.lock().insert(va, Arc::clone(&entry));
        assert!(prev.is_none(), "spt insert: {va:?} already has an entry");
        entry
    }

    /// Remove and return the entry for `va`.
    ///
    /// # Panics
    /// Panics if no entry exists; removing an unmapped page is a kernel bug.
    pub fn remove(&self, va: Va) -> Arc<SptEntry> {
        self.entries
            .lock()
            .remove(&va)
            .unwrap_or_else(|| panic!("spt remove: no entry for {va:?}"))
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drain every entry, for process teardown.
    pub(crate) fn take_all(&self) -> Vec<Arc<SptEntry>> {
        let mut entries = self.entries.lock();
        let drained = core::mem::take(&mut *entries);
        drained.into_values().collect()
    }
}

impl Default for SupplementalPageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edos::addressing::PAGE_SIZE;

    fn va(addr: usize) -> Va {
        Va::new(addr).unwrap()
    }

    #[test]
    fn insert_lookup_remove() {
        let spt = SupplementalPageTable::new();
        assert!(spt.is_empty());
        let entry = spt.insert(va(0x1000), true, Backing::Zero);
        assert_eq!(entry.va(), va(0x1000));
        assert!(entry.writable());
        assert!(!entry.is_resident());

        let found = spt.lookup(va(0x1000)).expect("entry should exist");
        assert!(Arc::ptr_eq(&entry, &found));
        assert!(spt.lookup(va(0x2000)).is_none());

        let removed = spt.remove(va(0x1000));
        assert!(Arc::ptr_eq(&entry, &removed));
        assert!(spt.is_empty());
    }

    #[test]
    #[should_panic(expected = "already has an entry")]
    fn double_insert_panics() {
        let spt = SupplementalPageTable::new();
        spt.insert(va(PAGE_SIZE), false, Backing::Zero);
        spt.insert(va(PAGE_SIZE), true, Backing::Zero);
    }

    #[test]
    #[should_panic(expected = "no entry for")]
    fn remove_missing_panics() {
        let spt = SupplementalPageTable::new();
        spt.remove(va(0x5000));
    }

    #[test]
    fn pin_is_exclusive() {
        let spt = SupplementalPageTable::new();
        let entry = spt.insert(va(0x1000), true, Backing::Zero);
        assert!(entry.try_pin());
        assert!(entry.is_pinned());
        assert!(!entry.try_pin());
        entry.unpin();
        assert!(entry.try_pin());
        entry.unpin();
    }
}
