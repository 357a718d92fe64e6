//! # Frame table and clock eviction
//!
//! Physical frames are the one globally shared, scarce resource in the
//! memory subsystem. The [`FrameTable`] owns all of them: a fixed arena
//! created at kernel startup, where a [`FrameId`] is a stable index and each
//! slot records which process's page currently lives there. Frame contents
//! sit behind a per-slot lock so that eviction and population I/O never hold
//! the table-wide lock.
//!
//! [`FrameTable::alloc`] never fails. When the free list is empty it evicts
//! exactly one victim, synchronously, blocking the faulting context for the
//! duration of the flush. Other contexts keep making progress because the
//! flush runs outside the table lock. Frames reclaimed this way are recycled
//! in place: the slot changes owner, it never leaves the arena.
//!
//! ## Victim selection
//!
//! A single clock hand sweeps the arena in index order, wrapping. Each
//! candidate whose accessed bit is set gets a second chance: the bit is
//! cleared and the hand moves on. The first candidate found with the bit
//! clear is the victim. With `n` frames the sweep terminates within `2n`
//! steps: the first pass can at worst clear every bit, and the second must
//! then find one clear. Frames that are reserved (mid-install) or whose page is
//! pinned by another context are stepped over without consuming their second
//! chance.
//!
//! Locking order here: a page pin is taken *outside* the table lock on the
//! fault path, and only tried (never waited for) *inside* the table lock on
//! the eviction path. That asymmetry is what makes the order deadlock-free.

use crate::{
    mmap,
    page::{Backing, Origin, PageState, SptEntry},
    swap::SwapStore,
};
use alloc::{boxed::Box, sync::Arc, vec::Vec};
use edos::{
    mm::{Page, page_table::PageTable},
    sync::SpinLock,
};
use log::{debug, trace};

/// Process identifier, assigned by the process layer.
pub type Pid = usize;

/// Stable index of a frame in the arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FrameId(pub(crate) usize);

impl FrameId {
    /// The raw arena index; also the frame number stored in page tables.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// The page a frame currently backs, with everything eviction needs to reach
/// it: the owning process's page table (to clear the translation and sample
/// the accessed bit) and the page's [`SptEntry`] (the back-reference of the
/// frame ↔ page pair).
#[derive(Clone)]
pub struct FrameOwner {
    /// Owning process.
    pub pid: Pid,
    /// The owner's page table.
    pub page_table: Arc<PageTable>,
    /// The supplemental-page-table entry this frame backs.
    pub entry: Arc<SptEntry>,
}

#[derive(Default)]
struct FrameEntry {
    owner: Option<FrameOwner>,
    /// Excluded from eviction candidacy while an install is in flight.
    reserved: bool,
}

struct FrameTableInner {
    entries: Vec<FrameEntry>,
    free: Vec<usize>,
    /// The clock hand: index of the next eviction candidate.
    hand: usize,
}

/// The global pool of physical frames.
pub struct FrameTable {
    /// Frame contents, lockable independently of the table bookkeeping.
    mem: Box<[SpinLock<Page>]>,
    inner: SpinLock<FrameTableInner>,
}

impl FrameTable {
    /// Create a pool of `nframes` frames.
    pub fn new(nframes: usize) -> Self {
        assert!(nframes > 0, "frame pool cannot be empty");
        let mem = (0..nframes)
            .map(|_| SpinLock::new(Page::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let mut entries = Vec::with_capacity(nframes);
        entries.resize_with(nframes, FrameEntry::default);
        Self {
            mem,
            inner: SpinLock::new(FrameTableInner {
                entries,
                // Reversed so frames hand out in index order.
                free: (0..nframes).rev().collect(),
                hand: 0,
            }),
        }
    }

    /// Total number of frames in the pool.
    pub fn capacity(&self) -> usize {
        self.mem.len()
    }

    /// Number of frames currently on the free list.
    pub fn free_frames(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Obtain a frame for `owner`, evicting a victim if the pool is empty.
    ///
    /// The returned frame is *reserved*: it cannot be chosen as an eviction
    /// victim until the caller finishes installing it and calls
    /// [`unreserve`](Self::unreserve). This call never fails; under memory
    /// pressure it blocks until a victim has been flushed.
    pub fn alloc(&self, swap: &SwapStore, owner: FrameOwner) -> FrameId {
        loop {
            let victim = {
                let mut inner = self.inner.lock();
                if let Some(index) = inner.free.pop() {
                    let entry = &mut inner.entries[index];
                    debug_assert!(entry.owner.is_none());
                    entry.owner = Some(owner);
                    entry.reserved = true;
                    trace!("frame {index}: allocated from free list");
                    return FrameId(index);
                }
                self.select_victim(&mut inner)
            };
            // Flush I/O runs with no table lock held; only the victim page's
            // pin (taken during selection) protects it.
            if let Some((id, victim)) = victim {
                self.flush_victim(swap, id, &victim);
                victim.entry.unpin();
                let mut inner = self.inner.lock();
                let entry = &mut inner.entries[id.0];
                debug_assert!(entry.reserved);
                entry.owner = Some(owner);
                trace!("frame {}: recycled", id.0);
                return id;
            }
            // Every frame was reserved or pinned; let the owners finish.
            core::hint::spin_loop();
        }
    }

    /// One bounded clock sweep. On success the victim is pinned, reserved,
    /// and already unmapped from its owner's page table; the hand has moved
    /// past it.
    fn select_victim(&self, inner: &mut FrameTableInner) -> Option<(FrameId, FrameOwner)> {
        let n = inner.entries.len();
        for _ in 0..2 * n {
            let index = inner.hand;
            inner.hand = (inner.hand + 1) % n;

            if inner.entries[index].reserved {
                continue;
            }
            let Some(owner) = inner.entries[index].owner.clone() else {
                continue;
            };
            // Busy pages are skipped, not waited for, and keep their chance.
            if !owner.entry.try_pin() {
                continue;
            }
            let va = owner.entry.va();
            if owner.page_table.is_accessed(va) {
                // Second chance.
                owner.page_table.set_accessed(va, false);
                owner.entry.unpin();
                continue;
            }

            // Victim: unmap immediately so no further access can touch the
            // frame while its content is in flight.
            inner.entries[index].owner = None;
            inner.entries[index].reserved = true;
            let cleared = owner.page_table.clear(va);
            debug_assert_eq!(cleared, Some(index));
            debug!("evicting frame {index} ({va:?}, pid {})", owner.pid);
            return Some((FrameId(index), owner));
        }
        None
    }

    /// Persist the victim's content as its [`Origin`] demands and move its
    /// page to the matching non-resident state. Called with the page pinned
    /// and no table lock held.
    fn flush_victim(&self, swap: &SwapStore, id: FrameId, victim: &FrameOwner) {
        let origin = match &*victim.entry.lock_state() {
            PageState::Resident { frame, origin } => {
                debug_assert_eq!(*frame, id);
                origin.clone()
            }
            PageState::NotResident(_) => unreachable!("victim frame backs a non-resident page"),
        };
        let backing = match origin {
            // Reproducible content: drop the frame, restore the backing.
            Origin::Clean(backing) => backing,
            Origin::Anonymous => {
                let slot = swap.alloc();
                let frame = self.mem[id.0].lock();
                swap.write(slot, frame.inner());
                Backing::Swap(slot)
            }
            Origin::File { file, offset } => {
                let frame = self.mem[id.0].lock();
                mmap::write_window(&file, offset, frame.inner());
                Backing::File { file, offset }
            }
        };
        *victim.entry.lock_state() = PageState::NotResident(backing);
    }

    /// Return a frame to the free pool.
    ///
    /// # Panics
    /// Panics if the frame is not currently owned; releasing a free frame is
    /// a kernel bug.
    pub fn release(&self, id: FrameId) {
        let mut inner = self.inner.lock();
        let entry = &mut inner.entries[id.0];
        assert!(
            entry.owner.is_some(),
            "release of unowned frame {}",
            id.0
        );
        entry.owner = None;
        entry.reserved = false;
        inner.free.push(id.0);
    }

    /// Make a freshly installed frame eligible for eviction again.
    pub(crate) fn unreserve(&self, id: FrameId) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.entries[id.0].owner.is_some());
        inner.entries[id.0].reserved = false;
    }

    /// Lock for the content of frame `id`.
    pub(crate) fn frame(&self, id: FrameId) -> &SpinLock<Page> {
        &self.mem[id.0]
    }

    /// Check the frame ↔ page invariants over every quiescent entry:
    /// the back-references are bijective, and no page is resident in two
    /// frames. Entries pinned by an in-flight fault or eviction are skipped.
    pub fn assert_consistent(&self) {
        let inner = self.inner.lock();
        let mut seen: Vec<*const SptEntry> = Vec::new();
        for (index, entry) in inner.entries.iter().enumerate() {
            let Some(owner) = &entry.owner else {
                continue;
            };
            let ptr = Arc::as_ptr(&owner.entry);
            assert!(
                !seen.contains(&ptr),
                "page {:?} is resident in two frames",
                owner.entry.va()
            );
            seen.push(ptr);
            if owner.entry.is_pinned() {
                continue;
            }
            assert_eq!(
                owner.entry.frame(),
                Some(FrameId(index)),
                "frame {index} and its page disagree about each other"
            );
            assert_eq!(
                owner.page_table.translate(owner.entry.va()).map(|(pfn, _)| pfn),
                Some(index),
                "page table of pid {} does not map {:?} to frame {index}",
                owner.pid,
                owner.entry.va()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::BLOCKS_PER_SLOT;
    use edos::{addressing::Va, dev::MemDisk};

    fn swap() -> SwapStore {
        SwapStore::new(Arc::new(MemDisk::new(8 * BLOCKS_PER_SLOT)))
    }

    #[test]
    fn frames_hand_out_in_index_order() {
        let table = FrameTable::new(3);
        let swap = swap();
        let spt = crate::page::SupplementalPageTable::new();
        for i in 0..3 {
            let entry = spt.insert(Va::new(i * 0x1000).unwrap(), true, Backing::Zero);
            let id = table.alloc(
                &swap,
                FrameOwner {
                    pid: 1,
                    page_table: Arc::new(PageTable::new()),
                    entry,
                },
            );
            assert_eq!(id.index(), i);
        }
        assert_eq!(table.free_frames(), 0);
    }

    #[test]
    fn release_returns_to_pool() {
        let table = FrameTable::new(2);
        let swap = swap();
        let spt = crate::page::SupplementalPageTable::new();
        let entry = spt.insert(Va::new(0x1000).unwrap(), true, Backing::Zero);
        let id = table.alloc(
            &swap,
            FrameOwner {
                pid: 1,
                page_table: Arc::new(PageTable::new()),
                entry,
            },
        );
        assert_eq!(table.free_frames(), 1);
        table.release(id);
        assert_eq!(table.free_frames(), 2);
    }

    #[test]
    #[should_panic(expected = "release of unowned frame")]
    fn release_of_free_frame_panics() {
        let table = FrameTable::new(1);
        table.release(FrameId(0));
    }

    #[test]
    #[should_panic(expected = "frame pool cannot be empty")]
    fn empty_pool_rejected() {
        FrameTable::new(0);
    }
}
