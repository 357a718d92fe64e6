//! # EdOS virtual memory
//!
//! The demand-paging engine of EdOS. Processes describe their address space
//! lazily: program segments, zero-filled regions, and file mappings become
//! entries in a per-process supplemental page table, and no frame is spent
//! until the first access faults. Under memory pressure a clock evictor
//! reclaims frames, spilling anonymous pages to a swap device and writing
//! file-backed pages back to their files; a later fault brings them back.
//!
//! The engine is assembled from four mechanisms:
//!
//! - [`page`]: the supplemental page table, recording where each virtual
//!   page's bytes live when no frame holds them, and what eviction owes them
//!   when one does.
//! - [`frame`]: the global frame arena and the clock (second-chance) evictor.
//! - [`swap`]: page-sized slots on a block device for evicted anonymous
//!   pages.
//! - [`mmap`]: file mappings, validated up front and faulted in per page.
//! - [`fault`]: the resolver that ties them together on each page fault.
//!
//! [`Vm`] owns the machine-wide pieces (frames and swap) and is created once
//! at kernel startup; [`MmStruct`] is one process's memory state. Everything
//! a process maps is destroyed by [`Vm::exit`].

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod fault;
pub mod frame;
pub mod mmap;
pub mod page;
pub mod swap;

pub use frame::Pid;

use alloc::sync::Arc;
use edos::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    dev::BlockDevice,
    mm::page_table::PageTable,
    sync::SpinLock,
};
use fault::FaultInfo;
use frame::FrameTable;
use log::{debug, warn};
use mmap::MmapState;
use page::{Backing, LazySegment, Origin, PageState, SptEntry, SupplementalPageTable};
use swap::SwapStore;

/// Exclusive upper bound of the user stack region.
pub const STACK_TOP: usize = 0x8000_0000_0000;
/// Maximum stack size; the region below [`STACK_TOP`] reserved for it.
pub const STACK_MAX_SIZE: usize = 256 * PAGE_SIZE;
/// Lowest address of the reserved stack region.
pub const STACK_BOTTOM: usize = STACK_TOP - STACK_MAX_SIZE;

/// The machine-wide memory subsystem: the frame arena and the swap store.
///
/// Created once at kernel startup, after the frame pool size and the swap
/// device are known, and shared by every process from then on.
pub struct Vm {
    pub(crate) frames: FrameTable,
    pub(crate) swap: SwapStore,
}

impl Vm {
    /// Create the subsystem with `nframes` frames and `swap_device` as the
    /// swap backing store.
    pub fn new(nframes: usize, swap_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            frames: FrameTable::new(nframes),
            swap: SwapStore::new(swap_device),
        }
    }

    /// The global frame table.
    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    /// The global swap store.
    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    /// Destroy the entire address space of `mm` at process exit.
    ///
    /// File mappings are flushed as if unmapped one by one; anonymous
    /// resident pages are discarded without touching swap; swap slots still
    /// holding swapped-out pages are freed with their entries.
    pub fn exit(&self, mm: &MmStruct) {
        self.unmap_all(mm);
        for entry in mm.spt().take_all() {
            self.teardown_entry(mm, &entry);
        }
        debug!("pid {}: address space torn down", mm.pid());
    }

    /// Destroy one page entry, already removed from its supplemental page
    /// table. Pins the entry first, so an in-flight fault or eviction on it
    /// completes before the entry's resources are reclaimed.
    ///
    /// The entry is left non-resident and unpinned: a context that fetched
    /// the `Arc` before the entry left the table must neither block forever
    /// on the pin nor observe the reclaimed frame through the stale state.
    pub(crate) fn teardown_entry(&self, mm: &MmStruct, entry: &SptEntry) {
        entry.pin();
        enum Disposal {
            Frame(frame::FrameId, Origin),
            Slot(swap::SwapSlot),
            Nothing,
        }
        let disposal = match &*entry.lock_state() {
            PageState::Resident { frame, origin } => Disposal::Frame(*frame, origin.clone()),
            PageState::NotResident(Backing::Swap(slot)) => Disposal::Slot(*slot),
            PageState::NotResident(_) => Disposal::Nothing,
        };
        match disposal {
            Disposal::Frame(frame, origin) => {
                if let Origin::File { file, offset } = origin {
                    let page = self.frames.frame(frame).lock();
                    mmap::write_window(&file, offset, page.inner());
                }
                let cleared = mm.page_table().clear(entry.va());
                debug_assert_eq!(cleared, Some(frame.index()));
                self.frames.release(frame);
            }
            Disposal::Slot(slot) => self.swap.free(slot),
            Disposal::Nothing => {}
        }
        *entry.lock_state() = PageState::NotResident(Backing::Zero);
        entry.unpin();
    }

    /// Run `f` over the bytes of the user page containing `va`, from `va`'s
    /// offset to the end of the page.
    ///
    /// This is the kernel's path for touching user memory on a process's
    /// behalf: it faults the page in if needed, holds it pinned against
    /// eviction for the duration of `f`, and marks it accessed the way the
    /// retried hardware access would.
    ///
    /// # Errors
    /// - [`KernelError::InvalidAccess`]: `va` is unmapped, or `is_write` and
    ///   the page is read-only.
    pub fn with_user_page<R>(
        &self,
        mm: &MmStruct,
        va: Va,
        is_write: bool,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, KernelError> {
        let page_va = va.page_down();
        loop {
            let entry = mm
                .spt()
                .lookup(page_va)
                .ok_or(KernelError::InvalidAccess)?;
            if is_write && !entry.writable() {
                return Err(KernelError::InvalidAccess);
            }
            entry.pin();
            if let Some(frame) = entry.frame() {
                mm.page_table().set_accessed(page_va, true);
                let mut page = self.frames.frame(frame).lock();
                let result = f(&mut page.inner_mut()[va.offset()..]);
                drop(page);
                entry.unpin();
                return Ok(result);
            }
            // Not resident; fault it in and retry (it may be evicted again
            // before we re-pin).
            entry.unpin();
            self.handle_page_fault(
                mm,
                &FaultInfo {
                    addr: va,
                    is_write,
                    is_user: true,
                },
            )?;
        }
    }

    /// Check the cross-structure invariants over every quiescent page; see
    /// [`frame::FrameTable::assert_consistent`]. Test hook.
    pub fn assert_consistent(&self) {
        self.frames.assert_consistent();
    }
}

/// Per-process memory state: the (software) hardware page table, the
/// supplemental page table, and the process's file mappings.
pub struct MmStruct {
    pid: Pid,
    page_table: Arc<PageTable>,
    spt: SupplementalPageTable,
    pub(crate) mmap: SpinLock<MmapState>,
}

impl MmStruct {
    /// Create the empty address space of process `pid`.
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            page_table: Arc::new(PageTable::new()),
            spt: SupplementalPageTable::new(),
            mmap: SpinLock::new(MmapState::new()),
        }
    }

    /// The owning process.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The process's page table.
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub(crate) fn page_table_arc(&self) -> Arc<PageTable> {
        Arc::clone(&self.page_table)
    }

    /// The process's supplemental page table.
    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    /// Describe `npages` demand-zero pages starting at `base` (stack and
    /// other anonymous regions). No frame is touched until a page faults.
    ///
    /// # Errors
    /// - [`KernelError::BadAddress`]: `base` is null or not page-aligned.
    /// - [`KernelError::InvalidArgument`]: `npages` is zero.
    /// - [`KernelError::Busy`]: the range overlaps an existing page.
    pub fn map_zero(&self, base: Va, npages: usize, writable: bool) -> Result<(), KernelError> {
        self.map_region(base, npages, |_| Backing::Zero, writable)
    }

    /// Describe `npages` lazily loaded segment pages starting at `base`;
    /// page `i` populates from `seg` at `offset + i * PAGE_SIZE`.
    ///
    /// # Errors
    /// Same conditions as [`map_zero`](Self::map_zero).
    pub fn map_segment(
        &self,
        base: Va,
        npages: usize,
        writable: bool,
        seg: Arc<dyn LazySegment>,
        offset: usize,
    ) -> Result<(), KernelError> {
        self.map_region(
            base,
            npages,
            |i| Backing::Segment {
                seg: Arc::clone(&seg),
                offset: offset + i * PAGE_SIZE,
            },
            writable,
        )
    }

    fn map_region(
        &self,
        base: Va,
        npages: usize,
        backing: impl Fn(usize) -> Backing,
        writable: bool,
    ) -> Result<(), KernelError> {
        if base.into_usize() == 0 || base.offset() != 0 {
            return Err(KernelError::BadAddress);
        }
        if npages == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let pages = (0..npages).map(|i| base + i * PAGE_SIZE);
        if pages.clone().any(|va| self.spt.contains(va)) {
            warn!(
                "pid {}: mapping {npages} pages at {base:?} overlaps an existing page",
                self.pid
            );
            return Err(KernelError::Busy);
        }
        for (i, va) in pages.enumerate() {
            self.spt.insert(va, writable, backing(i));
        }
        Ok(())
    }
}

/// Map the reserved stack region of `mm`: demand-zero, writable, one page
/// faulted in at a time as the stack grows down from [`STACK_TOP`].
pub fn map_stack(mm: &MmStruct) -> Result<(), KernelError> {
    mm.map_zero(
        Va::new(STACK_BOTTOM).expect("stack bottom is canonical"),
        STACK_MAX_SIZE / PAGE_SIZE,
        true,
    )
}
