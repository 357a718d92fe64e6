//! # Memory-mapped files
//!
//! `map_file` establishes a file mapping: one writable, file-backed page per
//! page of the file, created lazily through the supplemental page table. No
//! byte is read at map time; the fault path pulls each page's window in on
//! first touch, and eviction and unmapping write windows back. A file shorter
//! than its page span maps its final page partially: population copies the
//! remaining bytes and zero-fills the tail, write-back writes the same prefix
//! and never grows the file.
//!
//! Validation is all-or-nothing. Every check runs before the first page is
//! created, so a rejected `map_file` leaves no trace beyond the dropped file
//! handle. The checks, in order:
//!
//! - the descriptor may not be a console descriptor (0 or 1);
//! - the address must be non-null and page-aligned;
//! - the file may not be empty;
//! - the page span must lie entirely in the user half of the address space;
//! - the page span may not overlap any existing page of the process, nor the
//!   reserved stack region.
//!
//! Mappings are identified by a per-process monotonic [`MapId`], never
//! reused, so a stale identifier from an already-unmapped region cannot alias
//! a newer mapping.

use crate::{MmStruct, STACK_BOTTOM, STACK_TOP, Vm};
use alloc::vec::Vec;
use edos::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    fs::RegularFile,
};
use log::{debug, warn};

/// Identifier of one live file mapping, unique within its process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct MapId(usize);

impl MapId {
    /// The raw identifier value.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// The record of one established mapping.
pub struct FileMapping {
    id: MapId,
    file: RegularFile,
    base: Va,
    /// File length in bytes at map time; the page span is this, rounded up.
    len: usize,
}

impl FileMapping {
    /// This mapping's identifier.
    pub fn id(&self) -> MapId {
        self.id
    }

    /// First virtual address of the mapping.
    pub fn base(&self) -> Va {
        self.base
    }

    /// Mapped length in bytes (the file's length at map time).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of pages the mapping spans.
    pub fn page_count(&self) -> usize {
        self.len.div_ceil(PAGE_SIZE)
    }

    fn pages(&self) -> impl Iterator<Item = Va> + '_ {
        (0..self.page_count()).map(|i| self.base + i * PAGE_SIZE)
    }
}

/// Per-process mapping records. Lives behind the [`MmStruct`] mmap lock;
/// map and unmap for one process serialize on it.
pub(crate) struct MmapState {
    next_id: usize,
    mappings: Vec<FileMapping>,
}

impl MmapState {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            mappings: Vec::new(),
        }
    }
}

impl Vm {
    /// Map `file` (open on descriptor `fd`) at `addr`.
    ///
    /// On success every page of the span has a file-backed entry in the
    /// supplemental page table and the returned [`MapId`] names the mapping.
    /// On failure nothing was mapped and the file handle is dropped.
    ///
    /// # Errors
    /// - [`KernelError::BadFileDescriptor`]: `fd` is a console descriptor.
    /// - [`KernelError::BadAddress`]: `addr` is null or not page-aligned, or
    ///   the span does not fit below the user-address ceiling.
    /// - [`KernelError::InvalidArgument`]: the file is empty.
    /// - [`KernelError::Busy`]: the span overlaps an existing page or the
    ///   stack region.
    pub fn map_file(
        &self,
        mm: &MmStruct,
        fd: usize,
        file: RegularFile,
        addr: Va,
    ) -> Result<MapId, KernelError> {
        if fd <= 1 {
            return Err(KernelError::BadFileDescriptor);
        }
        if addr.into_usize() == 0 || addr.offset() != 0 {
            return Err(KernelError::BadAddress);
        }
        let len = file.size();
        if len == 0 {
            return Err(KernelError::InvalidArgument);
        }
        // User mappings only. The ceiling check doubles as the wrap guard
        // for spans at the very top of the address space.
        let span = len.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let span_end = match addr.into_usize().checked_add(span) {
            Some(end) if end <= STACK_TOP => end,
            _ => return Err(KernelError::BadAddress),
        };

        let mut mmap = mm.mmap.lock();
        let mapping = FileMapping {
            id: MapId(mmap.next_id),
            file,
            base: addr,
            len,
        };

        if span_end > STACK_BOTTOM {
            warn!(
                "pid {}: mmap at {addr:?} would overlap the stack region",
                mm.pid()
            );
            return Err(KernelError::Busy);
        }
        if mapping.pages().any(|va| mm.spt().contains(va)) {
            warn!(
                "pid {}: mmap at {addr:?} overlaps an existing mapping",
                mm.pid()
            );
            return Err(KernelError::Busy);
        }

        for (i, va) in mapping.pages().enumerate() {
            mm.spt().insert(
                va,
                true,
                crate::page::Backing::File {
                    file: mapping.file.clone(),
                    offset: i * PAGE_SIZE,
                },
            );
        }
        mmap.next_id += 1;
        debug!(
            "pid {}: mapped {} bytes at {addr:?} as {:?}",
            mm.pid(),
            len,
            mapping.id
        );
        let id = mapping.id;
        mmap.mappings.push(mapping);
        Ok(id)
    }

    /// Tear down mapping `id`: flush every resident page back to the file,
    /// release the frames, destroy the page entries, and drop the record and
    /// its file handle.
    ///
    /// # Errors
    /// - [`KernelError::NoSuchEntry`]: `id` does not name a live mapping.
    pub fn unmap_file(&self, mm: &MmStruct, id: MapId) -> Result<(), KernelError> {
        let mapping = {
            let mut mmap = mm.mmap.lock();
            let pos = mmap
                .mappings
                .iter()
                .position(|m| m.id == id)
                .ok_or(KernelError::NoSuchEntry)?;
            mmap.mappings.swap_remove(pos)
        };
        for va in mapping.pages() {
            let entry = mm.spt().remove(va);
            self.teardown_entry(mm, &entry);
        }
        debug!(
            "pid {}: unmapped {:?} ({} pages at {:?})",
            mm.pid(),
            id,
            mapping.page_count(),
            mapping.base
        );
        Ok(())
    }

    /// Drain every live mapping of `mm`, tearing each down as
    /// [`unmap_file`](Self::unmap_file) would. Used at process exit.
    pub(crate) fn unmap_all(&self, mm: &MmStruct) {
        let mappings = core::mem::take(&mut mm.mmap.lock().mappings);
        for mapping in mappings {
            for va in mapping.pages() {
                let entry = mm.spt().remove(va);
                self.teardown_entry(mm, &entry);
            }
        }
    }
}

/// Fill `frame` from the file window at `offset`: the in-file prefix is
/// copied, the tail past end-of-file is zeroed.
pub(crate) fn read_window(file: &RegularFile, offset: usize, frame: &mut [u8]) {
    let n = file.size().saturating_sub(offset).min(frame.len());
    if n > 0 {
        let read = file
            .read_at(offset, &mut frame[..n])
            .expect("mmap: file read failed");
        debug_assert_eq!(read, n);
    }
    frame[n..].fill(0);
}

/// Write `frame` back to the file window at `offset`. Only the in-file
/// prefix is written; the file never grows.
pub(crate) fn write_window(file: &RegularFile, offset: usize, frame: &[u8]) {
    let n = file.size().saturating_sub(offset).min(frame.len());
    if n > 0 {
        file.write_at(offset, &frame[..n])
            .expect("mmap: file write-back failed");
    }
}
