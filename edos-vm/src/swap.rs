//! # Swap store
//!
//! The swap device is carved into page-sized slots: slot `i` occupies device
//! blocks `[i * 8, (i + 1) * 8)` (eight 512-byte blocks per 4 KiB page). A
//! bitmap tracks occupancy under its own lock, independent of the frame
//! table's, so slot allocation never serializes against unrelated frame
//! bookkeeping.
//!
//! A slot holds the only copy of an evicted anonymous page, so its lifetime
//! is tied to exactly one [`SptEntry`](crate::page::SptEntry) in the
//! swapped-out state. Reading a slot back frees it immediately: once the page
//! is in memory the swap copy is stale, and a later eviction writes a fresh
//! slot if needed.
//!
//! Running out of swap is fatal. A teaching kernel has no backpressure
//! mechanism that could shed anonymous memory, so [`SwapStore::alloc`] halts
//! the kernel with a diagnostic instead of returning an error no caller
//! could handle.

use alloc::{sync::Arc, vec::Vec};
use edos::{
    addressing::PAGE_SIZE,
    dev::{BLOCK_SIZE, BlockDevice},
    sync::SpinLock,
};
use log::{debug, error};

/// Device blocks per swap slot.
pub const BLOCKS_PER_SLOT: usize = PAGE_SIZE / BLOCK_SIZE;

/// Index of an allocated swap slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SwapSlot(pub(crate) usize);

impl SwapSlot {
    /// The raw slot index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Occupancy bitmap: bit set = slot in use.
struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    fn new(len: usize) -> Self {
        Self {
            words: alloc::vec![0u64; len.div_ceil(64)],
            len,
        }
    }

    /// Find, mark, and return the lowest free index.
    fn alloc(&mut self) -> Option<usize> {
        for (wi, word) in self.words.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = (!*word).trailing_zeros() as usize;
                let index = wi * 64 + bit;
                if index >= self.len {
                    return None;
                }
                *word |= 1 << bit;
                return Some(index);
            }
        }
        None
    }

    fn is_set(&self, index: usize) -> bool {
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    fn clear(&mut self, index: usize) {
        debug_assert!(self.is_set(index), "clearing a free slot");
        self.words[index / 64] &= !(1 << (index % 64));
    }

    fn used(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// The swap-slot allocator and its device.
pub struct SwapStore {
    device: Arc<dyn BlockDevice>,
    bitmap: SpinLock<Bitmap>,
    slots: usize,
}

impl SwapStore {
    /// Create a store over `device`; capacity is `device size / page size`.
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let slots = device.num_blocks() / BLOCKS_PER_SLOT;
        debug!("swap: {} slots ({} KiB)", slots, slots * PAGE_SIZE / 1024);
        Self {
            device,
            bitmap: SpinLock::new(Bitmap::new(slots)),
            slots,
        }
    }

    /// Total number of slots on the device.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Number of currently unallocated slots.
    pub fn free_slots(&self) -> usize {
        self.slots - self.bitmap.lock().used()
    }

    /// Allocate a free slot.
    ///
    /// # Panics
    /// Halts the kernel when no slot is free; see the module docs.
    pub(crate) fn alloc(&self) -> SwapSlot {
        match self.bitmap.lock().alloc() {
            Some(index) => SwapSlot(index),
            None => {
                error!("swap exhausted: all {} slots in use", self.slots);
                panic!("swap exhausted");
            }
        }
    }

    /// Release `slot` without reading it (teardown of a swapped-out page).
    pub(crate) fn free(&self, slot: SwapSlot) {
        self.bitmap.lock().clear(slot.0);
    }

    /// Write one page of `bytes` to `slot`.
    pub(crate) fn write(&self, slot: SwapSlot, bytes: &[u8]) {
        assert_eq!(bytes.len(), PAGE_SIZE);
        debug_assert!(self.bitmap.lock().is_set(slot.0), "write to a free slot");
        let base = slot.0 * BLOCKS_PER_SLOT;
        for i in 0..BLOCKS_PER_SLOT {
            self.device
                .write_block(base + i, &bytes[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE]);
        }
    }

    /// Read `slot` into `bytes` and free the slot.
    ///
    /// The swap copy becomes stale the moment the page is back in memory, so
    /// the slot is returned to the pool as a side effect of the read.
    pub(crate) fn read(&self, slot: SwapSlot, bytes: &mut [u8]) {
        assert_eq!(bytes.len(), PAGE_SIZE);
        debug_assert!(self.bitmap.lock().is_set(slot.0), "read from a free slot");
        let base = slot.0 * BLOCKS_PER_SLOT;
        for i in 0..BLOCKS_PER_SLOT {
            self.device
                .read_block(base + i, &mut bytes[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE]);
        }
        self.bitmap.lock().clear(slot.0);
    }
}
