//! Block devices.
//!
//! A block device moves fixed-size sectors between memory and storage; the
//! swap store is its main consumer in this kernel. The contract is
//! synchronous: when `read_block`/`write_block` return, the transfer is
//! complete. [`MemDisk`] is the RAM-backed implementation used for swap in
//! the hosted kernel and in tests.

use crate::sync::SpinLock;
use alloc::vec::Vec;

/// The size of one device block, in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Trait for a device that reads and writes [`BLOCK_SIZE`]-byte blocks.
pub trait BlockDevice
where
    Self: Send + Sync,
{
    /// Read block `block_id` into `buf`. `buf` must be [`BLOCK_SIZE`] bytes.
    fn read_block(&self, block_id: usize, buf: &mut [u8]);

    /// Write `buf` to block `block_id`. `buf` must be [`BLOCK_SIZE`] bytes.
    fn write_block(&self, block_id: usize, buf: &[u8]);

    /// Total number of blocks on the device.
    fn num_blocks(&self) -> usize;
}

/// A RAM-backed block device.
pub struct MemDisk {
    blocks: SpinLock<Vec<u8>>,
    num_blocks: usize,
}

impl MemDisk {
    /// Create a zero-filled device of `num_blocks` blocks.
    pub fn new(num_blocks: usize) -> Self {
        Self {
            blocks: SpinLock::new(alloc::vec![0u8; num_blocks * BLOCK_SIZE]),
            num_blocks,
        }
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), BLOCK_SIZE);
        assert!(block_id < self.num_blocks, "read past end of device");
        let blocks = self.blocks.lock();
        let base = block_id * BLOCK_SIZE;
        buf.copy_from_slice(&blocks[base..base + BLOCK_SIZE]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        assert_eq!(buf.len(), BLOCK_SIZE);
        assert!(block_id < self.num_blocks, "write past end of device");
        let mut blocks = self.blocks.lock();
        let base = block_id * BLOCK_SIZE;
        blocks[base..base + BLOCK_SIZE].copy_from_slice(buf);
    }

    fn num_blocks(&self) -> usize {
        self.num_blocks
    }
}
