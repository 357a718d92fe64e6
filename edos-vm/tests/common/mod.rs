//! Shared fixtures for the scenario tests.

#![allow(dead_code)]

use edos::{
    addressing::{PAGE_SIZE, Va},
    dev::MemDisk,
    fs::{MemFile, RegularFile},
};
use edos_vm::{MmStruct, Vm, page::LazySegment, swap::BLOCKS_PER_SLOT};
use std::sync::Arc;

/// A subsystem with `nframes` frames and `swap_slots` swap slots.
pub fn vm(nframes: usize, swap_slots: usize) -> Vm {
    Vm::new(nframes, Arc::new(MemDisk::new(swap_slots * BLOCKS_PER_SLOT)))
}

pub fn va(addr: usize) -> Va {
    Va::new(addr).unwrap()
}

/// An in-memory file whose contents stay inspectable after mapping.
pub fn mem_file(content: &[u8]) -> (Arc<MemFile>, RegularFile) {
    let inner = Arc::new(MemFile::with_content(content));
    (inner.clone(), RegularFile(inner))
}

/// A deterministic segment image: byte `i` of the segment is
/// `seed + (i % 251)`.
pub struct PatternSegment {
    pub seed: u8,
}

impl PatternSegment {
    pub fn byte_at(&self, offset: usize) -> u8 {
        self.seed.wrapping_add((offset % 251) as u8)
    }
}

impl LazySegment for PatternSegment {
    fn populate(&self, offset: usize, frame: &mut [u8]) {
        for (i, b) in frame.iter_mut().enumerate() {
            *b = self.seed.wrapping_add(((offset + i) % 251) as u8);
        }
    }
}

/// Write `byte` over the first `len` bytes of the page at `addr`.
pub fn fill_page(vm: &Vm, mm: &MmStruct, addr: usize, byte: u8, len: usize) {
    vm.with_user_page(mm, va(addr), true, |bytes| {
        bytes[..len].fill(byte);
    })
    .expect("page should be writable");
}

/// Read the first byte of the page at `addr`.
pub fn first_byte(vm: &Vm, mm: &MmStruct, addr: usize) -> u8 {
    vm.with_user_page(mm, va(addr), false, |bytes| bytes[0])
        .expect("page should be readable")
}

/// Whether the page at `addr` currently occupies a frame.
pub fn resident(mm: &MmStruct, addr: usize) -> bool {
    mm.spt()
        .lookup(va(addr))
        .map(|entry| entry.is_resident())
        .unwrap_or(false)
}

/// Clear the accessed bit of every given page, as a full clock sweep would.
pub fn clear_accessed(mm: &MmStruct, addrs: &[usize]) {
    for &addr in addrs {
        mm.page_table().set_accessed(va(addr), false);
    }
}

pub const PAGE: usize = PAGE_SIZE;
