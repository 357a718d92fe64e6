//! # EdOS: an Educational Operating System
//!
//! EdOS is a small teaching kernel. This crate is its framework layer: the
//! abstractions every subsystem builds on, such as virtual addresses, memory
//! pages, the per-process page table, file handles, block devices, and
//! synchronization primitives.
//!
//! The framework deliberately stops at contracts. The interesting policy code
//! (demand paging, eviction, swapping, memory-mapped files) lives in the
//! `edos-vm` crate, which consumes the types defined here.
//!
//! ## Why Rust?
//!
//! Kernel code is where data races, use-after-free errors, and dangling
//! resource references traditionally live. Rust's ownership and borrowing
//! rules push most of those bugs to compile time: a [`mm::Page`] frees its
//! memory when dropped, a file handle closes when its last reference goes
//! away, and shared state is only reachable through an explicit lock. The
//! subsystems built on this crate lean on those guarantees heavily.
#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod addressing;
pub mod dev;
pub mod fs;
pub mod mm;
pub mod sync;

/// Enum representing errors that can occur during a kernel operation.
///
/// This enum is used to categorize errors encountered by the kernel
/// operation. Each variant corresponds to a specific type of error that might
/// occur during the handling of a kernel operation. These errors can be
/// returned to the user program to indicate the nature of the failure.
#[derive(Debug, Eq, PartialEq)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted,
    /// No such file or directory. (ENOENT)
    NoSuchEntry,
    /// IO Error. (EIO)
    IOError,
    /// BAD file descriptor. (EBADF)
    BadFileDescriptor,
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Permission denied. (EACCES)
    InvalidAccess,
    /// Bad address. (EFAULT)
    BadAddress,
    /// Device or resource busy. (EBUSY)
    Busy,
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
    /// No space left on device. (ENOSPC)
    NoSpace,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code. The result is cast to `usize` for use as a return value in
    /// system calls.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::OperationNotPermitted => -1isize,
            KernelError::NoSuchEntry => -2,
            KernelError::IOError => -5,
            KernelError::BadFileDescriptor => -9,
            KernelError::NoMemory => -12,
            KernelError::InvalidAccess => -13,
            KernelError::BadAddress => -14,
            KernelError::Busy => -16,
            KernelError::InvalidArgument => -22,
            KernelError::NoSpace => -28,
        }) as usize
    }
}
