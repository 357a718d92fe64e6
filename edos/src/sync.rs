//! Spinlock-based synchronization.
//!
//! Kernel code cannot sleep on a lock the way hosted code does; a contended
//! lock is waited out by spinning. Every shared structure in EdOS is
//! therefore protected by a [`SpinLock`], and the rules for using one are
//! simple:
//!
//! - hold a lock for bookkeeping only, never across device I/O;
//! - when two locks must nest, the outer one is always the coarser
//!   structure's lock (subsystems document their own order);
//! - a lock that may be probed from a path that must not block is taken with
//!   [`SpinLock::try_lock`].
//!
//! The data protected by a spinlock can only be accessed through the guard
//! returned from [`SpinLock::lock`] or [`SpinLock::try_lock`], which
//! guarantees that the data is only ever accessed while the lock is held.

pub use spin::{Mutex as SpinLock, MutexGuard as SpinLockGuard, RwLock};
