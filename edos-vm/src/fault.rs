//! # Page-fault resolution
//!
//! Every fault lands here with the faulting address and the access kind. The
//! resolver splits faults into three outcomes:
//!
//! - **violation**: the page does not exist for this process, or the access
//!   writes a read-only page. Resolution fails with
//!   [`KernelError::InvalidAccess`] and the trap handler terminates the
//!   process.
//! - **benign**: by the time the fault is serviced another context already
//!   made the page resident. Nothing to do; the access retries.
//! - **demand load**: the page exists but is not resident. A frame is
//!   obtained (evicting if necessary), the translation installed, and the
//!   frame populated from the page's backing.
//!
//! The resolver holds the page's pin for the whole transition, so eviction
//! cannot select the page mid-load and a concurrent fault on the same page
//! waits and then observes residency (the benign case). Faults on *different*
//! pages proceed in parallel; the only global serialization is the frame
//! table's bookkeeping lock, which is never held across populate or flush
//! I/O.

use crate::{
    MmStruct, Vm,
    frame::FrameOwner,
    page::{Backing, Origin, PageState},
};
use alloc::sync::Arc;
use edos::{
    KernelError,
    addressing::Va,
    mm::page_table::Permission,
};
use log::{trace, warn};

/// What the trap frame says about a fault.
pub struct FaultInfo {
    /// The faulting address (not necessarily page-aligned).
    pub addr: Va,
    /// Whether the faulting access was a write.
    pub is_write: bool,
    /// Whether the fault was taken in user mode. Diagnostic only: kernel
    /// accesses to user buffers resolve through the same path.
    pub is_user: bool,
}

impl Vm {
    /// Resolve a page fault for process `mm`.
    ///
    /// On `Ok(())` the faulting access can be retried and will succeed (or
    /// fault again for an unrelated reason). May block: under memory pressure
    /// the faulting context performs the eviction itself.
    ///
    /// # Errors
    /// - [`KernelError::InvalidAccess`]: the access violates the process's
    ///   memory layout; the caller is expected to terminate the process.
    pub fn handle_page_fault(&self, mm: &MmStruct, info: &FaultInfo) -> Result<(), KernelError> {
        let va = info.addr.page_down();
        let Some(entry) = mm.spt().lookup(va) else {
            warn!(
                "pid {}: fault at {:?} ({} {}) hit no mapping",
                mm.pid(),
                info.addr,
                if info.is_user { "user" } else { "kernel" },
                if info.is_write { "write" } else { "read" },
            );
            return Err(KernelError::InvalidAccess);
        };
        if info.is_write && !entry.writable() {
            warn!(
                "pid {}: write fault at {:?} on a read-only page",
                mm.pid(),
                info.addr
            );
            return Err(KernelError::InvalidAccess);
        }

        entry.pin();
        // The entry may have been torn down by an unmap or process exit
        // between lookup and pin; resolving it would revive a dead page.
        if !mm
            .spt()
            .lookup(va)
            .is_some_and(|current| Arc::ptr_eq(&current, &entry))
        {
            entry.unpin();
            return Err(KernelError::InvalidAccess);
        }
        if entry.is_resident() {
            // Raced with another fault on the same page; it won.
            entry.unpin();
            return Ok(());
        }

        let frame = self.frames.alloc(
            &self.swap,
            FrameOwner {
                pid: mm.pid(),
                page_table: mm.page_table_arc(),
                entry: Arc::clone(&entry),
            },
        );

        let backing = match &*entry.lock_state() {
            PageState::NotResident(backing) => backing.clone(),
            PageState::Resident { .. } => unreachable!("residency cannot appear under the pin"),
        };

        let mut perm = Permission::READ | Permission::USER;
        if entry.writable() {
            perm |= Permission::WRITE;
        }
        mm.page_table().install(va, frame.index(), perm);

        {
            let mut page = self.frames.frame(frame).lock();
            let bytes = page.inner_mut();
            match &backing {
                Backing::Zero => bytes.fill(0),
                Backing::Segment { seg, offset } => seg.populate(*offset, bytes),
                Backing::Swap(slot) => self.swap.read(*slot, bytes),
                Backing::File { file, offset } => crate::mmap::read_window(file, *offset, bytes),
            }
        }

        // Writable pages diverge from their source on the first store; with
        // no dirty bit they must reach swap on eviction from then on.
        let origin = match backing {
            Backing::File { file, offset } => Origin::File { file, offset },
            Backing::Swap(_) => Origin::Anonymous,
            Backing::Zero | Backing::Segment { .. } if entry.writable() => Origin::Anonymous,
            clean => Origin::Clean(clean),
        };
        *entry.lock_state() = PageState::Resident { frame, origin };

        self.frames.unreserve(frame);
        entry.unpin();
        trace!("pid {}: {:?} resident in frame {}", mm.pid(), va, frame.index());
        Ok(())
    }
}
