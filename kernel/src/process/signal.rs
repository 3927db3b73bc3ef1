//! Signal delivery ABI. The source this kernel is modeled on left the
//! sigreturn trampoline address and user-stack frame layout undocumented
//! (§9 Open Question); this module is the concrete resolution, recorded in
//! `DESIGN.md`.
//!
//! Only the two hard-coded signals the spec names are supported: `SIGINT`
//! (catchable, default action terminates with status 130) and `SIGKILL`
//! (never caught, always terminal). There is no `sigprocmask`-style masking
//! beyond "is a handler installed".

/// Interrupt, default action: terminate.
pub const SIGINT: u32 = 2;
/// Kill, never caught (§5's "cancellation... SIGKILL... is terminal").
pub const SIGKILL: u32 = 9;
pub const NSIG: usize = 10;

/// A bitset of pending signal numbers, mirroring [`super::task::Task`]'s
/// `pending_signals` atomic.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalSet(pub u32);

impl SignalSet {
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns the lowest-numbered pending signal, if any. Lower numbers
    /// are serviced first when more than one is pending simultaneously.
    pub fn lowest(self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros())
        }
    }
}

/// Per-task handler table: `None` means "default action".
pub struct SignalHandlers {
    handlers: [Option<usize>; NSIG],
}

impl SignalHandlers {
    pub fn new() -> Self {
        SignalHandlers {
            handlers: [None; NSIG],
        }
    }

    /// Registers a user-space handler for `sig`. `SIGKILL` cannot be
    /// caught; installing a handler for it is rejected by the syscall
    /// layer before this is ever called.
    pub fn set(&mut self, sig: u32, handler_va: Option<usize>) {
        if (sig as usize) < NSIG {
            self.handlers[sig as usize] = handler_va;
        }
    }

    pub fn get(&self, sig: u32) -> Option<usize> {
        self.handlers.get(sig as usize).copied().flatten()
    }
}

impl Default for SignalHandlers {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed user-space virtual address of the one-instruction sigreturn
/// trampoline (`svc #SIGRETURN_SYSCALL_NR`), mapped read-execute into every
/// task's address space by [`map_trampoline`] at `exec` time, just below the
/// top of the user stack region. A handler's `lr` is set to this address so
/// that returning from the handler re-enters the kernel instead of falling
/// off into whatever happened to be at the handler's return address. COW
/// fork (`VMMap::copy_from`) carries the mapping to every descendant.
pub const SIGRETURN_TRAMPOLINE_VA: usize = 0x0000_7fff_ffff_e000;

/// Syscall number the trampoline invokes. Not part of the stable numbered
/// subset in §4.9 (it is never called directly by user code, only jumped to
/// by the trampoline), so it is assigned out of that range.
pub const SIGRETURN_SYSCALL_NR: u64 = 64;

/// Machine code for the trampoline itself: `mov x8, #SIGRETURN_SYSCALL_NR`
/// followed by `svc #0`, then a branch-to-self in case the kernel ever
/// returned here instead of restoring through the trap frame (it never
/// does; this is just so a stray jump doesn't fall into whatever follows).
const TRAMPOLINE_CODE: [u8; 12] = [
    0x08, 0x08, 0x80, 0xd2, // mov x8, #64
    0x01, 0x00, 0x00, 0xd4, // svc #0
    0x00, 0x00, 0x00, 0x14, // b .
];

/// Maps the sigreturn trampoline into a freshly built address space. Called
/// once per `exec` (§4.6), after the old address space is torn down and
/// before the new task image ever runs, so that fork's copy-on-write
/// `VMMap::copy_from` carries the mapping to children automatically.
pub fn map_trampoline(vmmap: &mut crate::mm::vmmap::VMMap) -> crate::error::KResult<()> {
    use crate::mm::vmmap::MapAttr;

    let frame = crate::mm::phys::alloc_frame().ok_or(crate::error::KernelError::OutOfMemory)?;
    let dst = (crate::arch::aarch64::KERNEL_VA_BASE + frame) as *mut u8;
    // SAFETY: `frame` is a freshly allocated, exclusively owned page frame.
    unsafe {
        core::ptr::write_bytes(dst, 0, crate::mm::buddy::PAGE_SIZE);
        core::ptr::copy_nonoverlapping(TRAMPOLINE_CODE.as_ptr(), dst, TRAMPOLINE_CODE.len());
    }
    vmmap.map(SIGRETURN_TRAMPOLINE_VA, frame, MapAttr::USER_RX);
    Ok(())
}

/// The synthetic frame pushed onto the user stack before a handler runs,
/// holding exactly what's needed to resume the interrupted context:
/// the pre-signal trap-frame registers relevant to resumption.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SignalFrame {
    pub saved_elr_el1: u64,
    pub saved_sp_el0: u64,
    pub saved_spsr_el1: u64,
    pub saved_x0: u64,
    pub signum: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_picks_smaller_signal_number() {
        let set = SignalSet((1 << SIGKILL) | (1 << SIGINT));
        assert_eq!(set.lowest(), Some(SIGINT));
    }

    #[test]
    fn empty_set_has_no_lowest() {
        assert_eq!(SignalSet::default().lowest(), None);
    }

    #[test]
    fn handler_round_trips() {
        let mut handlers = SignalHandlers::new();
        handlers.set(SIGINT, Some(0x1000));
        assert_eq!(handlers.get(SIGINT), Some(0x1000));
        assert_eq!(handlers.get(SIGKILL), None);
    }

    #[test]
    fn trampoline_maps_executable_page() {
        use crate::arch::aarch64::KERNEL_VA_BASE;
        use crate::mm::buddy::PAGE_SIZE;
        use crate::mm::phys;
        use alloc::boxed::Box;
        use alloc::vec;

        const FRAMES: usize = 64;
        let backing = vec![0u8; FRAMES * PAGE_SIZE].into_boxed_slice();
        let base = Box::leak(backing).as_ptr() as usize - KERNEL_VA_BASE;
        // SAFETY: test-only, single-threaded, zone not previously initialized.
        unsafe {
            phys::init(base, FRAMES);
        }

        let mut vmmap = crate::mm::vmmap::VMMap::new();
        map_trampoline(&mut vmmap).unwrap();
        assert!(vmmap.get_physical_address(SIGRETURN_TRAMPOLINE_VA).is_some());
    }
}
