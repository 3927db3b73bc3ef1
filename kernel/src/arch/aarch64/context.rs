//! The voluntarily-switched register set.
//!
//! Deliberately narrower than [`crate::arch::aarch64::trap::TrapFrame`]:
//! a task's [`Context`] holds only the registers the AArch64 procedure-call
//! standard designates callee-saved (x19-x28, fp, lr) plus sp. Everything
//! else is either already on the kernel stack (caller-saved GPRs, per the
//! compiler's own prologue/epilogue) or lives in the trap frame when a trap
//! is in progress. Conflating the two was a correctness hazard in the
//! source this kernel is modeled on; keeping them as distinct types makes
//! the mistake unrepresentable.

use core::arch::global_asm;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Context {
    pub x19: u64,
    pub x20: u64,
    pub x21: u64,
    pub x22: u64,
    pub x23: u64,
    pub x24: u64,
    pub x25: u64,
    pub x26: u64,
    pub x27: u64,
    pub x28: u64,
    pub fp: u64,
    pub lr: u64,
    pub sp: u64,
}

impl Context {
    /// Builds the context a freshly forked task starts from: `sp` points at
    /// the trap frame [`super::trap::push_trap_frame`] wrote, and `lr` is
    /// [`super::trap::fork_trampoline`], so the first `context_switch` into
    /// this task lands there instead of anywhere a real callee-saved return
    /// address would point.
    pub fn for_fork_entry(sp: usize) -> Context {
        Context {
            sp: sp as u64,
            lr: super::trap::fork_trampoline as usize as u64,
            ..Context::default()
        }
    }

    /// Builds the context a brand-new kernel thread (idle, the bootstrap's
    /// `init` launcher) starts from: runs `entry` with its own stack, never
    /// via a trap frame.
    pub fn for_kernel_entry(sp: usize, entry: extern "C" fn() -> !) -> Context {
        Context {
            sp: sp as u64,
            lr: entry as usize as u64,
            ..Context::default()
        }
    }
}

extern "C" {
    /// Saves the callee-saved registers of the currently running task into
    /// `*current`, then loads them from `*next` and returns into whatever
    /// `next.lr` points at. The very first switch into a freshly created
    /// task relies on `lr` having been seeded with the task's entry
    /// trampoline by [`crate::process::task::Task::new_kernel`] /
    /// [`crate::process::fork::fork_process`].
    ///
    /// # Safety
    /// `current` and `next` must each point at a live, correctly aligned
    /// [`Context`]; `next` must belong to a task that owns a valid kernel
    /// stack. This function never returns to its caller in the usual sense
    /// — it returns into the task that owned `next`.
    pub fn context_switch(current: *mut Context, next: *const Context);
}

global_asm!(
    r#"
.global context_switch
.section .text
context_switch:
    // x0 = &mut current.Context, x1 = &next.Context
    stp x19, x20, [x0, #0x00]
    stp x21, x22, [x0, #0x10]
    stp x23, x24, [x0, #0x20]
    stp x25, x26, [x0, #0x30]
    stp x27, x28, [x0, #0x40]
    stp fp,  lr,  [x0, #0x50]
    mov x2, sp
    str x2,  [x0, #0x60]

    ldp x19, x20, [x1, #0x00]
    ldp x21, x22, [x1, #0x10]
    ldp x23, x24, [x1, #0x20]
    ldp x25, x26, [x1, #0x30]
    ldp x27, x28, [x1, #0x40]
    ldp fp,  lr,  [x1, #0x50]
    ldr x2,  [x1, #0x60]
    mov sp, x2

    ret
"#
);
