//! Exception vector table and trap-frame layout/dispatch (C8).
//!
//! Unlike [`super::context::Context`], a [`TrapFrame`] captures the *entire*
//! general-purpose register file, because a trap can interrupt a task at any
//! point, not just at a voluntary yield.

use core::arch::global_asm;

use crate::arch::aarch64::irq;
use crate::sched;
use crate::syscall;

extern "C" {
    /// The vector table `global_asm!` below emits. Taken only to compute
    /// its address for `VBAR_EL1`; never called as a function.
    fn exception_vector_table();
}

/// The `KERNEL_VA_BASE`-relative address of the exception vector table,
/// for installing into `VBAR_EL1` once bootstrap is running at the high
/// alias every other kernel address is expressed in.
pub fn vector_table_addr() -> usize {
    crate::arch::aarch64::KERNEL_VA_BASE | (exception_vector_table as usize)
}

#[repr(C, align(16))]
#[derive(Debug, Default, Clone, Copy)]
pub struct TrapFrame {
    pub x: [u64; 19], // x0..x18
    pub x19_28: [u64; 10],
    pub fp: u64,
    pub lr: u64,
    pub sp_el0: u64,
    pub elr_el1: u64,
    pub spsr_el1: u64,
}

impl TrapFrame {
    pub fn syscall_id(&self) -> u64 {
        self.x[8]
    }
    pub fn arg(&self, n: usize) -> u64 {
        self.x[n]
    }
    pub fn set_return_value(&mut self, v: i64) {
        self.x[0] = v as u64;
    }
}

/// Exception class field of ESR_EL1, bits [31:26].
const EC_SVC64: u64 = 0b010101;
/// Data abort taken without a change in exception level (EL0 -> EL1 here).
const EC_DATA_ABORT_LOWER_EL: u64 = 0b100100;

fn esr_ec(esr: u64) -> u64 {
    (esr >> 26) & 0x3f
}
fn esr_iss(esr: u64) -> u64 {
    esr & 0x01ff_ffff
}

fn read_esr_el1() -> u64 {
    let v: u64;
    // SAFETY: reads a read-only system register, no side effects.
    unsafe { core::arch::asm!("mrs {}, esr_el1", out(reg) v, options(nomem, nostack)) };
    v
}

fn read_far_el1() -> usize {
    let v: u64;
    // SAFETY: reads a read-only system register, no side effects.
    unsafe { core::arch::asm!("mrs {}, far_el1", out(reg) v, options(nomem, nostack)) };
    v as usize
}

/// Entered from the vector table with IRQs still masked and the faulting
/// task's user page tables still installed. Implements the dispatch table
/// of §4.8.
#[no_mangle]
extern "C" fn handle_sync_exception(tf: *mut TrapFrame) {
    let tf = unsafe { &mut *tf };
    let esr = read_esr_el1();
    let ec = esr_ec(esr);
    let iss = esr_iss(esr);

    match ec {
        EC_SVC64 if iss == 0 => handle_syscall(tf),
        EC_DATA_ABORT_LOWER_EL => handle_data_abort(tf),
        other => {
            log::error!(
                "unhandled exception: ec={:#x} iss={:#x} elr={:#x} far={:#x}",
                other,
                iss,
                tf.elr_el1,
                read_far_el1()
            );
            panic!("unhandled synchronous exception");
        }
    }
}

fn handle_syscall(tf: &mut TrapFrame) {
    crate::arch::aarch64::mmio::install_null_ttbr0();
    irq::enable_irqs();

    let result = syscall::dispatch(tf);

    irq::disable_irqs();
    tf.set_return_value(result);

    sched::deliver_pending_signals();
    sched::maybe_schedule();

    crate::arch::aarch64::mmio::restore_user_ttbr0();
}

fn handle_data_abort(tf: &mut TrapFrame) {
    let fault_va = read_far_el1();
    let task = sched::current_task();
    let mut vmmap = task.vmmap.lock();

    if vmmap.is_cow_page(fault_va) {
        vmmap.copy_page_frame(fault_va);
        return;
    }
    drop(vmmap);

    log::warn!("segfault: task {} at {:#x}", task.pid.0, fault_va);
    sched::kill_current_task(4);
}

/// Entered on every IRQ. Implements §4.8's "on IRQ entry" sequence.
#[no_mangle]
extern "C" fn handle_irq(_tf: *mut TrapFrame) {
    crate::timer::on_tick();
    sched::on_timer_tick();
    sched::maybe_schedule();
}

/// Size of the region [`fork_trampoline`]'s restore sequence reads, in
/// bytes. Matches [`TrapFrame`]'s own size, which [`TrapFrame`]'s
/// `align(16)` keeps a multiple of 16 — required since the restore
/// sequence addresses it purely via `sp`-relative `ldp`s, and AArch64
/// faults on a misaligned `sp` base register regardless of `SCTLR_EL1.SA`.
const TRAP_FRAME_RESERVED: usize = 272;

/// Writes `frame` onto the kernel stack topped at `stack_top`, at the exact
/// offset [`fork_trampoline`] expects to find it. Returns the resulting
/// stack pointer, suitable for a fresh [`crate::arch::aarch64::context::Context::sp`].
///
/// Used exactly once per task, by `fork` (§4.6), to hand a brand-new task a
/// trap frame to `eret` into on its very first `context_switch`.
pub fn push_trap_frame(stack_top: usize, frame: TrapFrame) -> usize {
    debug_assert_eq!(core::mem::size_of::<TrapFrame>(), TRAP_FRAME_RESERVED);
    let sp = stack_top - TRAP_FRAME_RESERVED;
    // SAFETY: `stack_top` is the unused top of a freshly allocated kernel
    // stack page that belongs exclusively to the new task.
    unsafe {
        (sp as *mut TrapFrame).write(frame);
    }
    sp
}

/// Hands off to user mode from a task that has no trap frame to resume,
/// because it never trapped in the first place: the kernel thread bootstrap
/// (C11) spawns via [`crate::process::task::Task::new_kernel`] to load the
/// `init` binary. Builds `frame` on the current stack (below whatever this
/// function's own call chain has already pushed, which is harmless — a
/// kernel stack page is otherwise idle at this point) and reuses
/// [`fork_trampoline`]'s restore sequence to `eret` into it, exactly as a
/// forked child's first `context_switch` would.
pub fn enter_user_mode(frame: TrapFrame) -> ! {
    let ptr = &frame as *const TrapFrame as usize;
    // SAFETY: `ptr` addresses a live, 16-byte-aligned `TrapFrame` (per its
    // `align(16)`) on this function's own stack; this function never
    // returns, so moving `sp` down to it and handing off to
    // `fork_trampoline` abandons nothing still needed.
    unsafe {
        core::arch::asm!(
            "mov sp, {0}",
            "b fork_trampoline",
            in(reg) ptr,
            options(noreturn)
        );
    }
}

extern "C" {
    /// Entered via `context_switch`'s `ret` on a task's first scheduling,
    /// with `sp` already pointing at the trap frame [`push_trap_frame`]
    /// wrote. Restores it and `eret`s into user mode, completing the fork
    /// the same way a syscall return would for an already-running task.
    pub fn fork_trampoline() -> !;
}

macro_rules! save_trap_frame {
    () => {
        r#"
        sub sp, sp, #272
        stp x0, x1, [sp, #0x00]
        stp x2, x3, [sp, #0x10]
        stp x4, x5, [sp, #0x20]
        stp x6, x7, [sp, #0x30]
        stp x8, x9, [sp, #0x40]
        stp x10, x11, [sp, #0x50]
        stp x12, x13, [sp, #0x60]
        stp x14, x15, [sp, #0x70]
        stp x16, x17, [sp, #0x80]
        str x18, [sp, #0x90]
        stp x19, x20, [sp, #0x98]
        stp x21, x22, [sp, #0xa8]
        stp x23, x24, [sp, #0xb8]
        stp x25, x26, [sp, #0xc8]
        stp x27, x28, [sp, #0xd8]
        stp x29, x30, [sp, #0xe8]
        mrs x0, sp_el0
        mrs x1, elr_el1
        mrs x2, spsr_el1
        stp x0, x1, [sp, #0xf8]
        str x2, [sp, #0x108]
        "#
    };
}

macro_rules! restore_trap_frame {
    () => {
        r#"
        ldp x0, x1, [sp, #0xf8]
        ldr x2, [sp, #0x108]
        msr sp_el0, x0
        msr elr_el1, x1
        msr spsr_el1, x2
        ldp x0, x1, [sp, #0x00]
        ldp x2, x3, [sp, #0x10]
        ldp x4, x5, [sp, #0x20]
        ldp x6, x7, [sp, #0x30]
        ldp x8, x9, [sp, #0x40]
        ldp x10, x11, [sp, #0x50]
        ldp x12, x13, [sp, #0x60]
        ldp x14, x15, [sp, #0x70]
        ldp x16, x17, [sp, #0x80]
        ldr x18, [sp, #0x90]
        ldp x19, x20, [sp, #0x98]
        ldp x21, x22, [sp, #0xa8]
        ldp x23, x24, [sp, #0xb8]
        ldp x25, x26, [sp, #0xc8]
        ldp x27, x28, [sp, #0xd8]
        ldp x29, x30, [sp, #0xe8]
        add sp, sp, #272
        eret
        "#
    };
}

global_asm!(
    concat!(
        r#"
.global fork_trampoline
fork_trampoline:
"#,
        restore_trap_frame!(),
        r#"

.global exception_vector_table
.align 11
exception_vector_table:
    // Synchronous / IRQ / FIQ / SError, from current EL with SP0 and SPx,
    // and from lower EL in AArch64 and AArch32. Only the two combinations
    // the kernel actually uses (current EL SPx sync, lower EL AArch64 sync
    // and IRQ) are wired to real handlers; the rest panic via a shared stub.

.macro ventry label
.align 7
b \label
.endm

    ventry unexpected_entry // sync, current EL, SP0
    ventry unexpected_entry // irq,  current EL, SP0
    ventry unexpected_entry // fiq,  current EL, SP0
    ventry unexpected_entry // serr, current EL, SP0

    ventry kernel_sync      // sync, current EL, SPx
    ventry kernel_irq       // irq,  current EL, SPx
    ventry unexpected_entry // fiq,  current EL, SPx
    ventry unexpected_entry // serr, current EL, SPx

    ventry lower_sync       // sync, lower EL, AArch64
    ventry lower_irq        // irq,  lower EL, AArch64
    ventry unexpected_entry // fiq,  lower EL, AArch64
    ventry unexpected_entry // serr, lower EL, AArch64

    ventry unexpected_entry // sync, lower EL, AArch32
    ventry unexpected_entry // irq,  lower EL, AArch32
    ventry unexpected_entry // fiq,  lower EL, AArch32
    ventry unexpected_entry // serr, lower EL, AArch32

unexpected_entry:
"#,
        save_trap_frame!(),
        r#"
    mov x0, sp
    bl handle_sync_exception
"#,
        restore_trap_frame!(),
        r#"

kernel_sync:
lower_sync:
"#,
        save_trap_frame!(),
        r#"
    mov x0, sp
    bl handle_sync_exception
"#,
        restore_trap_frame!(),
        r#"

kernel_irq:
lower_irq:
"#,
        save_trap_frame!(),
        r#"
    mov x0, sp
    bl handle_irq
"#,
        restore_trap_frame!(),
    )
);
