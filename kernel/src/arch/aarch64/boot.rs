//! Entry point. The boot stub that gets a kernel image resident in physical
//! memory is out of scope (§1); this is where that stub hands off control.
//! All four cores land here; cores 1-3 are parked (SMP is a non-goal).
//!
//! After zeroing BSS, [`crate::arch::aarch64::mmu`]'s `mmu_enable` builds
//! the static boot page tables and this stub turns the MMU on, then jumps
//! to the `KERNEL_VA_BASE`-relative alias of `kernel_main` and its own
//! stack — from that point on, every address in this kernel is expressed
//! relative to `KERNEL_VA_BASE`, never the low physical load address.

use core::arch::global_asm;

global_asm!(
    r#"
.section ".text.boot"
.global _start
_start:
    mrs x0, mpidr_el1
    and x0, x0, #3
    cbz x0, primary_core

park_secondary_core:
    wfe
    b park_secondary_core

primary_core:
    ldr x0, =__bss_start
    ldr x1, =__bss_end
zero_bss:
    cmp x0, x1
    b.ge zero_bss_done
    str xzr, [x0], #8
    b zero_bss
zero_bss_done:

    ldr x0, =__boot_stack_top
    mov sp, x0

    bl mmu_enable

    mrs x0, sctlr_el1
    orr x0, x0, #1
    msr sctlr_el1, x0
    isb

    movz x1, #0xffff, lsl #48
    ldr x0, =__boot_stack_top
    orr x2, x0, x1
    mov sp, x2
    ldr x0, =kernel_main
    orr x0, x0, x1
    br x0
    b park_secondary_core
"#
);
