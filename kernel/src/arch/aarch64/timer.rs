//! ARM generic timer (CNTP) register access backing the C10 multiplexer in
//! [`crate::timer`].

use core::arch::asm;

/// Roughly 2-second default tick, matching this system's documented default
/// jiffy length (§GLOSSARY).
const DEFAULT_INTERVAL_TICKS: u64 = 2 * 1_000_000; // timer runs at ~1MHz on RPi3's generic timer

pub fn frequency_hz() -> u64 {
    let v: u64;
    // SAFETY: reads a read-only system register.
    unsafe { asm!("mrs {}, cntfrq_el0", out(reg) v, options(nomem, nostack)) };
    v
}

/// Arms the timer to fire again after the default interval and re-enables
/// it. Called once at boot and again at the tail of every tick.
pub fn rearm() {
    // SAFETY: writes timer control/compare registers the kernel owns
    // exclusively; no other code touches CNTP_* at EL1.
    unsafe {
        asm!(
            "msr cntp_tval_el0, {0}",
            "mov x9, #1",
            "msr cntp_ctl_el0, x9",
            in(reg) DEFAULT_INTERVAL_TICKS,
            out("x9") _,
            options(nostack)
        );
    }
}

pub fn counter() -> u64 {
    let v: u64;
    // SAFETY: reads a read-only system register.
    unsafe { asm!("mrs {}, cntpct_el0", out(reg) v, options(nomem, nostack)) };
    v
}
