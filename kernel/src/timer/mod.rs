//! Timer multiplexer (C10): one hardware tick fans out to the jiffies
//! counter, an ordered list of software timer events, and the scheduler.
//! Distinct from [`crate::arch::aarch64::timer`], which only owns the raw
//! CNTP_* register access this module drives.

extern crate alloc;

use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::arch::aarch64::timer as hw;

static JIFFIES: AtomicU64 = AtomicU64::new(0);

/// A pending (remaining ticks, callback) pair, per §3's `Timer event`.
struct TimerEvent {
    remaining: u64,
    callback: fn(),
}

static EVENTS: Mutex<VecDeque<TimerEvent>> = Mutex::new(VecDeque::new());

pub fn jiffies() -> u64 {
    JIFFIES.load(Ordering::Relaxed)
}

/// Schedules `callback` to run `ticks` hardware ticks from now. Events are
/// stored and fired in insertion order within a tick (§4.10's invariant).
pub fn schedule_event(ticks: u64, callback: fn()) {
    EVENTS.lock().push_back(TimerEvent {
        remaining: ticks,
        callback,
    });
}

/// Arms the hardware counter for the first interval. Called once from
/// bootstrap (C11), after the exception vector is installed.
pub fn init() {
    hw::rearm();
}

/// Called on every timer IRQ (§4.8's "on IRQ entry" sequence, first step):
/// increments `jiffies`, fires and removes every event whose countdown has
/// reached zero (in insertion order), decrements the rest, then re-arms the
/// hardware counter for the next interval.
pub fn on_tick() {
    JIFFIES.fetch_add(1, Ordering::Relaxed);

    let mut due = alloc::vec::Vec::new();
    {
        let mut events = EVENTS.lock();
        let mut i = 0;
        while i < events.len() {
            events[i].remaining = events[i].remaining.saturating_sub(1);
            if events[i].remaining == 0 {
                // SAFETY-free: plain VecDeque indexing, `i` stays in bounds
                // because we only remove the element we just inspected.
                due.push(events.remove(i).unwrap());
            } else {
                i += 1;
            }
        }
    }
    for event in due {
        (event.callback)();
    }

    hw::rearm();
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;

    static FIRED: AtomicU32 = AtomicU32::new(0);

    fn mark_fired() {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn event_fires_after_its_countdown_without_hardware() {
        EVENTS.lock().clear();
        FIRED.store(0, Ordering::Relaxed);
        schedule_event(2, mark_fired);

        // Replicate on_tick's software half without touching CNTP_* (the
        // hardware registers aren't present on a host test run).
        for _ in 0..2 {
            let mut events = EVENTS.lock();
            let mut i = 0;
            while i < events.len() {
                events[i].remaining = events[i].remaining.saturating_sub(1);
                if events[i].remaining == 0 {
                    let ev = events.remove(i).unwrap();
                    drop(events);
                    (ev.callback)();
                    events = EVENTS.lock();
                } else {
                    i += 1;
                }
            }
        }
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);
    }
}
