//! Round-robin scheduler (C7): runqueue, voluntary and preemptive context
//! switch, and the blocking primitives `process::wait` builds on.
//!
//! Uniprocessor (SMP is a non-goal, §1): a single global runqueue protected
//! by IRQ masking rather than a spinlock-plus-atomics pair, matching the
//! rest of the kernel's `IrqGuard` convention.

extern crate alloc;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex;

use crate::arch::aarch64::context::{context_switch, Context};
use crate::process::task::{Pid, Task, TaskState};
use crate::sync::IrqGuard;

mod runqueue;
use runqueue::RunQueue;

/// Ticks a task may run before `on_timer_tick` requests a reschedule.
const TIME_SLICE: u32 = 10;

static RUNQUEUE: Mutex<RunQueue> = Mutex::new(RunQueue::new());
static CURRENT: Mutex<Option<Arc<Task>>> = Mutex::new(None);
static IDLE: Mutex<Option<Arc<Task>>> = Mutex::new(None);
static NEED_RESCHED: AtomicBool = AtomicBool::new(false);
static TICKS_LEFT: AtomicU32 = AtomicU32::new(TIME_SLICE);

/// Installs the idle task and makes it the initial `current`. Called once
/// from bootstrap (C11), before any task is enqueued.
pub fn init(idle: Arc<Task>) {
    idle.set_state(TaskState::Runnable);
    *IDLE.lock() = Some(idle.clone());
    *CURRENT.lock() = Some(idle);
}

/// Performs the kernel's one and only "from nothing" switch: installs
/// `first` as `CURRENT` and hands off to it, discarding whatever
/// callee-saved state `kernel_main`'s boot stack held (nothing ever
/// switches back into it, since the boot stack is never revisited once a
/// real task is running). Called once from bootstrap (C11), after `init`
/// and at least one task has been enqueued. Never returns.
pub fn start(first: alloc::sync::Arc<Task>) -> ! {
    *CURRENT.lock() = Some(first.clone());
    crate::arch::aarch64::mmu::set_ttbr0(first.vmmap.lock().pgd_phys());

    let mut discarded = Context::default();
    let to_ctx: *const Context = &*first.context.lock() as *const Context;
    // SAFETY: `discarded` is never read again — `kernel_main` does not
    // return past this call, so nothing will ever switch back into it;
    // `first` was just installed as `CURRENT` and owns a valid kernel stack.
    unsafe {
        context_switch(&mut discarded as *mut Context, to_ctx);
    }
    unreachable!("sched::start: control returned to the boot stack");
}

/// Adds `task` to the tail of the runqueue and marks it RUNNABLE. Matches
/// the CREATED -> RUNNABLE transition of §4.7's state machine.
pub fn enqueue(task: Arc<Task>) {
    task.set_state(TaskState::Runnable);
    let _guard = IrqGuard::new();
    RUNQUEUE.lock().push_back(task);
}

/// Removes every occurrence of `pid` from the runqueue, if present. A task
/// that is blocked (WAITING) or currently running is never in the
/// runqueue, so this is a no-op for those states.
pub fn remove(pid: Pid) {
    let _guard = IrqGuard::new();
    RUNQUEUE.lock().remove(pid);
}

pub fn current_task() -> Arc<Task> {
    let _guard = IrqGuard::new();
    CURRENT
        .lock()
        .clone()
        .expect("sched: current_task() called before sched::init")
}

/// Used by the logger (C13) to tag records with the active task's PID
/// without panicking on the earliest boot messages, before `init` runs.
pub fn current_pid_if_any() -> Option<Pid> {
    let _guard = IrqGuard::new();
    CURRENT.lock().as_ref().map(|t| t.pid)
}

/// Called on every timer IRQ (C10). Decrements the running task's time
/// slice and requests a reschedule once it's exhausted.
pub fn on_timer_tick() {
    if TICKS_LEFT.fetch_sub(1, Ordering::AcqRel) <= 1 {
        TICKS_LEFT.store(TIME_SLICE, Ordering::Release);
        NEED_RESCHED.store(true, Ordering::Release);
    }
}

/// Switches only if a reschedule was requested (timer preemption) or the
/// runqueue demands it; called at every kernel-to-user return point per
/// §4.8.
pub fn maybe_schedule() {
    if NEED_RESCHED.swap(false, Ordering::AcqRel) {
        schedule();
    }
}

/// Rotates the runqueue head to the tail and switches to the new head,
/// per §4.7: "rotate runqueue head to tail, switch to new head". Falls
/// back to the idle task when the runqueue is empty.
pub fn schedule() {
    let _guard = IrqGuard::new();
    let current = current_task();
    let was_running = current.state() == TaskState::Runnable;

    let mut rq = RUNQUEUE.lock();
    let next = if was_running {
        rq.rotate_with(current.clone())
    } else {
        rq.pop_front()
    };
    drop(rq);

    let next = next.unwrap_or_else(|| IDLE.lock().clone().expect("sched: no idle task installed"));

    if Arc::ptr_eq(&next, &current) {
        return;
    }

    switch_to(current, next);
}

/// The mechanics shared by every path that changes `current`: swap the
/// `CURRENT` slot, then perform the actual register save/restore. Every
/// caller already holds an `IrqGuard` for the whole operation, so this
/// doesn't take its own.
fn switch_to(from: Arc<Task>, to: Arc<Task>) {
    *CURRENT.lock() = Some(to.clone());

    let pgd_phys = to.vmmap.lock().pgd_phys();
    crate::arch::aarch64::mmu::set_ttbr0(pgd_phys);

    let from_ctx: *mut Context = &mut *from.context.lock() as *mut Context;
    let to_ctx: *const Context = &*to.context.lock() as *const Context;

    // SAFETY: `from` is the task currently executing this code, so its
    // `Context` is live and not concurrently accessed; `to` was just
    // installed as `CURRENT` and owns a valid kernel stack (either freshly
    // forked, per `Context::for_fork_entry`, or previously descheduled via
    // this same function).
    unsafe {
        context_switch(from_ctx, to_ctx);
    }
}

/// Voluntarily deschedules the current task, marking it WAITING, and picks
/// another RUNNABLE task. Used by `process::wait` when there are live
/// children to wait for.
pub fn block_current_waiting() {
    let _guard = IrqGuard::new();
    let current = current_task();
    current.set_state(TaskState::Waiting);

    let next = RUNQUEUE
        .lock()
        .pop_front()
        .unwrap_or_else(|| IDLE.lock().clone().expect("sched: no idle task installed"));

    switch_to(current, next);
}

/// Wakes `pid` if it is currently WAITING (e.g. a parent blocked in
/// `wait`), re-enqueuing it as RUNNABLE. A no-op if `pid` doesn't exist or
/// isn't WAITING — `process::exit` calls this unconditionally.
pub fn wake_if_waiting(pid: Pid) {
    if let Some(task) = crate::process::lookup(pid) {
        if task.state() == TaskState::Waiting {
            enqueue(task);
        }
    }
}

/// `exit()`'s scheduling half (§4.7): atomically removes the current task
/// from scheduling consideration and switches away. Never returns.
pub fn exit_current() -> ! {
    let _guard = IrqGuard::new();
    let current = current_task();
    let next = RUNQUEUE
        .lock()
        .pop_front()
        .unwrap_or_else(|| IDLE.lock().clone().expect("sched: no idle task installed"));

    switch_to(current, next);
    unreachable!("exit_current: switched back into a terminated task");
}

/// Kills the current task with the given exit status, as if it had called
/// `exit(status)` itself. Used by the data-abort handler (§4.8) on a
/// non-COW fault and by fatal signal delivery (SIGKILL, §4.9 id 9).
pub fn kill_current_task(status: i32) -> ! {
    let current = current_task();
    crate::process::exit(&current, status);
}

/// Applies any signals pending on the current task, called right after a
/// syscall body returns (§4.8). `SIGKILL` always terminates; `SIGINT` is
/// delivered to the registered handler if one exists, or else terminates
/// with status 130 (128 + SIGINT), the conventional shell exit code.
pub fn deliver_pending_signals() {
    use crate::process::signal::{SIGINT, SIGKILL};

    let current = current_task();
    if current.has_pending_signal(SIGKILL) {
        kill_current_task(137);
    }
    if current.has_pending_signal(SIGINT) {
        current.clear_signal(SIGINT);
        let handler = current.signal_handlers.lock().get(SIGINT);
        match handler {
            Some(handler_va) => deliver_to_handler(&current, SIGINT, handler_va),
            None => kill_current_task(130),
        }
    }
}

/// Diverts the current task's trap frame so that, on return to user mode,
/// it executes the registered handler instead of resuming where it
/// trapped, and arranges for the fixed sigreturn trampoline to restore the
/// original context afterward (the signal-delivery ABI resolved in
/// DESIGN.md).
fn deliver_to_handler(task: &Arc<Task>, signum: u32, handler_va: usize) {
    use crate::process::signal::{SignalFrame, SIGRETURN_TRAMPOLINE_VA};

    let Some(tf_ptr) = *task.trap_frame.lock() else {
        return;
    };
    // SAFETY: `tf_ptr` is the trap frame of the task currently running this
    // code, on its own kernel stack, valid for the duration of the trap.
    let tf = unsafe { &mut *tf_ptr };

    let frame = SignalFrame {
        saved_elr_el1: tf.elr_el1,
        saved_sp_el0: tf.sp_el0,
        saved_spsr_el1: tf.spsr_el1,
        saved_x0: tf.x[0],
        signum: signum as u64,
    };

    let mut vmmap = task.vmmap.lock();
    let new_sp = (tf.sp_el0 as usize).saturating_sub(core::mem::size_of::<SignalFrame>()) & !0xf;
    if crate::elf::write_user_struct(&mut vmmap, new_sp, &frame).is_err() {
        drop(vmmap);
        kill_current_task(130);
    }

    tf.sp_el0 = new_sp as u64;
    tf.elr_el1 = handler_va as u64;
    tf.x[0] = signum as u64;
    tf.lr = SIGRETURN_TRAMPOLINE_VA as u64;
}

#[cfg(test)]
mod tests {
    use super::runqueue::RunQueue;

    #[test]
    fn empty_runqueue_pops_none() {
        let mut rq = RunQueue::new();
        assert!(rq.pop_front().is_none());
    }
}
