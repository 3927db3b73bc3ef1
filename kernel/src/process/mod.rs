//! The task subsystem (C6): the global process table, and `fork`/`exec`/
//! `exit`/`wait`. The scheduler (`crate::sched`) owns *when* tasks run; this
//! module owns *what a task is* and the lifecycle transitions of §4.6.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use spin::Mutex;

use crate::arch::aarch64::trap::{self, TrapFrame};
use crate::error::{KResult, KernelError};
use crate::mm::vmmap::VMMap;

pub mod exec;
pub mod fd;
pub mod mmap;
pub mod signal;
pub mod task;

pub use task::{Pid, Task, TaskState};

/// PID 1. Orphaned children are reparented to it (§4.6); it reaps them as
/// they terminate.
pub const INIT_PID: Pid = Pid(1);

static TASKS: Mutex<BTreeMap<Pid, Arc<Task>>> = Mutex::new(BTreeMap::new());

pub fn register(task: Arc<Task>) {
    TASKS.lock().insert(task.pid, task);
}

pub fn lookup(pid: Pid) -> Option<Arc<Task>> {
    TASKS.lock().get(&pid).cloned()
}

pub fn unregister(pid: Pid) {
    TASKS.lock().remove(&pid);
}

/// Every live PID, in ascending order. Backs `/proc/tasks` (§4.12
/// supplement's procfs listing).
pub fn all_pids() -> alloc::vec::Vec<Pid> {
    TASKS.lock().keys().copied().collect()
}

fn children_of(pid: Pid) -> alloc::vec::Vec<Arc<Task>> {
    TASKS
        .lock()
        .values()
        .filter(|t| t.parent() == pid)
        .cloned()
        .collect()
}

/// `fork` (§4.6): allocates a new task, deep-copies the VMMap (triggering
/// universal COW on every leaf page), shallow-copies the FD table, and
/// duplicates the trap frame so the child resumes from the very same
/// syscall with `x0 = 0`, while the parent's own trap frame (already on its
/// kernel stack) is left for the normal syscall-return path to set `x0 =
/// child_pid`.
pub fn fork(parent: &Arc<Task>, parent_tf: &TrapFrame) -> KResult<Pid> {
    let mut parent_vmmap = parent.vmmap.lock();
    let mut child_vmmap = VMMap::new();
    child_vmmap.copy_from(&mut parent_vmmap);
    drop(parent_vmmap);

    let cwd = parent.cwd.lock().clone();
    let child = Task::new(parent.pid, child_vmmap, cwd);
    *child.fd_table.lock() = parent.fd_table.lock().fork_shallow();
    *child.mmap_state.lock() = parent.mmap_state.lock().clone();

    let mut child_tf = *parent_tf;
    child_tf.set_return_value(0);
    let sp = trap::push_trap_frame(child.kernel_stack.top, child_tf);
    *child.context.lock() = crate::arch::aarch64::context::Context::for_fork_entry(sp);
    child.set_state(TaskState::Created);

    let pid = child.pid;
    register(child.clone());
    crate::sched::enqueue(child);
    Ok(pid)
}

/// `exit(code)` (§4.6): marks the task TERMINATED, stores the code, wakes
/// a waiting parent if there is one, and yields. Reaping happens in `wait`.
/// Never returns to the caller.
pub fn exit(task: &Arc<Task>, code: i32) -> ! {
    task.exit_status.store(code, Ordering::Release);
    task.set_state(TaskState::Terminated);

    // Orphaned children are reparented to init (PID 1), matching the
    // "reaped by init for orphans" clause of §4.6.
    for child in children_of(task.pid) {
        reparent(&child, INIT_PID);
    }

    crate::sched::wake_if_waiting(task.parent());
    crate::sched::exit_current();
}

fn reparent(child: &Arc<Task>, new_parent: Pid) {
    child.set_parent(new_parent);
    // A child that was already TERMINATED when its original parent exited
    // has no one left to reap it under its old parent PID; wake init in
    // case it's already blocked in `wait` so it notices the new child.
    if child.state() == TaskState::Terminated {
        crate::sched::wake_if_waiting(new_parent);
    }
}

/// `wait(status*)` (§4.6/§4.9 id 7): blocks the calling task until a direct
/// child terminates, then reaps it (removes it from the process table) and
/// returns its PID and exit code.
pub fn wait(parent: &Arc<Task>) -> KResult<(Pid, i32)> {
    loop {
        let children = children_of(parent.pid);
        if children.is_empty() && parent.pid != INIT_PID {
            return Err(KernelError::NoSuchTask(parent.pid));
        }
        if let Some(dead) = children
            .iter()
            .find(|c| c.state() == TaskState::Terminated)
        {
            let pid = dead.pid;
            let code = dead.exit_status.load(Ordering::Acquire);
            unregister(pid);
            return Ok((pid, code));
        }
        if children.is_empty() {
            // init with nothing to reap yet: yield and re-check rather than
            // blocking forever on a WAITING state nothing will ever wake.
            crate::sched::schedule();
            continue;
        }
        crate::sched::block_current_waiting();
    }
}
