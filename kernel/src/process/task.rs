//! The task object (C6): register context, stacks, credentials, FD table,
//! pending signals, and the state machine of §4.7.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::arch::aarch64::context::Context;
use crate::arch::aarch64::trap::TrapFrame;
use crate::mm::vmmap::VMMap;
use crate::process::fd::FdTable;
use crate::process::mmap::MmapState;
use crate::process::signal::{SignalHandlers, SignalSet};
use crate::vfs::vnode::VnodeRef;

/// Process-unique, monotonically assigned task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

static NEXT_PID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next PID. Strictly monotonic for the lifetime of the
/// kernel; PIDs of reaped tasks are never reused (§4.6).
pub fn alloc_pid() -> Pid {
    Pid(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created = 0,
    Runnable = 1,
    Waiting = 2,
    Terminated = 3,
}

impl TaskState {
    fn from_u32(v: u32) -> TaskState {
        match v {
            0 => TaskState::Created,
            1 => TaskState::Runnable,
            2 => TaskState::Waiting,
            _ => TaskState::Terminated,
        }
    }
}

/// One kernel stack page, owned for the lifetime of its task and released
/// when the task is reaped (§5's scoped kernel-stack-page pattern).
pub struct KernelStack {
    /// Physical base of the single backing frame.
    frame: usize,
    /// Virtual address of the top of the stack (stacks grow down).
    pub top: usize,
}

impl KernelStack {
    pub fn new() -> Self {
        let frame = crate::mm::phys::alloc_frame().expect("out of memory allocating kernel stack");
        let top = crate::arch::aarch64::KERNEL_VA_BASE + frame + crate::mm::buddy::PAGE_SIZE;
        KernelStack { frame, top }
    }
}

impl Drop for KernelStack {
    fn drop(&mut self) {
        crate::mm::phys::free_frame(self.frame);
    }
}

pub struct Task {
    pub pid: Pid,
    /// Mutable so `exit` can reparent orphaned children to init (§4.6).
    parent: Mutex<Pid>,
    state: AtomicU32,
    /// Callee-saved register context, swapped by [`crate::sched::schedule`].
    pub context: Mutex<Context>,
    pub kernel_stack: KernelStack,
    pub vmmap: Mutex<VMMap>,
    pub mmap_state: Mutex<MmapState>,
    pub cwd: Mutex<VnodeRef>,
    pub fd_table: Mutex<FdTable>,
    /// Valid only while this task is executing a trap; set by the trap
    /// entry stub, cleared implicitly once the trap returns.
    pub trap_frame: Mutex<Option<*mut TrapFrame>>,
    pub pending_signals: AtomicU32,
    pub signal_handlers: Mutex<SignalHandlers>,
    pub exit_status: AtomicI32,
}

// SAFETY: every field with interior mutability is behind a `Mutex` or an
// atomic; `*mut TrapFrame` is only ever dereferenced by the task that owns
// it, on its own kernel stack, while IRQs are masked around the read.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Task {
    pub fn new(parent: Pid, vmmap: VMMap, cwd: VnodeRef) -> Arc<Task> {
        Arc::new(Task {
            pid: alloc_pid(),
            parent: Mutex::new(parent),
            state: AtomicU32::new(TaskState::Created as u32),
            context: Mutex::new(Context::default()),
            kernel_stack: KernelStack::new(),
            vmmap: Mutex::new(vmmap),
            mmap_state: Mutex::new(MmapState::new()),
            cwd: Mutex::new(cwd),
            fd_table: Mutex::new(FdTable::new()),
            trap_frame: Mutex::new(None),
            pending_signals: AtomicU32::new(0),
            signal_handlers: Mutex::new(SignalHandlers::new()),
            exit_status: AtomicI32::new(0),
        })
    }

    /// Builds a task that never crosses into EL0: its [`Context`] starts
    /// `entry` directly on its own kernel stack rather than via a trap
    /// frame, and it owns an otherwise-empty [`VMMap`] it will never map
    /// anything into. Used by bootstrap (C11) for the idle task and the
    /// launcher that execs PID 1's init binary, neither of which is ever
    /// forked into or scheduled through the trap-frame path.
    pub fn new_kernel(parent: Pid, cwd: VnodeRef, entry: extern "C" fn() -> !) -> Arc<Task> {
        let kernel_stack = KernelStack::new();
        let context = Context::for_kernel_entry(kernel_stack.top, entry);
        Arc::new(Task {
            pid: alloc_pid(),
            parent: Mutex::new(parent),
            state: AtomicU32::new(TaskState::Created as u32),
            context: Mutex::new(context),
            kernel_stack,
            vmmap: Mutex::new(VMMap::new()),
            mmap_state: Mutex::new(MmapState::new()),
            cwd: Mutex::new(cwd),
            fd_table: Mutex::new(FdTable::new()),
            trap_frame: Mutex::new(None),
            pending_signals: AtomicU32::new(0),
            signal_handlers: Mutex::new(SignalHandlers::new()),
            exit_status: AtomicI32::new(0),
        })
    }

    pub fn parent(&self) -> Pid {
        *self.parent.lock()
    }

    pub fn set_parent(&self, new_parent: Pid) {
        *self.parent.lock() = new_parent;
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TaskState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub fn has_pending_signal(&self, sig: u32) -> bool {
        self.pending_signals.load(Ordering::Acquire) & (1 << sig) != 0
    }

    pub fn raise_signal(&self, sig: u32) {
        self.pending_signals.fetch_or(1 << sig, Ordering::AcqRel);
    }

    pub fn clear_signal(&self, sig: u32) {
        self.pending_signals
            .fetch_and(!(1 << sig), Ordering::AcqRel);
    }

    pub fn pending_signal_set(&self) -> SignalSet {
        SignalSet(self.pending_signals.load(Ordering::Acquire))
    }
}
