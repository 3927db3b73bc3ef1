//! Syscall surface (C9): the numbering table of §4.9 and the dispatcher
//! [`trap::handle_syscall`](crate::arch::aarch64::trap) calls into on every
//! `SVC` trap.
//!
//! Every handler has the signature `fn(&Arc<Task>, &TrapFrame) -> i64`
//! (`exec` and `exit` additionally need `&mut TrapFrame`/never return); the
//! return value is either a non-negative result or a [`crate::error::KernelError`]
//! mapped through [`crate::error::KernelError::to_errno`].

use crate::arch::aarch64::trap::TrapFrame;
use crate::error::KernelError;
use crate::sched;

pub mod mm_ops;
pub mod proc_ops;
pub mod uart_ops;
pub mod user;
pub mod vfs_ops;

const SYS_UART_READ: u64 = 0;
const SYS_UART_WRITE: u64 = 1;
const SYS_UART_PUTCHAR: u64 = 2;
const SYS_FORK: u64 = 3;
const SYS_EXEC: u64 = 4;
const SYS_EXIT: u64 = 5;
const SYS_GETPID: u64 = 6;
const SYS_WAIT: u64 = 7;
const SYS_SIGNAL: u64 = 8;
const SYS_KILL: u64 = 9;
const SYS_MMAP: u64 = 10;
const SYS_MPROTECT: u64 = 11;
const SYS_MUNMAP: u64 = 12;
const SYS_OPEN: u64 = 13;
const SYS_CLOSE: u64 = 14;
const SYS_READ: u64 = 15;
const SYS_WRITE: u64 = 16;
const SYS_MKDIR: u64 = 17;
const SYS_CHDIR: u64 = 18;
const SYS_ACCESS: u64 = 19;
const SYS_UNLINK: u64 = 20;
const SYS_GETDENTS: u64 = 21;
const SYS_MOUNT: u64 = 22;
const SYS_UMOUNT: u64 = 23;

/// Dispatches on `tf.syscall_id()` (`x8`), looking up the calling task via
/// [`sched::current_task`] rather than threading it through the trap path.
pub fn dispatch(tf: &mut TrapFrame) -> i64 {
    let task = sched::current_task();

    match tf.syscall_id() {
        SYS_UART_READ => uart_ops::uart_read(&task, tf),
        SYS_UART_WRITE => uart_ops::uart_write(&task, tf),
        SYS_UART_PUTCHAR => uart_ops::uart_putchar(&task, tf),
        SYS_FORK => proc_ops::sys_fork(&task, tf),
        SYS_EXEC => proc_ops::sys_exec(&task, tf),
        SYS_EXIT => proc_ops::sys_exit(&task, tf),
        SYS_GETPID => proc_ops::sys_getpid(&task, tf),
        SYS_WAIT => proc_ops::sys_wait(&task, tf),
        SYS_SIGNAL => proc_ops::sys_signal(&task, tf),
        SYS_KILL => proc_ops::sys_kill(&task, tf),
        SYS_MMAP => mm_ops::mmap(&task, tf),
        SYS_MPROTECT => mm_ops::mprotect(&task, tf),
        SYS_MUNMAP => mm_ops::munmap(&task, tf),
        SYS_OPEN => vfs_ops::open(&task, tf),
        SYS_CLOSE => vfs_ops::close(&task, tf),
        SYS_READ => vfs_ops::read(&task, tf),
        SYS_WRITE => vfs_ops::write(&task, tf),
        SYS_MKDIR => vfs_ops::mkdir(&task, tf),
        SYS_CHDIR => vfs_ops::chdir(&task, tf),
        SYS_ACCESS => vfs_ops::access(&task, tf),
        SYS_UNLINK => vfs_ops::unlink(&task, tf),
        SYS_GETDENTS => vfs_ops::getdents(&task, tf),
        SYS_MOUNT => vfs_ops::mount_syscall(&task, tf),
        SYS_UMOUNT => vfs_ops::umount_syscall(&task, tf),
        crate::process::signal::SIGRETURN_SYSCALL_NR => sigreturn(tf),
        other => KernelError::BadSyscall(other).to_errno(),
    }
}

/// Entered only via the fixed sigreturn trampoline a handler's `lr` points
/// at (§4.6's signal-delivery ABI). Restores the pre-signal trap-frame
/// registers pushed on the user stack by `sched::deliver_to_handler` and
/// resumes there.
fn sigreturn(tf: &mut TrapFrame) -> i64 {
    use crate::process::signal::SignalFrame;

    let task = sched::current_task();
    let mut vmmap = task.vmmap.lock();
    let mut raw = [0u8; core::mem::size_of::<SignalFrame>()];
    if user::copy_from_user(&mut vmmap, tf.sp_el0 as usize, &mut raw).is_err() {
        return KernelError::InvalidAddress.to_errno();
    }
    drop(vmmap);

    let frame = SignalFrame {
        saved_elr_el1: u64::from_le_bytes(raw[0..8].try_into().unwrap()),
        saved_sp_el0: u64::from_le_bytes(raw[8..16].try_into().unwrap()),
        saved_spsr_el1: u64::from_le_bytes(raw[16..24].try_into().unwrap()),
        saved_x0: u64::from_le_bytes(raw[24..32].try_into().unwrap()),
        signum: u64::from_le_bytes(raw[32..40].try_into().unwrap()),
    };

    tf.elr_el1 = frame.saved_elr_el1;
    tf.sp_el0 = frame.saved_sp_el0;
    tf.spsr_el1 = frame.saved_spsr_el1;
    tf.x[0] = frame.saved_x0;
    tf.x[0] as i64
}
