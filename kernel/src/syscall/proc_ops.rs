//! Process-lifecycle syscalls (§4.9 IDs 3-9): `fork`, `exec`, `exit`,
//! `getpid`, `wait`, `signal`, `kill`.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch::aarch64::trap::TrapFrame;
use crate::error::KernelError;
use crate::process::task::Task;
use crate::process::{self, signal};
use crate::syscall::user::read_user_cstr;

const MAX_PATH: usize = 256;
const MAX_ARGV: usize = 32;
const MAX_ARG_LEN: usize = 256;

pub fn sys_fork(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    match process::fork(task, tf) {
        Ok(pid) => pid.0 as i64,
        Err(e) => e.to_errno(),
    }
}

/// Reads a NUL-terminated array of C-string pointers (`argv`-style) out of
/// user memory, stopping at the first null pointer or `MAX_ARGV`.
fn read_argv(task: &Arc<Task>, va: usize) -> Result<Vec<String>, KernelError> {
    let mut argv = Vec::new();
    let mut vmmap = task.vmmap.lock();
    for i in 0..MAX_ARGV {
        let mut ptr_bytes = [0u8; 8];
        crate::syscall::user::copy_from_user(&mut vmmap, va + i * 8, &mut ptr_bytes)?;
        let arg_va = u64::from_le_bytes(ptr_bytes) as usize;
        if arg_va == 0 {
            return Ok(argv);
        }
        argv.push(read_user_cstr(&mut vmmap, arg_va, MAX_ARG_LEN)?);
    }
    Ok(argv)
}

pub fn sys_exec(task: &Arc<Task>, tf: &mut TrapFrame) -> i64 {
    let path = {
        let mut vmmap = task.vmmap.lock();
        match read_user_cstr(&mut vmmap, tf.arg(0) as usize, MAX_PATH) {
            Ok(p) => p,
            Err(e) => return e.to_errno(),
        }
    };
    let argv = match read_argv(task, tf.arg(1) as usize) {
        Ok(a) => a,
        Err(e) => return e.to_errno(),
    };
    match process::exec::exec(task, tf, &path, &argv) {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}

pub fn sys_exit(task: &Arc<Task>, tf: &TrapFrame) -> ! {
    process::exit(task, tf.arg(0) as i32)
}

pub fn sys_getpid(task: &Arc<Task>, _tf: &TrapFrame) -> i64 {
    task.pid.0 as i64
}

/// `wait(status*) -> pid`. Writes the exit code to the user-supplied
/// pointer when non-null.
pub fn sys_wait(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let status_va = tf.arg(0) as usize;
    match process::wait(task) {
        Ok((pid, code)) => {
            if status_va != 0 {
                let mut vmmap = task.vmmap.lock();
                let _ = crate::syscall::user::copy_to_user(
                    &mut vmmap,
                    status_va,
                    &(code as i32).to_le_bytes(),
                );
            }
            pid.0 as i64
        }
        Err(e) => e.to_errno(),
    }
}

/// `signal(sig, handler_va) -> 0`. Rejects attempts to install a handler
/// for `SIGKILL`.
pub fn sys_signal(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let sig = tf.arg(0) as u32;
    let handler_va = tf.arg(1) as usize;
    if sig == signal::SIGKILL {
        return KernelError::InvalidArgument.to_errno();
    }
    let handler = if handler_va == 0 {
        None
    } else {
        Some(handler_va)
    };
    task.signal_handlers.lock().set(sig, handler);
    0
}

/// `kill(pid, sig) -> 0`. `SIGKILL` bypasses any installed handler; the
/// target is torn down the next time it's scheduled (§4.7).
pub fn sys_kill(_task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let pid = crate::process::task::Pid(tf.arg(0) as u64);
    let sig = tf.arg(1) as u32;
    match process::lookup(pid) {
        Some(target) => {
            target.raise_signal(sig);
            0
        }
        None => KernelError::NoSuchTask(pid).to_errno(),
    }
}
