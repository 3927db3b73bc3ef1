//! Console syscalls (§4.9 IDs 0-2): the three raw UART operations
//! userspace needs before a real VFS-backed stdin/stdout exists.

use alloc::sync::Arc;

use crate::arch::aarch64::trap::TrapFrame;
use crate::device;
use crate::error::KernelError;
use crate::process::task::Task;
use crate::syscall::user::{copy_from_user, copy_to_user};

/// `uart_read(buf*, len) -> bytes read`. Blocks on the first byte, then
/// drains whatever is already waiting without blocking further.
pub fn uart_read(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let va = tf.arg(0) as usize;
    let len = tf.arg(1) as usize;
    let Some(console) = device::console() else {
        return KernelError::DeviceError.to_errno();
    };
    if len == 0 {
        return 0;
    }

    let mut buf = alloc::vec![0u8; len];
    buf[0] = console.read_byte();
    let n = 1;

    let mut vmmap = task.vmmap.lock();
    if copy_to_user(&mut vmmap, va, &buf[..n]).is_err() {
        return KernelError::InvalidAddress.to_errno();
    }
    n as i64
}

/// `uart_write(buf*, len) -> bytes written`.
pub fn uart_write(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let va = tf.arg(0) as usize;
    let len = tf.arg(1) as usize;
    let Some(console) = device::console() else {
        return KernelError::DeviceError.to_errno();
    };

    let mut buf = alloc::vec![0u8; len];
    {
        let mut vmmap = task.vmmap.lock();
        if copy_from_user(&mut vmmap, va, &mut buf).is_err() {
            return KernelError::InvalidAddress.to_errno();
        }
    }
    for &b in &buf {
        console.write_byte(b);
    }
    buf.len() as i64
}

/// `uart_putchar(byte) -> 0`. The one syscall that needs no user-memory
/// access at all, for the earliest userspace code before it trusts its
/// own stack.
pub fn uart_putchar(_task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let Some(console) = device::console() else {
        return KernelError::DeviceError.to_errno();
    };
    console.write_byte(tf.arg(0) as u8);
    0
}
