//! Anonymous-memory syscalls (§4.9 ID 10): `mmap`, `mprotect`, `munmap`,
//! backed by each task's [`crate::process::mmap::MmapState`].

use alloc::sync::Arc;

use crate::arch::aarch64::trap::TrapFrame;
use crate::process::mmap::Prot;
use crate::process::task::Task;

/// `mmap(_hint, length, prot) -> base va`. The hint argument (`x0`) is
/// accepted for ABI symmetry with the source this kernel is modeled on but
/// ignored: every mapping is placed by the bump allocator (§9 decision).
pub fn mmap(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let length = tf.arg(1) as usize;
    let prot = Prot::from_bits_truncate(tf.arg(2) as u32);

    let mut vmmap = task.vmmap.lock();
    let mut state = task.mmap_state.lock();
    match state.mmap(&mut vmmap, length, prot) {
        Ok(base) => base as i64,
        Err(e) => e.to_errno(),
    }
}

/// `mprotect(addr, prot) -> 0`.
pub fn mprotect(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let addr = tf.arg(0) as usize;
    let prot = Prot::from_bits_truncate(tf.arg(1) as u32);

    let mut vmmap = task.vmmap.lock();
    let mut state = task.mmap_state.lock();
    match state.mprotect(&mut vmmap, addr, prot) {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}

/// `munmap(addr) -> 0`.
pub fn munmap(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let addr = tf.arg(0) as usize;

    let mut vmmap = task.vmmap.lock();
    let mut state = task.mmap_state.lock();
    match state.munmap(&mut vmmap, addr) {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}
