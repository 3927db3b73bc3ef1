//! `exec(path, argv)` (§4.6): replaces the calling task's image in place.
//! Never returns to the caller on success — the trap frame it rewrites is
//! what the syscall-return path re-enters user mode through.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch::aarch64::trap::TrapFrame;
use crate::elf;
use crate::error::{KResult, KernelError};
use crate::process::task::Task;
use crate::vfs;

/// Looks up `path` relative to `task`'s cwd, loads it as an ELF64
/// executable into a freshly built address space (discarding the old one),
/// and rewrites `tf` so the syscall-return path `eret`s into the new
/// image's entry point with a fresh user stack holding `argv`.
pub fn exec(task: &Arc<Task>, tf: &mut TrapFrame, path: &str, argv: &[String]) -> KResult<()> {
    let cwd = task.cwd.lock().clone();
    let file_vnode = vfs::resolve(&cwd, path)?;
    let image = vfs::file::read_whole(&file_vnode)?;

    let mut vmmap = task.vmmap.lock();
    vmmap.unmap_all();
    *task.mmap_state.lock() = crate::process::mmap::MmapState::new();

    let loaded = elf::load(&image, &mut vmmap).map_err(|_| KernelError::InvalidArgument)?;
    let argv_refs: Vec<&str> = argv.iter().map(String::as_str).collect();
    let argv_ptr = elf::copy_argv(&mut vmmap, loaded.user_stack_top, &argv_refs)?;
    crate::process::signal::map_trampoline(&mut vmmap)?;
    drop(vmmap);

    tf.elr_el1 = loaded.entry as u64;
    tf.sp_el0 = loaded.user_stack_top as u64;
    tf.x[0] = argv_refs.len() as u64;
    tf.x[1] = argv_ptr as u64;
    Ok(())
}
