//! VFS-backed syscalls (§4.9 IDs 11+): `open`/`close`/`read`/`write`/
//! `mkdir`/`chdir`/`access`/`unlink`/`getdents`/`mount`/`umount`.

use alloc::sync::Arc;
use alloc::vec;

use spin::Mutex;

use crate::arch::aarch64::trap::TrapFrame;
use crate::error::{KResult, KernelError};
use crate::process::task::Task;
use crate::syscall::user::{copy_to_user, read_user_cstr};
use crate::vfs;
use crate::vfs::file::{File, OpenFlags};
use crate::vfs::vnode::{list_children, NodeKind, VnodeRef};

const MAX_PATH: usize = 256;

fn parent_and_leaf<'a>(path: &'a str) -> (&'a str, &'a str) {
    match path.rsplit_once('/') {
        Some((parent, leaf)) if !parent.is_empty() => (parent, leaf),
        Some((_, leaf)) => ("/", leaf),
        None => (".", path),
    }
}

pub fn open(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let mut vmmap = task.vmmap.lock();
    let Ok(path) = read_user_cstr(&mut vmmap, tf.arg(0) as usize, MAX_PATH) else {
        return KernelError::InvalidArgument.to_errno();
    };
    drop(vmmap);

    let raw_flags = tf.arg(1) as u32;
    let flags = OpenFlags::from_bits_truncate(raw_flags);
    let cwd = task.cwd.lock().clone();

    let vnode = match vfs::resolve(&cwd, &path) {
        Ok(v) => v,
        Err(_) if flags.contains(OpenFlags::CREATE) => match create_file(&cwd, &path) {
            Ok(v) => v,
            Err(e) => return e.to_errno(),
        },
        Err(e) => return e.to_errno(),
    };

    let file = Arc::new(Mutex::new(File::new(vnode, flags)));
    match task.fd_table.lock().install(file) {
        Ok(fd) => fd as i64,
        Err(e) => e.to_errno(),
    }
}

fn create_file(cwd: &VnodeRef, path: &str) -> KResult<VnodeRef> {
    let (parent_path, leaf) = parent_and_leaf(path);
    let parent = vfs::resolve(cwd, parent_path)?;
    match parent.get_child(leaf) {
        Ok(existing) => Ok(existing),
        Err(_) => parent.create_child(leaf, NodeKind::File, 0o644),
    }
}

pub fn close(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    match task.fd_table.lock().close(tf.arg(0) as i32) {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}

pub fn read(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let fd = tf.arg(0) as i32;
    let va = tf.arg(1) as usize;
    let len = tf.arg(2) as usize;

    let file = match task.fd_table.lock().get(fd) {
        Ok(f) => f,
        Err(e) => return e.to_errno(),
    };
    let mut buf = vec![0u8; len];
    let n = match file.lock().read(&mut buf) {
        Ok(n) => n,
        Err(e) => return e.to_errno(),
    };
    let mut vmmap = task.vmmap.lock();
    if copy_to_user(&mut vmmap, va, &buf[..n]).is_err() {
        return KernelError::InvalidAddress.to_errno();
    }
    n as i64
}

pub fn write(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let fd = tf.arg(0) as i32;
    let va = tf.arg(1) as usize;
    let len = tf.arg(2) as usize;

    let file = match task.fd_table.lock().get(fd) {
        Ok(f) => f,
        Err(e) => return e.to_errno(),
    };
    let mut buf = vec![0u8; len];
    {
        let mut vmmap = task.vmmap.lock();
        if crate::syscall::user::copy_from_user(&mut vmmap, va, &mut buf).is_err() {
            return KernelError::InvalidAddress.to_errno();
        }
    }
    match file.lock().write(&buf) {
        Ok(n) => n as i64,
        Err(e) => e.to_errno(),
    }
}

pub fn mkdir(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let mut vmmap = task.vmmap.lock();
    let Ok(path) = read_user_cstr(&mut vmmap, tf.arg(0) as usize, MAX_PATH) else {
        return KernelError::InvalidArgument.to_errno();
    };
    drop(vmmap);

    let cwd = task.cwd.lock().clone();
    let (parent_path, leaf) = parent_and_leaf(&path);
    let parent = match vfs::resolve(&cwd, parent_path) {
        Ok(v) => v,
        Err(e) => return e.to_errno(),
    };
    match parent.create_child(leaf, NodeKind::Directory, tf.arg(1) as u32) {
        Ok(_) => 0,
        Err(e) => e.to_errno(),
    }
}

pub fn chdir(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let mut vmmap = task.vmmap.lock();
    let Ok(path) = read_user_cstr(&mut vmmap, tf.arg(0) as usize, MAX_PATH) else {
        return KernelError::InvalidArgument.to_errno();
    };
    drop(vmmap);

    let cwd = task.cwd.lock().clone();
    match vfs::resolve(&cwd, &path) {
        Ok(vnode) if vnode.kind() == NodeKind::Directory => {
            *task.cwd.lock() = vnode;
            0
        }
        Ok(_) => KernelError::NotADirectory.to_errno(),
        Err(e) => e.to_errno(),
    }
}

pub fn access(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let mut vmmap = task.vmmap.lock();
    let Ok(path) = read_user_cstr(&mut vmmap, tf.arg(0) as usize, MAX_PATH) else {
        return KernelError::InvalidArgument.to_errno();
    };
    drop(vmmap);
    let cwd = task.cwd.lock().clone();
    match vfs::resolve(&cwd, &path) {
        Ok(_) => 0,
        Err(e) => e.to_errno(),
    }
}

pub fn unlink(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let mut vmmap = task.vmmap.lock();
    let Ok(path) = read_user_cstr(&mut vmmap, tf.arg(0) as usize, MAX_PATH) else {
        return KernelError::InvalidArgument.to_errno();
    };
    drop(vmmap);

    let cwd = task.cwd.lock().clone();
    let (parent_path, leaf) = parent_and_leaf(&path);
    let parent = match vfs::resolve(&cwd, parent_path) {
        Ok(v) => v,
        Err(e) => return e.to_errno(),
    };
    match parent.remove_child(leaf) {
        Ok(_) => 0,
        Err(e) => e.to_errno(),
    }
}

/// Writes a flat run of NUL-separated child names into the user buffer,
/// returning the number of bytes written (0 once every child has been
/// listed) — a minimal stand-in for a real `struct dirent` stream, enough
/// for the userspace coreutils clones this kernel targets (§1 non-goal:
/// no real binaries are in scope to validate against, only the contract).
pub fn getdents(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let fd = tf.arg(0) as i32;
    let va = tf.arg(1) as usize;
    let max_len = tf.arg(2) as usize;

    let file = match task.fd_table.lock().get(fd) {
        Ok(f) => f,
        Err(e) => return e.to_errno(),
    };
    let vnode = file.lock().vnode.clone();
    let entries = match list_children(&vnode) {
        Ok(e) => e,
        Err(e) => return e.to_errno(),
    };

    let mut out = alloc::vec::Vec::new();
    for (name, _) in entries {
        if out.len() + name.len() + 1 > max_len {
            break;
        }
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }

    let mut vmmap = task.vmmap.lock();
    if copy_to_user(&mut vmmap, va, &out).is_err() {
        return KernelError::InvalidAddress.to_errno();
    }
    out.len() as i64
}

pub fn mount_syscall(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let mut vmmap = task.vmmap.lock();
    let Ok(target) = read_user_cstr(&mut vmmap, tf.arg(1) as usize, MAX_PATH) else {
        return KernelError::InvalidArgument.to_errno();
    };
    drop(vmmap);
    // Only the already-mounted in-core filesystems can be re-mounted
    // elsewhere by this syscall; mounting a fresh block device requires
    // the kernel-side `vfs::mount_fat32_partition` bootstrap path, not a
    // user-reachable one (no block-device-by-name registry in scope).
    let cwd = task.cwd.lock().clone();
    let Ok(source_vnode) = vfs::resolve(&cwd, &target) else {
        return KernelError::NoSuchFile.to_errno();
    };
    vfs::mount(&target, source_vnode);
    0
}

pub fn umount_syscall(task: &Arc<Task>, tf: &TrapFrame) -> i64 {
    let mut vmmap = task.vmmap.lock();
    let Ok(target) = read_user_cstr(&mut vmmap, tf.arg(0) as usize, MAX_PATH) else {
        return KernelError::InvalidArgument.to_errno();
    };
    drop(vmmap);
    match vfs::umount(&target) {
        Ok(()) => 0,
        Err(e) => e.to_errno(),
    }
}
