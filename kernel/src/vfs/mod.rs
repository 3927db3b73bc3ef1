//! VFS layer (C5): mountpoint tree, path resolution, and the filesystem
//! kinds mounted over it (tmpfs at `/`, devtmpfs at `/dev`, procfs at
//! `/proc`, optionally FAT32-over-MBR at `/mnt`).

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KResult, KernelError};

pub mod cpio;
pub mod devtmpfs;
pub mod fat32;
pub mod file;
pub mod mbr;
pub mod procfs;
pub mod tmpfs;
pub mod vnode;

use vnode::{NodeKind, VnodeRef};

struct Mount {
    path: String,
    root: VnodeRef,
}

struct Vfs {
    mounts: Vec<Mount>,
}

static VFS: Mutex<Option<Vfs>> = Mutex::new(None);

fn normalize(path: &str) -> Vec<String> {
    let mut stack: Vec<String> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            other => stack.push(other.to_string()),
        }
    }
    stack
}

/// Mounts `root` at `path`, which must already be `/`-separated and
/// absolute. Longer mount paths take priority over shorter ones so `/dev`
/// shadows `/` for lookups under it.
pub fn mount(path: &str, root: VnodeRef) {
    let mut guard = VFS.lock();
    let vfs = guard.get_or_insert_with(|| Vfs { mounts: Vec::new() });
    vfs.mounts.push(Mount {
        path: path.to_string(),
        root,
    });
    vfs.mounts.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
}

pub fn umount(path: &str) -> KResult<()> {
    let mut guard = VFS.lock();
    let vfs = guard.as_mut().ok_or(KernelError::NoSuchFile)?;
    let before = vfs.mounts.len();
    vfs.mounts.retain(|m| m.path != path);
    if vfs.mounts.len() == before {
        return Err(KernelError::NoSuchFile);
    }
    Ok(())
}

/// Finds the mount whose path is the longest prefix of `components`'
/// absolute path, and returns its root plus the remaining path components
/// relative to that mount.
fn resolve_mount(components: &[String]) -> KResult<(VnodeRef, Vec<String>)> {
    let guard = VFS.lock();
    let vfs = guard.as_ref().ok_or(KernelError::NoSuchFile)?;
    let full = alloc::format!("/{}", components.join("/"));
    for mount in &vfs.mounts {
        if full == mount.path || full.starts_with(&alloc::format!("{}/", mount.path)) || mount.path == "/" {
            let prefix_components = normalize(&mount.path);
            let relative = components[prefix_components.len()..].to_vec();
            return Ok((mount.root.clone(), relative));
        }
    }
    Err(KernelError::NoSuchFile)
}

/// Resolves an absolute or `cwd`-relative path to its vnode, walking
/// `.`/`..` per §4.5's idempotent normalization requirement and crossing
/// mountpoints transparently.
pub fn resolve(cwd: &VnodeRef, path: &str) -> KResult<VnodeRef> {
    if !path.starts_with('/') {
        // Relative paths are resolved against `cwd` by walking from it
        // directly rather than reconstructing an absolute string (the
        // in-memory vnode tree doesn't track its own path).
        let mut node = cwd.clone();
        for component in normalize(path) {
            node = step(&node, &component)?;
        }
        return Ok(node);
    }

    let components = normalize(path);
    let (mut node, relative) = resolve_mount(&components)?;
    for component in relative {
        node = step(&node, &component)?;
    }
    Ok(node)
}

fn step(node: &VnodeRef, component: &str) -> KResult<VnodeRef> {
    if component == ".." {
        return Ok(node.get_parent().unwrap_or_else(|| node.clone()));
    }
    node.get_child(component)
}

/// Mounts the in-core filesystems (tmpfs root, devtmpfs at `/dev`, procfs
/// at `/proc`), unpacks the CPIO initramfs into the root, and returns the
/// root vnode callers need to seed the first task's `cwd`. Called once
/// from bootstrap (C11).
pub fn init(console: &'static dyn crate::device::CharacterDevice, initramfs: &[u8]) -> KResult<VnodeRef> {
    let root = tmpfs::TmpfsNode::new_root();
    let root_ref: VnodeRef = root.clone();
    mount("/", root_ref.clone());

    let dev_root = devtmpfs::build_root(console);
    mount("/dev", dev_root.clone());
    root.create_child("dev", NodeKind::Directory, 0o755).ok();

    let proc_root = procfs::build_root();
    mount("/proc", proc_root.clone());
    root.create_child("proc", NodeKind::Directory, 0o755).ok();

    let n = cpio::unpack(initramfs, &root_ref)?;
    log::info!("vfs: unpacked {n} initramfs entries");

    Ok(root_ref)
}

/// Mounts a FAT32 partition found on `device` at `/mnt`, per §4.16's
/// supplement. Bootstrap calls this only when an SD card block device is
/// actually present; its absence is not an error the VFS itself models.
pub fn mount_fat32_partition(device: &'static dyn crate::device::BlockDevice) -> KResult<()> {
    let partitions = mbr::read_partitions(device)?;
    let partition = partitions
        .iter()
        .find(|p| p.is_fat32())
        .ok_or(KernelError::InvalidArgument)?;
    let fat_root = fat32::Fat32Fs::mount(device, *partition)?;
    mount("/mnt", fat_root);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::tmpfs::TmpfsNode;

    fn reset() {
        *VFS.lock() = None;
    }

    #[test]
    fn resolves_nested_absolute_path() {
        reset();
        let root = TmpfsNode::new_root();
        let root_ref: VnodeRef = root.clone();
        mount("/", root_ref.clone());
        let bin = root.create_child("bin", NodeKind::Directory, 0o755).unwrap();
        bin.create_child("init", NodeKind::File, 0o755).unwrap();

        let resolved = resolve(&root_ref, "/bin/init").unwrap();
        assert_eq!(resolved.name(), "init");
    }

    #[test]
    fn dotdot_walks_up_to_parent() {
        reset();
        let root = TmpfsNode::new_root();
        let root_ref: VnodeRef = root.clone();
        mount("/", root_ref.clone());
        let bin: VnodeRef = root.create_child("bin", NodeKind::Directory, 0o755).unwrap();
        bin.set_parent(Some(root_ref.clone()));

        let resolved = resolve(&bin, "..").unwrap();
        assert_eq!(resolved.name(), root_ref.name());
    }

    #[test]
    fn missing_path_is_no_such_file() {
        reset();
        let root = TmpfsNode::new_root();
        let root_ref: VnodeRef = root.clone();
        mount("/", root_ref.clone());
        assert!(resolve(&root_ref, "/nope").is_err());
    }
}
