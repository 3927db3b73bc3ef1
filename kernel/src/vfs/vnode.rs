//! The in-memory filesystem object (§3's `Vnode`) and the trait every
//! concrete filesystem (tmpfs, devtmpfs, procfs, FAT32-over-MBR) implements
//! to plug into the VFS dispatch without the rest of the kernel ever
//! matching on a concrete type.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::KResult;

pub type VnodeRef = Arc<dyn Vnode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    CharDevice,
    BlockDevice,
}

/// Unix-style mode/perm bits, kept as a plain integer per §3's "mode
/// (type+perms)" rather than a bitflag type — this kernel never interprets
/// the permission bits itself (no multi-user enforcement, §1 non-goal),
/// only stores and reports them for `stat`/`chmod`.
pub type Mode = u32;

/// The vnode-level capability interface (§3 "Operations the vnode's
/// filesystem must implement"). Every method here is a direct translation
/// of that list; nothing is added beyond what path resolution, `readdir`,
/// and `chmod`/`chown` need.
pub trait Vnode: Send + Sync {
    fn index(&self) -> u64;
    fn kind(&self) -> NodeKind;
    fn name(&self) -> String;

    fn mode(&self) -> Mode;
    fn size(&self) -> usize;
    fn uid(&self) -> u32;
    fn gid(&self) -> u32;
    fn ctime(&self) -> u64;
    fn atime(&self) -> u64;
    fn mtime(&self) -> u64;

    fn chmod(&self, mode: Mode) -> KResult<()>;
    fn chown(&self, uid: u32, gid: u32) -> KResult<()>;

    fn get_parent(&self) -> Option<VnodeRef>;
    fn set_parent(&self, parent: Option<VnodeRef>);

    /// Directory operations. Implementors that aren't directories (plain
    /// files, device nodes) return `NotADirectory`.
    fn create_child(&self, name: &str, kind: NodeKind, mode: Mode) -> KResult<VnodeRef>;
    fn add_child(&self, child: VnodeRef) -> KResult<()>;
    fn remove_child(&self, name: &str) -> KResult<VnodeRef>;
    fn get_child(&self, name: &str) -> KResult<VnodeRef>;
    fn get_ith_child(&self, i: usize) -> KResult<VnodeRef>;
    fn get_children_count(&self) -> usize;

    /// File content operations. For a directory these return
    /// `IsADirectory`. For a character/block device node, these read/write
    /// at the byte-stream or block level instead; see
    /// [`as_character_device`]/[`as_block_device`] for the narrower
    /// contract devtmpfs actually uses.
    fn get_content(&self) -> KResult<Vec<u8>>;
    fn set_content(&self, content: Vec<u8>) -> KResult<()>;

    /// Narrow escape hatches for devtmpfs nodes (§4.12); `None` for every
    /// ordinary tmpfs/procfs/FAT32 vnode.
    fn as_character_device(&self) -> Option<&dyn crate::device::CharacterDevice> {
        None
    }
    fn as_block_device(&self) -> Option<&dyn crate::device::BlockDevice> {
        None
    }
}

/// Lists `(name, vnode)` pairs for every child of a directory vnode, the
/// shape every `readdir`/`getdents` caller actually wants instead of
/// repeatedly indexing with `get_ith_child`.
pub fn list_children(dir: &VnodeRef) -> KResult<Vec<(String, VnodeRef)>> {
    let count = dir.get_children_count();
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let child = dir.get_ith_child(i)?;
        out.push((child.name(), child));
    }
    Ok(out)
}
