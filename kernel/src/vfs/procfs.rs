//! `/proc`: a read-only, entirely synthetic filesystem. Every vnode's
//! content is generated at `get_content()` time from live kernel state
//! (the process table, `jiffies`) rather than stored — there is nothing to
//! keep in sync because nothing is ever cached.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KResult, KernelError};
use crate::vfs::tmpfs::TmpfsNode;
use crate::vfs::vnode::{Mode, NodeKind, Vnode, VnodeRef};

static NEXT_INDEX: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(2 << 32);

fn alloc_index() -> u64 {
    NEXT_INDEX.fetch_add(1, core::sync::atomic::Ordering::Relaxed)
}

/// A single synthetic file, e.g. `/proc/uptime` or `/proc/<pid>/status`.
pub struct ProcFile {
    index: u64,
    name: String,
    generate: fn() -> String,
    parent: Mutex<Option<Weak<dyn Vnode>>>,
}

impl ProcFile {
    pub fn new(name: &str, generate: fn() -> String) -> Arc<ProcFile> {
        Arc::new(ProcFile {
            index: alloc_index(),
            name: name.to_string(),
            generate,
            parent: Mutex::new(None),
        })
    }
}

impl Vnode for ProcFile {
    fn index(&self) -> u64 {
        self.index
    }
    fn kind(&self) -> NodeKind {
        NodeKind::File
    }
    fn name(&self) -> String {
        self.name.clone()
    }
    fn mode(&self) -> Mode {
        0o444
    }
    fn size(&self) -> usize {
        (self.generate)().len()
    }
    fn uid(&self) -> u32 {
        0
    }
    fn gid(&self) -> u32 {
        0
    }
    fn ctime(&self) -> u64 {
        0
    }
    fn atime(&self) -> u64 {
        0
    }
    fn mtime(&self) -> u64 {
        0
    }
    fn chmod(&self, _mode: Mode) -> KResult<()> {
        Err(KernelError::PermissionDenied)
    }
    fn chown(&self, _uid: u32, _gid: u32) -> KResult<()> {
        Err(KernelError::PermissionDenied)
    }
    fn get_parent(&self) -> Option<VnodeRef> {
        self.parent.lock().as_ref().and_then(Weak::upgrade)
    }
    fn set_parent(&self, parent: Option<VnodeRef>) {
        *self.parent.lock() = parent.map(|p| Arc::downgrade(&p));
    }
    fn create_child(&self, _name: &str, _kind: NodeKind, _mode: Mode) -> KResult<VnodeRef> {
        Err(KernelError::NotADirectory)
    }
    fn add_child(&self, _child: VnodeRef) -> KResult<()> {
        Err(KernelError::NotADirectory)
    }
    fn remove_child(&self, _name: &str) -> KResult<VnodeRef> {
        Err(KernelError::NotADirectory)
    }
    fn get_child(&self, _name: &str) -> KResult<VnodeRef> {
        Err(KernelError::NotADirectory)
    }
    fn get_ith_child(&self, _i: usize) -> KResult<VnodeRef> {
        Err(KernelError::NotADirectory)
    }
    fn get_children_count(&self) -> usize {
        0
    }
    fn get_content(&self) -> KResult<Vec<u8>> {
        Ok((self.generate)().into_bytes())
    }
    fn set_content(&self, _content: Vec<u8>) -> KResult<()> {
        Err(KernelError::PermissionDenied)
    }
}

fn generate_uptime() -> String {
    format!("{}\n", crate::timer::jiffies())
}

fn generate_tasklist() -> String {
    let mut out = String::new();
    for pid in crate::process::all_pids() {
        out.push_str(&format!("{}\n", pid.0));
    }
    out
}

/// Builds the `/proc` root: `uptime`, and a flat `tasks` listing of every
/// live PID (a per-PID `/proc/<pid>/` subtree is more than this kernel's
/// single-binary init/shell world needs; the flat list gives `ps`-style
/// tooling enough to work with).
pub fn build_root() -> VnodeRef {
    let root = TmpfsNode::new_root();
    let uptime: VnodeRef = ProcFile::new("uptime", generate_uptime);
    let tasks: VnodeRef = ProcFile::new("tasks", generate_tasklist);
    root.add_child(uptime).expect("procfs: uptime node");
    root.add_child(tasks).expect("procfs: tasks node");
    root
}
