//! `/dev`: a directory tree of device vnodes (§4.12's `CharacterDevice`/
//! `BlockDevice` traits exposed through the VFS). Directories are ordinary
//! [`crate::vfs::tmpfs::TmpfsNode`]s; only the leaf nodes differ, wrapping
//! a `&'static dyn CharacterDevice`/`BlockDevice` instead of a content
//! buffer.

use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::device::{BlockDevice, CharacterDevice};
use crate::error::{KResult, KernelError};
use crate::vfs::tmpfs::TmpfsNode;
use crate::vfs::vnode::{Mode, NodeKind, Vnode, VnodeRef};

static NEXT_INDEX: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(1 << 32);

fn alloc_index() -> u64 {
    NEXT_INDEX.fetch_add(1, core::sync::atomic::Ordering::Relaxed)
}

pub struct CharDeviceNode {
    index: u64,
    name: String,
    device: &'static dyn CharacterDevice,
    parent: Mutex<Option<Weak<dyn Vnode>>>,
}

impl CharDeviceNode {
    pub fn new(name: &str, device: &'static dyn CharacterDevice) -> Arc<CharDeviceNode> {
        Arc::new(CharDeviceNode {
            index: alloc_index(),
            name: name.to_string(),
            device,
            parent: Mutex::new(None),
        })
    }
}

impl Vnode for CharDeviceNode {
    fn index(&self) -> u64 {
        self.index
    }
    fn kind(&self) -> NodeKind {
        NodeKind::CharDevice
    }
    fn name(&self) -> String {
        self.name.clone()
    }
    fn mode(&self) -> Mode {
        0o666
    }
    fn size(&self) -> usize {
        0
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
        Ok(())
    }
    fn chown(&self, _uid: u32, _gid: u32) -> KResult<()> {
        Ok(())
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
        Err(KernelError::DeviceError)
    }
    fn set_content(&self, _content: Vec<u8>) -> KResult<()> {
        Err(KernelError::DeviceError)
    }
    fn as_character_device(&self) -> Option<&dyn CharacterDevice> {
        Some(self.device)
    }
}

pub struct BlockDeviceNode {
    index: u64,
    name: String,
    device: &'static dyn BlockDevice,
    parent: Mutex<Option<Weak<dyn Vnode>>>,
}

impl BlockDeviceNode {
    pub fn new(name: &str, device: &'static dyn BlockDevice) -> Arc<BlockDeviceNode> {
        Arc::new(BlockDeviceNode {
            index: alloc_index(),
            name: name.to_string(),
            device,
            parent: Mutex::new(None),
        })
    }
}

impl Vnode for BlockDeviceNode {
    fn index(&self) -> u64 {
        self.index
    }
    fn kind(&self) -> NodeKind {
        NodeKind::BlockDevice
    }
    fn name(&self) -> String {
        self.name.clone()
    }
    fn mode(&self) -> Mode {
        0o660
    }
    fn size(&self) -> usize {
        0
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
        Ok(())
    }
    fn chown(&self, _uid: u32, _gid: u32) -> KResult<()> {
        Ok(())
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
        Err(KernelError::DeviceError)
    }
    fn set_content(&self, _content: Vec<u8>) -> KResult<()> {
        Err(KernelError::DeviceError)
    }
    fn as_block_device(&self) -> Option<&dyn BlockDevice> {
        Some(self.device)
    }
}

/// Builds the `/dev` root with `console` (the `CharacterDevice` UART sink
/// used for the first task's stdio) already populated. Bootstrap (C11)
/// mounts this at `/dev` and additionally registers it under
/// `TASKS`/`FdTable::install_console`.
pub fn build_root(console: &'static dyn CharacterDevice) -> VnodeRef {
    let root = TmpfsNode::new_root();
    let console_node: VnodeRef = CharDeviceNode::new("console", console);
    root.add_child(console_node).expect("devtmpfs: console node");
    root
}
