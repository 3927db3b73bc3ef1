//! In-memory filesystem (mounted at `/`): every vnode's content and
//! children list live in a `Vec` inside a `Mutex`, with nothing backed by
//! any block device. Also the concrete node type devtmpfs reuses for its
//! directory structure (only the leaf device nodes differ, see
//! `vfs::devtmpfs`).

use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KResult, KernelError};
use crate::vfs::vnode::{Mode, NodeKind, Vnode, VnodeRef};

static NEXT_INDEX: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(1);

fn alloc_index() -> u64 {
    NEXT_INDEX.fetch_add(1, core::sync::atomic::Ordering::Relaxed)
}

struct Inner {
    name: String,
    kind: NodeKind,
    mode: Mode,
    uid: u32,
    gid: u32,
    ctime: u64,
    atime: u64,
    mtime: u64,
    content: Vec<u8>,
    children: Vec<VnodeRef>,
    parent: Option<Weak<dyn Vnode>>,
}

pub struct TmpfsNode {
    index: u64,
    inner: Mutex<Inner>,
}

impl TmpfsNode {
    pub fn new(name: &str, kind: NodeKind, mode: Mode) -> Arc<TmpfsNode> {
        let now = crate::timer::jiffies();
        Arc::new(TmpfsNode {
            index: alloc_index(),
            inner: Mutex::new(Inner {
                name: name.to_string(),
                kind,
                mode,
                uid: 0,
                gid: 0,
                ctime: now,
                atime: now,
                mtime: now,
                content: Vec::new(),
                children: Vec::new(),
                parent: None,
            }),
        })
    }

    pub fn new_root() -> Arc<TmpfsNode> {
        Self::new("/", NodeKind::Directory, 0o755)
    }
}

impl Vnode for TmpfsNode {
    fn index(&self) -> u64 {
        self.index
    }

    fn kind(&self) -> NodeKind {
        self.inner.lock().kind
    }

    fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    fn mode(&self) -> Mode {
        self.inner.lock().mode
    }

    fn size(&self) -> usize {
        self.inner.lock().content.len()
    }

    fn uid(&self) -> u32 {
        self.inner.lock().uid
    }

    fn gid(&self) -> u32 {
        self.inner.lock().gid
    }

    fn ctime(&self) -> u64 {
        self.inner.lock().ctime
    }

    fn atime(&self) -> u64 {
        self.inner.lock().atime
    }

    fn mtime(&self) -> u64 {
        self.inner.lock().mtime
    }

    fn chmod(&self, mode: Mode) -> KResult<()> {
        self.inner.lock().mode = mode;
        Ok(())
    }

    fn chown(&self, uid: u32, gid: u32) -> KResult<()> {
        let mut inner = self.inner.lock();
        inner.uid = uid;
        inner.gid = gid;
        Ok(())
    }

    fn get_parent(&self) -> Option<VnodeRef> {
        self.inner.lock().parent.as_ref().and_then(Weak::upgrade)
    }

    fn set_parent(&self, parent: Option<VnodeRef>) {
        self.inner.lock().parent = parent.map(|p| Arc::downgrade(&p));
    }

    fn create_child(&self, name: &str, kind: NodeKind, mode: Mode) -> KResult<VnodeRef> {
        let mut inner = self.inner.lock();
        if inner.kind != NodeKind::Directory {
            return Err(KernelError::NotADirectory);
        }
        if inner.children.iter().any(|c| c.name() == name) {
            return Err(KernelError::FileExists);
        }
        let child: VnodeRef = TmpfsNode::new(name, kind, mode);
        inner.children.push(child.clone());
        Ok(child)
    }

    fn add_child(&self, child: VnodeRef) -> KResult<()> {
        let mut inner = self.inner.lock();
        if inner.kind != NodeKind::Directory {
            return Err(KernelError::NotADirectory);
        }
        if inner.children.iter().any(|c| c.name() == child.name()) {
            return Err(KernelError::FileExists);
        }
        inner.children.push(child);
        Ok(())
    }

    fn remove_child(&self, name: &str) -> KResult<VnodeRef> {
        let mut inner = self.inner.lock();
        let pos = inner
            .children
            .iter()
            .position(|c| c.name() == name)
            .ok_or(KernelError::NoSuchFile)?;
        Ok(inner.children.remove(pos))
    }

    fn get_child(&self, name: &str) -> KResult<VnodeRef> {
        let inner = self.inner.lock();
        inner
            .children
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or(KernelError::NoSuchFile)
    }

    fn get_ith_child(&self, i: usize) -> KResult<VnodeRef> {
        let inner = self.inner.lock();
        inner.children.get(i).cloned().ok_or(KernelError::NoSuchFile)
    }

    fn get_children_count(&self) -> usize {
        self.inner.lock().children.len()
    }

    fn get_content(&self) -> KResult<Vec<u8>> {
        let inner = self.inner.lock();
        if inner.kind == NodeKind::Directory {
            return Err(KernelError::IsADirectory);
        }
        Ok(inner.content.clone())
    }

    fn set_content(&self, content: Vec<u8>) -> KResult<()> {
        let mut inner = self.inner.lock();
        if inner.kind == NodeKind::Directory {
            return Err(KernelError::IsADirectory);
        }
        inner.content = content;
        inner.mtime = crate::timer::jiffies();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_child_rejects_duplicate_name() {
        let root: VnodeRef = TmpfsNode::new_root();
        root.create_child("a", NodeKind::File, 0o644).unwrap();
        assert!(root.create_child("a", NodeKind::File, 0o644).is_err());
    }

    #[test]
    fn set_content_updates_size() {
        let file: VnodeRef = TmpfsNode::new("f", NodeKind::File, 0o644);
        file.set_content(alloc::vec![1, 2, 3]).unwrap();
        assert_eq!(file.size(), 3);
    }

    #[test]
    fn directory_rejects_content_ops() {
        let dir: VnodeRef = TmpfsNode::new_root();
        assert!(dir.get_content().is_err());
    }

    #[test]
    fn remove_child_then_lookup_fails() {
        let root: VnodeRef = TmpfsNode::new_root();
        root.create_child("a", NodeKind::File, 0o644).unwrap();
        root.remove_child("a").unwrap();
        assert!(root.get_child("a").is_err());
    }
}
