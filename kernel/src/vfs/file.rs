//! `File` (§3): a cursor on a vnode. One instance per `open`; shared
//! between descriptor-table slots only through the `Arc<Mutex<File>>` the
//! FD table stores (fork's shallow-copy semantics, §3 invariant).

use alloc::vec;
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::error::{KResult, KernelError};
use crate::vfs::vnode::{NodeKind, VnodeRef};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const TRUNCATE = 1 << 3;
        const APPEND = 1 << 4;
    }
}

pub struct File {
    pub vnode: VnodeRef,
    pub flags: OpenFlags,
    position: usize,
}

impl File {
    pub fn new(vnode: VnodeRef, flags: OpenFlags) -> File {
        let position = if flags.contains(OpenFlags::APPEND) {
            vnode.size()
        } else {
            0
        };
        File {
            vnode,
            flags,
            position,
        }
    }

    /// Byte-stream reads on a character device bypass content buffering
    /// entirely (§4.12); everything else reads from the vnode's content
    /// blob at the file's current cursor.
    pub fn read(&mut self, buf: &mut [u8]) -> KResult<usize> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(KernelError::PermissionDenied);
        }
        if let Some(device) = self.vnode.as_character_device() {
            for slot in buf.iter_mut() {
                *slot = device.read_byte();
            }
            return Ok(buf.len());
        }

        let content = self.vnode.get_content()?;
        if self.position >= content.len() {
            return Ok(0);
        }
        let n = (content.len() - self.position).min(buf.len());
        buf[..n].copy_from_slice(&content[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    pub fn write(&mut self, buf: &[u8]) -> KResult<usize> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(KernelError::PermissionDenied);
        }
        if let Some(device) = self.vnode.as_character_device() {
            for &b in buf {
                device.write_byte(b);
            }
            return Ok(buf.len());
        }
        if self.vnode.kind() == NodeKind::Directory {
            return Err(KernelError::IsADirectory);
        }

        let mut content = self.vnode.get_content()?;
        let end = self.position + buf.len();
        if content.len() < end {
            content.resize(end, 0);
        }
        content[self.position..end].copy_from_slice(buf);
        self.vnode.set_content(content)?;
        self.position = end;
        Ok(buf.len())
    }

    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

/// Reads a whole vnode's contents. Used by `exec` (§4.6) to pull an ELF
/// image off the VFS before handing it to the loader.
pub fn read_whole(vnode: &VnodeRef) -> KResult<Vec<u8>> {
    vnode.get_content()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::tmpfs::TmpfsNode;
    use crate::vfs::vnode::NodeKind;

    #[test]
    fn read_after_write_round_trips() {
        let vnode: VnodeRef = TmpfsNode::new("f", NodeKind::File, 0o644);
        let mut file = File::new(vnode, OpenFlags::READ | OpenFlags::WRITE);
        file.write(b"hello").unwrap();
        file.seek(0);
        let mut buf = vec![0u8; 5];
        let n = file.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_without_flag_is_rejected() {
        let vnode: VnodeRef = TmpfsNode::new("f", NodeKind::File, 0o644);
        let mut file = File::new(vnode, OpenFlags::READ);
        assert!(file.write(b"x").is_err());
    }

    #[test]
    fn read_past_end_returns_zero() {
        let vnode: VnodeRef = TmpfsNode::new("f", NodeKind::File, 0o644);
        let mut file = File::new(vnode, OpenFlags::READ);
        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf).unwrap(), 0);
    }
}
