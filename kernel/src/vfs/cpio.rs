//! CPIO "New ASCII" (`070701`) initramfs unpacking (§4.17). Only regular
//! files and directories are materialized; device nodes, symlinks, and
//! hardlinks in an archive are skipped, matching §4.17's documented scope.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{KResult, KernelError};
use crate::vfs::vnode::{NodeKind, VnodeRef};

const NEWC_MAGIC: &[u8; 6] = b"070701";
const HEADER_SIZE: usize = 110;
const TRAILER_NAME: &str = "TRAILER!!!";

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

fn parse_hex(field: &[u8]) -> KResult<u32> {
    if field.len() != 8 {
        return Err(KernelError::InvalidArgument);
    }
    let mut value = 0u32;
    for &b in field {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(KernelError::InvalidArgument),
        };
        value = (value << 4) | digit as u32;
    }
    Ok(value)
}

fn align4(offset: usize) -> usize {
    (offset + 3) & !3
}

struct Header {
    mode: u32,
    filesize: u32,
    namesize: u32,
}

impl Header {
    fn parse(data: &[u8]) -> KResult<Header> {
        if data.len() < HEADER_SIZE || &data[0..6] != NEWC_MAGIC {
            return Err(KernelError::InvalidArgument);
        }
        Ok(Header {
            mode: parse_hex(&data[14..22])?,
            filesize: parse_hex(&data[54..62])?,
            namesize: parse_hex(&data[94..102])?,
        })
    }

    fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
    fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }
    fn perm(&self) -> u32 {
        self.mode & 0o777
    }
}

/// Walks `root`, creating any path components of `path` that don't already
/// exist as directories, and returns the final directory vnode.
fn ensure_parent_dirs(root: &VnodeRef, path: &str) -> KResult<VnodeRef> {
    let mut dir = root.clone();
    let mut components: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let leaf = components.pop();
    for component in components {
        dir = match dir.get_child(component) {
            Ok(existing) => existing,
            Err(_) => dir.create_child(component, NodeKind::Directory, 0o755)?,
        };
    }
    let _ = leaf;
    Ok(dir)
}

fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Unpacks `archive` into `root`, creating each entry's full directory
/// path as needed. Stops at the `TRAILER!!!` end-of-archive marker.
pub fn unpack(archive: &[u8], root: &VnodeRef) -> KResult<usize> {
    let mut offset = 0;
    let mut count = 0;

    while offset + HEADER_SIZE <= archive.len() {
        let header = Header::parse(&archive[offset..])?;
        offset += HEADER_SIZE;

        let name_end = offset
            .checked_add(header.namesize as usize)
            .ok_or(KernelError::InvalidArgument)?;
        if name_end > archive.len() || header.namesize == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let name_bytes = &archive[offset..name_end - 1]; // drop NUL terminator
        let name = core::str::from_utf8(name_bytes).map_err(|_| KernelError::InvalidArgument)?;
        offset = align4(name_end);

        if name == TRAILER_NAME {
            break;
        }
        if name.is_empty() || name == "." {
            offset = align4(offset + header.filesize as usize);
            continue;
        }

        if header.is_dir() {
            let parent = ensure_parent_dirs(root, name)?;
            if parent.get_child(leaf_name(name)).is_err() {
                parent.create_child(leaf_name(name), NodeKind::Directory, header.perm())?;
            }
        } else if header.is_regular() {
            let data_end = offset
                .checked_add(header.filesize as usize)
                .ok_or(KernelError::InvalidArgument)?;
            if data_end > archive.len() {
                return Err(KernelError::InvalidArgument);
            }
            let parent = ensure_parent_dirs(root, name)?;
            let file = parent.create_child(leaf_name(name), NodeKind::File, header.perm())?;
            file.set_content(archive[offset..data_end].to_vec())?;
            offset = align4(data_end);
        } else {
            // Symlinks, device nodes, fifos: out of §4.17's scope.
            offset = align4(offset + header.filesize as usize);
        }

        count += 1;
    }

    Ok(count)
}

/// Serializes a single New ASCII entry, header+name padded together to a
/// 4-byte boundary then data padded to a 4-byte boundary, the exact
/// inverse of the layout `unpack` consumes (§8's CPIO round-trip
/// property).
fn pack_entry(name: &str, mode: u32, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(NEWC_MAGIC);
    let hex8 = |v: u32| alloc::format!("{:08x}", v);
    out.extend_from_slice(hex8(0).as_bytes()); // ino
    out.extend_from_slice(hex8(mode).as_bytes());
    for _ in 0..4 {
        out.extend_from_slice(hex8(0).as_bytes()); // uid,gid,nlink,mtime
    }
    out.extend_from_slice(hex8(data.len() as u32).as_bytes());
    for _ in 0..4 {
        out.extend_from_slice(hex8(0).as_bytes()); // devmajor,devminor,rdevmajor,rdevminor
    }
    out.extend_from_slice(hex8(name.len() as u32 + 1).as_bytes());
    out.extend_from_slice(hex8(0).as_bytes()); // check
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out.extend_from_slice(data);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

/// Re-serializes `root`'s regular files (directories aren't replayed, as
/// `unpack` never needs their own entry to reconstruct them) as a fresh
/// New ASCII archive terminated by the trailer entry. Exists for §8's
/// round-trip property; bootstrap never calls this, the kernel only ever
/// consumes a CPIO archive, never produces one.
pub fn pack_regular_files(entries: &[(String, u32, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, mode, data) in entries {
        out.extend(pack_entry(name, S_IFREG | mode, data));
    }
    out.extend(pack_entry(TRAILER_NAME, 0, &[]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::tmpfs::TmpfsNode;

    fn build_entry(name: &str, mode: u32, data: &[u8]) -> Vec<u8> {
        pack_entry(name, mode, data)
    }

    fn build_trailer() -> Vec<u8> {
        build_entry(TRAILER_NAME, 0, &[])
    }

    #[test]
    fn unpacks_a_single_regular_file() {
        let root: VnodeRef = TmpfsNode::new_root();
        let mut archive = build_entry("hello.txt", S_IFREG | 0o644, b"hi");
        archive.extend(build_trailer());

        let n = unpack(&archive, &root).unwrap();
        assert_eq!(n, 1);
        let file = root.get_child("hello.txt").unwrap();
        assert_eq!(file.get_content().unwrap(), b"hi");
    }

    #[test]
    fn unpacks_nested_directories() {
        let root: VnodeRef = TmpfsNode::new_root();
        let mut archive = build_entry("bin/init", S_IFREG | 0o755, b"\x7fELF");
        archive.extend(build_trailer());

        unpack(&archive, &root).unwrap();
        let bin = root.get_child("bin").unwrap();
        let init = bin.get_child("init").unwrap();
        assert_eq!(init.get_content().unwrap(), b"\x7fELF");
    }

    #[test]
    fn pack_then_unpack_round_trips_regular_files() {
        let entries = alloc::vec![
            (String::from("a.txt"), 0o644u32, b"hello".to_vec()),
            (String::from("b.bin"), 0o600u32, alloc::vec![1u8, 2, 3, 4, 5, 6, 7]),
        ];
        let archive = pack_regular_files(&entries);

        let root: VnodeRef = TmpfsNode::new_root();
        let n = unpack(&archive, &root).unwrap();
        assert_eq!(n, entries.len());
        for (name, _, data) in &entries {
            assert_eq!(&root.get_child(name).unwrap().get_content().unwrap(), data);
        }

        // Re-serializing what `unpack` actually produced in the vnode tree
        // must reproduce the archive bit-for-bit (§8's CPIO round-trip
        // law) -- read each entry's mode and content back from its vnode
        // rather than reusing the original `entries` slice, or this would
        // only prove `pack_regular_files` is deterministic.
        let readback: Vec<(String, u32, Vec<u8>)> = entries
            .iter()
            .map(|(name, _, _)| {
                let vnode = root.get_child(name).unwrap();
                (name.clone(), vnode.mode(), vnode.get_content().unwrap())
            })
            .collect();
        let reserialized = pack_regular_files(&readback);
        assert_eq!(reserialized, archive);
    }
}
