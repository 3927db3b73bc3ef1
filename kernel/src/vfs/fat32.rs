//! Read-only FAT32 (§4.16/§4.18 supplement): mounted over the MBR
//! partition [`crate::vfs::mbr`] identifies as FAT32. Directory entries are
//! read short-name (8.3) only; long-name (VFAT `0x0F`) entries are skipped
//! rather than reassembled, matching §1's "on-disk FAT32 parsing beyond
//! what the VFS contract demands" exclusion.

use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::device::BlockDevice;
use crate::error::{KResult, KernelError};
use crate::vfs::mbr::MbrPartition;
use crate::vfs::vnode::{Mode, NodeKind, Vnode, VnodeRef};

const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_LONG_NAME: u8 = 0x0F;
const DIR_ENTRY_SIZE: usize = 32;
const DELETED_MARKER: u8 = 0xE5;
const END_OF_ENTRIES: u8 = 0x00;
const FAT32_EOC_MIN: u32 = 0x0FFF_FFF8;

struct Bpb {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sector_count: u16,
    table_count: u8,
    table_size_32: u32,
    root_cluster: u32,
}

impl Bpb {
    /// Parses the BIOS Parameter Block from a partition's first sector,
    /// matching the field layout and offsets of the original's `BootSector`.
    fn parse(sector: &[u8]) -> KResult<Bpb> {
        if sector.len() < 90 {
            return Err(KernelError::InvalidArgument);
        }
        Ok(Bpb {
            bytes_per_sector: u16::from_le_bytes(sector[11..13].try_into().unwrap()),
            sectors_per_cluster: sector[13],
            reserved_sector_count: u16::from_le_bytes(sector[14..16].try_into().unwrap()),
            table_count: sector[16],
            table_size_32: u32::from_le_bytes(sector[36..40].try_into().unwrap()),
            root_cluster: u32::from_le_bytes(sector[44..48].try_into().unwrap()),
        })
    }
}

pub struct Fat32Fs {
    device: &'static dyn BlockDevice,
    partition_lba_start: u32,
    bpb: Bpb,
}

impl Fat32Fs {
    /// Mounts the FAT32 partition described by `partition` on `device`,
    /// returning the root directory vnode. Rejects a non-FAT32 type byte
    /// rather than assuming FAT32 (§9 open question, resolved).
    pub fn mount(device: &'static dyn BlockDevice, partition: MbrPartition) -> KResult<VnodeRef> {
        if !partition.is_fat32() {
            return Err(KernelError::InvalidArgument);
        }
        let mut sector = [0u8; 512];
        device.read_block(partition.lba_start as u64, &mut sector);
        let bpb = Bpb::parse(&sector)?;

        let fs = Arc::new(Fat32Fs {
            device,
            partition_lba_start: partition.lba_start,
            bpb,
        });

        let root_cluster = fs.bpb.root_cluster;
        let root: VnodeRef = Arc::new(Fat32Vnode {
            fs,
            name: Mutex::new(String::new()),
            first_cluster: root_cluster,
            is_dir: true,
            size: 0,
            parent: Mutex::new(None),
        });
        Ok(root)
    }

    fn fat_start_lba(&self) -> u32 {
        self.partition_lba_start + self.bpb.reserved_sector_count as u32
    }

    fn data_start_lba(&self) -> u32 {
        self.fat_start_lba() + self.bpb.table_count as u32 * self.bpb.table_size_32
    }

    fn sectors_per_cluster(&self) -> u32 {
        self.bpb.sectors_per_cluster as u32
    }

    fn cluster_to_lba(&self, cluster: u32) -> u32 {
        self.data_start_lba() + (cluster.saturating_sub(2)) * self.sectors_per_cluster()
    }

    /// Follows the FAT chain starting at `cluster`, reading every cluster's
    /// raw bytes in order.
    fn read_cluster_chain(&self, cluster: u32) -> Vec<u8> {
        let mut out = Vec::new();
        let mut current = cluster;
        while current >= 2 && current < FAT32_EOC_MIN {
            let lba = self.cluster_to_lba(current);
            for s in 0..self.sectors_per_cluster() {
                let mut buf = [0u8; 512];
                self.device.read_block((lba + s) as u64, &mut buf);
                out.extend_from_slice(&buf);
            }
            current = self.next_cluster(current);
        }
        out
    }

    fn next_cluster(&self, cluster: u32) -> u32 {
        let fat_offset = cluster as u64 * 4;
        let sector = self.fat_start_lba() as u64 + fat_offset / 512;
        let offset_in_sector = (fat_offset % 512) as usize;
        let mut buf = [0u8; 512];
        self.device.read_block(sector, &mut buf);
        u32::from_le_bytes(buf[offset_in_sector..offset_in_sector + 4].try_into().unwrap())
            & 0x0FFF_FFFF
    }
}

struct RawDirEntry {
    name: String,
    is_dir: bool,
    first_cluster: u32,
    size: u32,
}

fn parse_short_name(raw: &[u8]) -> String {
    let base = core::str::from_utf8(&raw[0..8]).unwrap_or("").trim_end();
    let ext = core::str::from_utf8(&raw[8..11]).unwrap_or("").trim_end();
    if ext.is_empty() {
        base.to_string()
    } else {
        alloc::format!("{base}.{ext}")
    }
}

fn parse_directory(raw: &[u8]) -> Vec<RawDirEntry> {
    let mut entries = Vec::new();
    for chunk in raw.chunks_exact(DIR_ENTRY_SIZE) {
        let first_byte = chunk[0];
        if first_byte == END_OF_ENTRIES {
            break;
        }
        if first_byte == DELETED_MARKER {
            continue;
        }
        let attr = chunk[11];
        if attr & ATTR_LONG_NAME == ATTR_LONG_NAME || attr & ATTR_VOLUME_ID != 0 {
            continue;
        }
        let name = parse_short_name(&chunk[0..11]);
        if name == "." || name == ".." {
            continue;
        }
        let cluster_hi = u16::from_le_bytes(chunk[20..22].try_into().unwrap()) as u32;
        let cluster_lo = u16::from_le_bytes(chunk[26..28].try_into().unwrap()) as u32;
        let size = u32::from_le_bytes(chunk[28..32].try_into().unwrap());
        entries.push(RawDirEntry {
            name,
            is_dir: attr & ATTR_DIRECTORY != 0,
            first_cluster: (cluster_hi << 16) | cluster_lo,
            size,
        });
    }
    entries
}

pub struct Fat32Vnode {
    fs: Arc<Fat32Fs>,
    name: Mutex<String>,
    first_cluster: u32,
    is_dir: bool,
    size: u32,
    parent: Mutex<Option<Weak<dyn Vnode>>>,
}

impl Fat32Vnode {
    fn children(&self) -> KResult<Vec<RawDirEntry>> {
        if !self.is_dir {
            return Err(KernelError::NotADirectory);
        }
        let raw = self.fs.read_cluster_chain(self.first_cluster);
        Ok(parse_directory(&raw))
    }
}

impl Vnode for Fat32Vnode {
    fn index(&self) -> u64 {
        self.first_cluster as u64
    }
    fn kind(&self) -> NodeKind {
        if self.is_dir {
            NodeKind::Directory
        } else {
            NodeKind::File
        }
    }
    fn name(&self) -> String {
        self.name.lock().clone()
    }
    fn mode(&self) -> Mode {
        0o555
    }
    fn size(&self) -> usize {
        self.size as usize
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
        Err(KernelError::PermissionDenied)
    }
    fn add_child(&self, _child: VnodeRef) -> KResult<()> {
        Err(KernelError::PermissionDenied)
    }
    fn remove_child(&self, _name: &str) -> KResult<VnodeRef> {
        Err(KernelError::PermissionDenied)
    }
    fn get_child(&self, name: &str) -> KResult<VnodeRef> {
        let entry = self
            .children()?
            .into_iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .ok_or(KernelError::NoSuchFile)?;
        Ok(entry_to_vnode(&self.fs, entry))
    }
    fn get_ith_child(&self, i: usize) -> KResult<VnodeRef> {
        let entry = self.children()?.into_iter().nth(i).ok_or(KernelError::NoSuchFile)?;
        Ok(entry_to_vnode(&self.fs, entry))
    }
    fn get_children_count(&self) -> usize {
        self.children().map(|c| c.len()).unwrap_or(0)
    }
    fn get_content(&self) -> KResult<Vec<u8>> {
        if self.is_dir {
            return Err(KernelError::IsADirectory);
        }
        let mut data = self.fs.read_cluster_chain(self.first_cluster);
        data.truncate(self.size as usize);
        Ok(data)
    }
    fn set_content(&self, _content: Vec<u8>) -> KResult<()> {
        Err(KernelError::PermissionDenied)
    }
}

fn entry_to_vnode(fs: &Arc<Fat32Fs>, entry: RawDirEntry) -> VnodeRef {
    Arc::new(Fat32Vnode {
        fs: fs.clone(),
        name: Mutex::new(entry.name),
        first_cluster: entry.first_cluster,
        is_dir: entry.is_dir,
        size: entry.size,
        parent: Mutex::new(None),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_name_with_extension() {
        let mut raw = [b' '; 11];
        raw[0..4].copy_from_slice(b"INIT");
        raw[8..11].copy_from_slice(b"ELF");
        assert_eq!(parse_short_name(&raw), "INIT.ELF");
    }

    #[test]
    fn directory_parse_stops_at_terminator() {
        let mut raw = [0u8; DIR_ENTRY_SIZE * 2];
        raw[0] = END_OF_ENTRIES;
        assert!(parse_directory(&raw).is_empty());
    }

    #[test]
    fn directory_parse_skips_deleted_and_volume_id() {
        let mut raw = [0u8; DIR_ENTRY_SIZE * 2];
        raw[0] = DELETED_MARKER;
        raw[DIR_ENTRY_SIZE + 11] = ATTR_VOLUME_ID;
        assert!(parse_directory(&raw).is_empty());
    }
}
