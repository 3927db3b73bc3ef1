//! MBR partition table parsing (§4.16). Reads exactly the fields the FAT32
//! mount path needs and nothing else (GPT, extended/logical partitions,
//! and non-FAT32 kinds are out of scope — §1's "on-disk FAT32 parsing
//! beyond what the VFS contract demands").

use crate::device::BlockDevice;
use crate::error::{KResult, KernelError};

const BOOT_SIGNATURE_OFFSET: usize = 510;
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;

/// FAT32, CHS-addressed.
const PART_TYPE_FAT32_CHS: u8 = 0x0B;
/// FAT32, LBA-addressed (the common case on SD cards formatted by modern
/// tooling).
const PART_TYPE_FAT32_LBA: u8 = 0x0C;

#[derive(Debug, Clone, Copy)]
pub struct MbrPartition {
    pub partition_type: u8,
    pub lba_start: u32,
    pub sector_count: u32,
}

impl MbrPartition {
    pub fn is_fat32(&self) -> bool {
        matches!(self.partition_type, PART_TYPE_FAT32_CHS | PART_TYPE_FAT32_LBA)
    }
}

/// Reads the MBR from LBA 0 and returns its (up to four) partition table
/// entries, in on-disk order. Partition *kind* is left to the caller to
/// interpret via [`MbrPartition::is_fat32`] — per §9's resolved open
/// question, a non-FAT32 type byte is reported rather than assumed away.
pub fn read_partitions(device: &dyn BlockDevice) -> KResult<[MbrPartition; 4]> {
    let mut sector = [0u8; 512];
    device.read_block(0, &mut sector);

    if sector[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2] != BOOT_SIGNATURE {
        return Err(KernelError::InvalidArgument);
    }

    let mut partitions = [MbrPartition {
        partition_type: 0,
        lba_start: 0,
        sector_count: 0,
    }; 4];

    for (i, partition) in partitions.iter_mut().enumerate() {
        let entry = &sector[PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE..];
        partition.partition_type = entry[4];
        partition.lba_start = u32::from_le_bytes(entry[8..12].try_into().unwrap());
        partition.sector_count = u32::from_le_bytes(entry[12..16].try_into().unwrap());
    }

    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin::Mutex;

    struct FakeDisk {
        sector0: Mutex<[u8; 512]>,
    }

    impl BlockDevice for FakeDisk {
        fn read_block(&self, lba: u64, buf: &mut [u8; 512]) {
            if lba == 0 {
                buf.copy_from_slice(&*self.sector0.lock());
            }
        }
        fn write_block(&self, _lba: u64, _buf: &[u8; 512]) {}
    }

    fn disk_with_one_fat32_partition() -> FakeDisk {
        let mut sector = [0u8; 512];
        let entry_off = PARTITION_TABLE_OFFSET;
        sector[entry_off + 4] = PART_TYPE_FAT32_LBA;
        sector[entry_off + 8..entry_off + 12].copy_from_slice(&2048u32.to_le_bytes());
        sector[entry_off + 12..entry_off + 16].copy_from_slice(&524288u32.to_le_bytes());
        sector[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2].copy_from_slice(&BOOT_SIGNATURE);
        FakeDisk {
            sector0: Mutex::new(sector),
        }
    }

    #[test]
    fn rejects_missing_boot_signature() {
        let disk = FakeDisk {
            sector0: Mutex::new([0u8; 512]),
        };
        assert!(read_partitions(&disk).is_err());
    }

    #[test]
    fn parses_fat32_partition_entry() {
        let disk = disk_with_one_fat32_partition();
        let partitions = read_partitions(&disk).unwrap();
        assert!(partitions[0].is_fat32());
        assert_eq!(partitions[0].lba_start, 2048);
        assert_eq!(partitions[0].sector_count, 524288);
        assert!(!partitions[1].is_fat32());
    }
}
