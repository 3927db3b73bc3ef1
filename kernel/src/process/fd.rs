//! Per-task file-descriptor table: 16 fixed slots, the first three reserved
//! at task creation (§3's `File-descriptor table`).

use alloc::sync::Arc;

use spin::Mutex;

use crate::error::{KResult, KernelError};
use crate::vfs::file::File;

pub const NUM_FDS: usize = 16;
pub const STDIN: usize = 0;
pub const STDOUT: usize = 1;
pub const STDERR: usize = 2;

pub struct FdTable {
    slots: [Option<Arc<Mutex<File>>>; NUM_FDS],
}

impl FdTable {
    pub fn new() -> Self {
        FdTable {
            slots: [const { None }; NUM_FDS],
        }
    }

    /// Populates slots 0/1/2 with the console character device, wrapped as
    /// files over the devtmpfs `/dev/console` vnode. Called once, right
    /// after the first task's `FdTable` is constructed.
    pub fn install_console(&mut self, console_file: Arc<Mutex<File>>) {
        self.slots[STDIN] = Some(console_file.clone());
        self.slots[STDOUT] = Some(console_file.clone());
        self.slots[STDERR] = Some(console_file);
    }

    /// Installs `file` in the lowest-numbered free slot, returning its fd.
    pub fn install(&mut self, file: Arc<Mutex<File>>) -> KResult<i32> {
        for (fd, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(fd as i32);
            }
        }
        Err(KernelError::InvalidArgument)
    }

    pub fn get(&self, fd: i32) -> KResult<Arc<Mutex<File>>> {
        let idx = Self::validate(fd)?;
        self.slots[idx].clone().ok_or(KernelError::NoSuchFd)
    }

    pub fn close(&mut self, fd: i32) -> KResult<()> {
        let idx = Self::validate(fd)?;
        if self.slots[idx].take().is_none() {
            return Err(KernelError::NoSuchFd);
        }
        Ok(())
    }

    fn validate(fd: i32) -> KResult<usize> {
        if fd < 0 || fd as usize >= NUM_FDS {
            return Err(KernelError::NoSuchFd);
        }
        Ok(fd as usize)
    }

    /// `fork`'s FD-table inheritance: a shallow copy. Per-slot `File`
    /// objects end up shared (same `Arc`), not deep-copied (§3 invariant).
    pub fn fork_shallow(&self) -> FdTable {
        FdTable {
            slots: core::array::from_fn(|i| self.slots[i].clone()),
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_shares_file_references() {
        // FdTable construction alone (no real vnode) is enough to exercise
        // the shallow-copy bookkeeping; slots stay None throughout.
        let table = FdTable::new();
        let forked = table.fork_shallow();
        assert!(forked.get(STDIN as i32).is_err());
    }

    #[test]
    fn close_unused_slot_errors() {
        let mut table = FdTable::new();
        assert!(table.close(5).is_err());
    }
}
