//! Per-task anonymous-memory region bookkeeping backing the `mmap`/
//! `mprotect`/`munmap` syscalls (§4.9 id 10). [`crate::mm::vmmap::VMMap`]
//! only knows about individual PTEs; this is the region-granularity layer
//! `munmap`/`mprotect` need to know how many pages a prior `mmap` call
//! actually covers.
//!
//! Only `MAP_ANONYMOUS` is supported (§4.9): every mapping is backed by
//! freshly zeroed frames, never a file.

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::error::{KResult, KernelError};
use crate::mm::buddy::PAGE_SIZE;
use crate::mm::vmmap::{MapAttr, VMMap};

/// Base of the mmap bump region: below the user stack (§6's fixed layout),
/// above anything `exec` ever places a `PT_LOAD` segment at in this
/// kernel's tiny userspace.
const MMAP_BASE: usize = 0x0000_1000_0000_0000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

impl Prot {
    fn to_map_attr(self) -> MapAttr {
        MapAttr {
            writable: self.contains(Prot::WRITE),
            user_accessible: true,
            executable: self.contains(Prot::EXEC),
            device: false,
        }
    }
}

#[derive(Clone)]
struct Region {
    base: usize,
    pages: usize,
}

/// A task's mmap arena: a monotonically growing bump cursor (this kernel
/// never reuses address-space holes; no `mmap` non-goal beyond §1's scope
/// requires it) plus the list of live regions `munmap`/`mprotect` resolve
/// against.
#[derive(Clone)]
pub struct MmapState {
    next_va: usize,
    regions: Vec<Region>,
}

impl MmapState {
    pub const fn new() -> Self {
        MmapState {
            next_va: MMAP_BASE,
            regions: Vec::new(),
        }
    }

    /// Maps `length` bytes (rounded up to whole pages) of fresh zeroed
    /// anonymous memory with `prot`, returning the base virtual address.
    pub fn mmap(&mut self, vmmap: &mut VMMap, length: usize, prot: Prot) -> KResult<usize> {
        if length == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let pages = length.div_ceil(PAGE_SIZE);
        let base = self.next_va;
        let attr = prot.to_map_attr();

        for i in 0..pages {
            let frame = crate::mm::phys::alloc_frame().ok_or(KernelError::OutOfMemory)?;
            let dst = (crate::arch::aarch64::KERNEL_VA_BASE + frame) as *mut u8;
            // SAFETY: `frame` was just allocated and is owned exclusively
            // by this mapping until `vmmap.map` below hands it to the task.
            unsafe {
                core::ptr::write_bytes(dst, 0, PAGE_SIZE);
            }
            vmmap.map(base + i * PAGE_SIZE, frame, attr);
        }

        self.next_va = base + pages * PAGE_SIZE;
        self.regions.push(Region { base, pages });
        Ok(base)
    }

    /// Unmaps the region starting at `addr`. `addr` must be exactly a
    /// region's base, as returned by `mmap` — this kernel doesn't support
    /// partial munmap of a region, matching the spec's minimal surface.
    pub fn munmap(&mut self, vmmap: &mut VMMap, addr: usize) -> KResult<()> {
        let idx = self
            .regions
            .iter()
            .position(|r| r.base == addr)
            .ok_or(KernelError::InvalidAddress)?;
        let region = self.regions.remove(idx);
        for i in 0..region.pages {
            vmmap.unmap(region.base + i * PAGE_SIZE);
        }
        Ok(())
    }

    /// Changes the protection of a previously `mmap`'d region. Like
    /// `munmap`, only whole-region calls are supported.
    pub fn mprotect(&mut self, vmmap: &mut VMMap, addr: usize, prot: Prot) -> KResult<()> {
        let region = self
            .regions
            .iter()
            .find(|r| r.base == addr)
            .ok_or(KernelError::InvalidAddress)?;
        let attr = prot.to_map_attr();
        for i in 0..region.pages {
            let va = region.base + i * PAGE_SIZE;
            let Some(phys) = vmmap.get_physical_address(va) else {
                continue;
            };
            let phys = phys & !(PAGE_SIZE - 1);
            vmmap.unmap(va);
            vmmap.map(va, phys, attr);
        }
        Ok(())
    }
}

impl Default for MmapState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::aarch64::KERNEL_VA_BASE;
    use crate::mm::phys;
    use alloc::boxed::Box;
    use alloc::vec;

    /// Backs the buddy zone with a leaked host buffer so `VMMap::new` and
    /// `MmapState::mmap` have frames to allocate from, mirroring the
    /// pattern `mm::buddy`/`mm::slab`'s own tests use.
    fn with_frames(frames: usize) {
        let backing = vec![0u8; frames * PAGE_SIZE].into_boxed_slice();
        let base = Box::leak(backing).as_ptr() as usize - KERNEL_VA_BASE;
        // SAFETY: test-only, single-threaded, zone not previously initialized.
        unsafe {
            phys::init(base, frames);
        }
    }

    #[test]
    fn mmap_allocates_distinct_growing_regions() {
        with_frames(16);
        let mut state = MmapState::new();
        let mut vmmap = VMMap::new();
        let a = state.mmap(&mut vmmap, PAGE_SIZE, Prot::READ).unwrap();
        let b = state.mmap(&mut vmmap, PAGE_SIZE, Prot::READ).unwrap();
        assert!(b >= a + PAGE_SIZE);
    }

    #[test]
    fn munmap_unknown_address_errors() {
        with_frames(16);
        let mut state = MmapState::new();
        let mut vmmap = VMMap::new();
        assert!(state.munmap(&mut vmmap, 0x1234).is_err());
    }
}
