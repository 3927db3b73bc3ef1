//! Per-task virtual memory map (C4): a 4-level ARMv8 page-table tree plus
//! the copy-on-write operations fork and the data-abort handler need.
//!
//! The kernel half of the address space (`va >= KERNEL_VA_BASE`) is
//! established once at boot and never touched here; every operation in
//! this module only ever walks or mutates the lower half.

use crate::arch::aarch64::mmu::{self, PteFlags};
use crate::arch::aarch64::KERNEL_VA_BASE;
use crate::mm::buddy::PAGE_SIZE;
use crate::mm::page_ref::PAGE_REFS;
use crate::mm::phys;

fn table_ptr(phys_addr: usize) -> *mut u64 {
    (KERNEL_VA_BASE + phys_addr) as *mut u64
}

fn alloc_zeroed_table() -> usize {
    let frame = phys::alloc_frame().expect("vmmap: out of memory allocating page table");
    let ptr = table_ptr(frame);
    // SAFETY: `frame` is a freshly allocated, exclusively owned page frame;
    // zeroing it as a table of 512 u64 entries is in-bounds.
    unsafe {
        core::ptr::write_bytes(ptr, 0, mmu::ENTRIES_PER_TABLE);
    }
    frame
}

/// Attribute bits a caller of [`VMMap::map`] requests; translated into the
/// hardware PTE bits (plus the automatic COW bit on writable mappings).
#[derive(Clone, Copy, Debug)]
pub struct MapAttr {
    pub writable: bool,
    pub user_accessible: bool,
    pub executable: bool,
    pub device: bool,
}

impl MapAttr {
    pub const KERNEL_RW: MapAttr = MapAttr {
        writable: true,
        user_accessible: false,
        executable: false,
        device: false,
    };
    pub const USER_RW: MapAttr = MapAttr {
        writable: true,
        user_accessible: true,
        executable: false,
        device: false,
    };
    pub const USER_RX: MapAttr = MapAttr {
        writable: false,
        user_accessible: true,
        executable: true,
        device: false,
    };
    pub const USER_RO: MapAttr = MapAttr {
        writable: false,
        user_accessible: true,
        executable: false,
        device: false,
    };

    fn to_bits(self) -> u64 {
        let mut flags = PteFlags::PAGE | PteFlags::ACCESS;
        if self.user_accessible {
            flags |= PteFlags::KERNEL_USER;
        }
        if !self.writable {
            flags |= PteFlags::RDONLY;
        } else {
            flags |= PteFlags::COW;
        }
        if !self.executable {
            flags |= PteFlags::EL0_EXEC_NEVER;
            flags |= PteFlags::EL1_EXEC_NEVER;
        }
        let mair_idx = if self.device {
            mmu::MAIR_DEVICE_NGNRNE_INDEX
        } else {
            mmu::MAIR_NORMAL_NOCACHE_INDEX
        };
        flags.bits() | (mair_idx << 2)
    }
}

pub struct VMMap {
    pgd_phys: usize,
}

impl VMMap {
    pub fn new() -> Self {
        VMMap {
            pgd_phys: alloc_zeroed_table(),
        }
    }

    pub fn pgd_phys(&self) -> usize {
        self.pgd_phys
    }

    /// Walks the 4-level tree for `va`, returning a pointer to its leaf PTE
    /// slot. Creates missing intermediate tables when `create` is true;
    /// otherwise returns `None` on a missing intermediate level.
    fn walk(&mut self, va: usize, create: bool) -> Option<*mut u64> {
        let mut table = self.pgd_phys;
        for (level, index) in [
            mmu::pgd_index(va),
            mmu::pud_index(va),
            mmu::pmd_index(va),
        ]
        .into_iter()
        .enumerate()
        {
            let _ = level;
            let entry_ptr = unsafe { table_ptr(table).add(index) };
            // SAFETY: `table` is always a live table frame owned by this
            // VMMap, `index` is within `ENTRIES_PER_TABLE`.
            let entry = unsafe { *entry_ptr };
            if mmu::is_valid(entry) {
                table = mmu::entry_physical_addr(entry);
            } else if create {
                let new_table = alloc_zeroed_table();
                let descriptor = (new_table as u64) | PteFlags::TABLE.bits();
                // SAFETY: entry_ptr is a valid slot in `table`.
                unsafe {
                    *entry_ptr = descriptor;
                }
                table = new_table;
            } else {
                return None;
            }
        }
        let pte_index = mmu::pte_index(va);
        // SAFETY: `table` is the live PTE-level table.
        Some(unsafe { table_ptr(table).add(pte_index) })
    }

    /// Establishes `v_addr -> p_addr` with the given attributes. Panics if
    /// the mapping already exists, matching §4.4's documented failure mode
    /// (a double-map is an invariant violation, not a recoverable error).
    pub fn map(&mut self, v_addr: usize, p_addr: usize, attr: MapAttr) {
        let pte_ptr = self
            .walk(v_addr, true)
            .expect("vmmap: walk(create=true) cannot fail");
        // SAFETY: pte_ptr is a live PTE slot just produced by walk.
        let existing = unsafe { *pte_ptr };
        assert!(!mmu::is_valid(existing), "vmmap: double map at {v_addr:#x}");

        let descriptor = (p_addr as u64) | attr.to_bits();
        // SAFETY: writing a fresh, previously-invalid PTE slot.
        unsafe {
            *pte_ptr = descriptor;
        }
        PAGE_REFS.lock().inc(p_addr);
    }

    /// Clears the mapping at `v_addr`, decrementing the underlying frame's
    /// reference count. A no-op if nothing was mapped there.
    pub fn unmap(&mut self, v_addr: usize) {
        let Some(pte_ptr) = self.walk(v_addr, false) else {
            return;
        };
        // SAFETY: pte_ptr is a live PTE slot.
        let entry = unsafe { *pte_ptr };
        if !mmu::is_valid(entry) {
            return;
        }
        let frame = mmu::entry_physical_addr(entry);
        // SAFETY: clearing a PTE slot we just read as valid.
        unsafe {
            *pte_ptr = 0;
        }
        PAGE_REFS.lock().dec(frame);
    }

    pub fn is_cow_page(&mut self, v_addr: usize) -> bool {
        match self.walk(v_addr, false) {
            // SAFETY: pte_ptr is a live PTE slot.
            Some(pte_ptr) => {
                let entry = unsafe { *pte_ptr };
                mmu::is_valid(entry) && (entry & PteFlags::COW.bits()) != 0
            }
            None => false,
        }
    }

    pub fn get_physical_address(&mut self, v_addr: usize) -> Option<usize> {
        let pte_ptr = self.walk(v_addr, false)?;
        // SAFETY: pte_ptr is a live PTE slot.
        let entry = unsafe { *pte_ptr };
        if !mmu::is_valid(entry) {
            return None;
        }
        Some(mmu::entry_physical_addr(entry) + mmu::page_offset(v_addr))
    }

    /// The COW-fault fast path: privatize the page at `v_addr`.
    ///
    /// If this VMMap is the sole remaining owner of the underlying frame,
    /// the COW/read-only bits are cleared in place. Otherwise a fresh frame
    /// is allocated, the old contents copied, the PTE repointed, and ref
    /// counts adjusted (old decremented, new incremented). Afterward the
    /// page is always writable and privately owned by this VMMap.
    pub fn copy_page_frame(&mut self, v_addr: usize) {
        let pte_ptr = self
            .walk(v_addr, false)
            .expect("copy_page_frame: called on an unmapped address");
        // SAFETY: pte_ptr is a live PTE slot.
        let entry = unsafe { *pte_ptr };
        assert!(mmu::is_valid(entry), "copy_page_frame: invalid PTE");
        let old_frame = mmu::entry_physical_addr(entry);

        let refcount = PAGE_REFS.lock().get(old_frame);
        if refcount <= 1 {
            let cleared = entry & !(PteFlags::COW.bits() | PteFlags::RDONLY.bits());
            // SAFETY: updating attribute bits of an already-valid PTE.
            unsafe {
                *pte_ptr = cleared;
            }
            return;
        }

        let new_frame = phys::alloc_frame().expect("copy_page_frame: out of memory");
        // SAFETY: copying PAGE_SIZE bytes between two frames this code
        // exclusively owns for the duration of the copy, via their kernel
        // high-half mappings.
        unsafe {
            core::ptr::copy_nonoverlapping(
                table_ptr(old_frame) as *const u8,
                table_ptr(new_frame) as *mut u8,
                PAGE_SIZE,
            );
        }

        let attrs = (entry & mmu::PD_ATTR_MASK) & !(PteFlags::COW.bits() | PteFlags::RDONLY.bits());
        let new_entry = (new_frame as u64) | attrs;
        // SAFETY: repointing a live PTE slot at the freshly copied frame.
        unsafe {
            *pte_ptr = new_entry;
        }

        let mut refs = PAGE_REFS.lock();
        refs.dec(old_frame);
        refs.inc(new_frame);
    }

    /// Discards every user mapping this VMMap owns: unmaps each leaf PTE
    /// (dropping its frame's reference count) and frees every intermediate
    /// table frame, leaving the PGD itself zeroed and ready for `exec` to
    /// build a fresh address space in place (§4.6's "discards the current
    /// VMMap contents").
    pub fn unmap_all(&mut self) {
        Self::clear_table_level(self.pgd_phys, 0);
    }

    fn clear_table_level(table: usize, level: u32) {
        for index in 0..mmu::ENTRIES_PER_TABLE {
            // SAFETY: `table` is a live table frame owned by this VMMap.
            let entry = unsafe { *table_ptr(table).add(index) };
            if !mmu::is_valid(entry) {
                continue;
            }
            let child = mmu::entry_physical_addr(entry);
            if level == 3 {
                PAGE_REFS.lock().dec(child);
            } else {
                Self::clear_table_level(child, level + 1);
                phys::free_frame(child);
            }
            // SAFETY: zeroing a slot in a live table frame this VMMap owns.
            unsafe {
                *table_ptr(table).add(index) = 0;
            }
        }
    }

    /// Deep-copies `other`'s intermediate page-table frames into `self`;
    /// every leaf PTE ends up shared between parent and child, with both
    /// copies marked read-only and COW, and the shared frame's ref count
    /// incremented once for the new mapping.
    pub fn copy_from(&mut self, other: &mut VMMap) {
        Self::copy_table_level(other.pgd_phys, self.pgd_phys, 0);
    }

    fn copy_table_level(src_table: usize, dst_table: usize, level: u32) {
        for index in 0..mmu::ENTRIES_PER_TABLE {
            // SAFETY: src_table/dst_table are live table frames.
            let src_entry = unsafe { *table_ptr(src_table).add(index) };
            if !mmu::is_valid(src_entry) {
                continue;
            }

            if level == 3 {
                // Leaf level: share the frame, force read-only + COW on
                // both sides.
                let shared_frame = mmu::entry_physical_addr(src_entry);
                let cow_attrs = (src_entry & mmu::PD_ATTR_MASK)
                    | PteFlags::COW.bits()
                    | PteFlags::RDONLY.bits();
                let new_entry = (shared_frame as u64) | cow_attrs;
                // SAFETY: writing both the source's and destination's
                // corresponding leaf slots, each a live PTE frame.
                unsafe {
                    *table_ptr(src_table).add(index) = new_entry;
                    *table_ptr(dst_table).add(index) = new_entry;
                }
                PAGE_REFS.lock().inc(shared_frame);
            } else {
                let child_table = alloc_zeroed_table();
                let descriptor = (child_table as u64) | PteFlags::TABLE.bits();
                // SAFETY: dst_table is a live table frame, index in range.
                unsafe {
                    *table_ptr(dst_table).add(index) = descriptor;
                }
                let src_child = mmu::entry_physical_addr(src_entry);
                Self::copy_table_level(src_child, child_table, level + 1);
            }
        }
    }
}

impl Default for VMMap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VMMap {
    /// Releases every frame this address space owns: leaf pages via
    /// `unmap_all`'s ref-count decrements, intermediate tables it frees
    /// directly, and finally the PGD frame itself.
    fn drop(&mut self) {
        self.unmap_all();
        phys::free_frame(self.pgd_phys);
    }
}
