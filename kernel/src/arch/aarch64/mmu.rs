//! ARMv8-A 4-level translation-table constants: PTE attribute bits, the
//! PGD/PUD/PMD/PTE index extraction, and the MAIR attribute indices used by
//! [`crate::mm::vmmap::VMMap`].

use bitflags::bitflags;

pub const VA_BITS: u32 = 48;
pub const TABLE_SHIFT: usize = 9;
pub const ENTRIES_PER_TABLE: usize = 1 << TABLE_SHIFT;

pub const PGD_SHIFT: usize = super::PAGE_SHIFT + 3 * TABLE_SHIFT;
pub const PUD_SHIFT: usize = super::PAGE_SHIFT + 2 * TABLE_SHIFT;
pub const PMD_SHIFT: usize = super::PAGE_SHIFT + 1 * TABLE_SHIFT;
pub const PTE_SHIFT: usize = super::PAGE_SHIFT;

const INDEX_MASK: usize = ENTRIES_PER_TABLE - 1;

#[inline(always)]
pub fn pgd_index(va: usize) -> usize {
    (va >> PGD_SHIFT) & INDEX_MASK
}
#[inline(always)]
pub fn pud_index(va: usize) -> usize {
    (va >> PUD_SHIFT) & INDEX_MASK
}
#[inline(always)]
pub fn pmd_index(va: usize) -> usize {
    (va >> PMD_SHIFT) & INDEX_MASK
}
#[inline(always)]
pub fn pte_index(va: usize) -> usize {
    (va >> PTE_SHIFT) & INDEX_MASK
}
#[inline(always)]
pub fn page_offset(va: usize) -> usize {
    va & (super::PAGE_SIZE - 1)
}

/// Mask isolating the physical page number field of a table/page descriptor.
pub const PD_PAGE_MASK: u64 = 0x0000_7fff_ffff_f000;
pub const PD_ATTR_MASK: u64 = (super::PAGE_SIZE as u64) - 1;

bitflags! {
    /// Software and hardware attribute bits of a leaf page-table entry.
    ///
    /// `COW` (bit 55) is software-reserved; the ARM architecture does not
    /// interpret it. [`crate::mm::vmmap::VMMap::map`] sets it automatically
    /// on every writable mapping (§4.4), and the data-abort handler
    /// consults it to distinguish a copy-on-write fault from a real
    /// segfault.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        /// Entry type: `01` block/invalid-for-leaf, `11` table/page.
        const VALID        = 0b01;
        const TABLE_OR_PAGE = 0b10;
        const KERNEL_USER  = 1 << 6;
        const RDONLY       = 1 << 7;
        const ACCESS       = 1 << 10;
        const EL1_EXEC_NEVER = 1 << 53;
        const EL0_EXEC_NEVER = 1 << 54;
        const COW          = 1 << 55;
    }
}

impl PteFlags {
    /// A valid page-granule leaf entry: `PD_TABLE | PD_PAGE` (`0b11`).
    pub const PAGE: PteFlags = PteFlags::from_bits_truncate(0b11);
    /// A valid intermediate table entry, identical bit pattern to `PAGE` at
    /// non-leaf levels.
    pub const TABLE: PteFlags = PteFlags::from_bits_truncate(0b11);
}

pub const MAIR_DEVICE_NGNRNE_INDEX: u64 = 0;
pub const MAIR_NORMAL_NOCACHE_INDEX: u64 = 1;
pub const MAIR_DEVICE_NGNRNE: u8 = 0b0000_0000;
pub const MAIR_NORMAL_NOCACHE: u8 = 0b0100_0100;

#[inline(always)]
pub fn is_valid(entry: u64) -> bool {
    entry & PteFlags::VALID.bits() != 0
}

#[inline(always)]
pub fn entry_physical_addr(entry: u64) -> usize {
    (entry & PD_PAGE_MASK) as usize
}

/// Boot-time hardware bring-up: the static kernel linear map, installed
/// once by [`_start`](super::boot) before `kernel_main` runs, and the
/// per-task TTBR0 swap the scheduler performs on every context switch.
///
/// This is a different page-table regime from [`crate::mm::vmmap::VMMap`]:
/// 2 MiB block descriptors, no intermediate PTE level, identical content
/// installed under both `TTBR0_EL1` (so the low physical addresses the CPU
/// is still executing at when the MMU turns on remain mapped) and
/// `TTBR1_EL1` (the permanent `KERNEL_VA_BASE`-relative alias everything
/// else in this kernel addresses physical memory through). Once boot jumps
/// to the high alias of `kernel_main`, `TTBR0_EL1` is free for the
/// scheduler to repurpose for user address spaces.
mod boot_map {
    use core::arch::asm;

    use super::{
        pgd_index, pud_index, ENTRIES_PER_TABLE, MAIR_DEVICE_NGNRNE, MAIR_NORMAL_NOCACHE,
        MAIR_NORMAL_NOCACHE_INDEX,
    };
    use crate::arch::aarch64::{KERNEL_VA_BASE, MMIO_BASE};

    const BLOCK_VALID: u64 = 0b01;
    const TABLE_VALID: u64 = 0b11;
    const AF: u64 = 1 << 10;
    const SH_INNER: u64 = 0b11 << 8;

    const BLOCK_SIZE: usize = 1 << super::PMD_SHIFT;
    /// Extent of the identity/linear map: 1 GiB covers every physical
    /// address this board ever has RAM or the peripheral window at
    /// (§6 "Memory-mapped I/O" + the mailbox-reported ARM/VideoCore split).
    const LINEAR_MAP_PAGES: usize = ENTRIES_PER_TABLE;

    #[repr(C, align(4096))]
    struct Table([u64; ENTRIES_PER_TABLE]);

    static mut PGD0: Table = Table([0; ENTRIES_PER_TABLE]);
    static mut PUD0: Table = Table([0; ENTRIES_PER_TABLE]);
    static mut PGD1: Table = Table([0; ENTRIES_PER_TABLE]);
    static mut PUD1: Table = Table([0; ENTRIES_PER_TABLE]);
    static mut PMD_LINEAR: Table = Table([0; ENTRIES_PER_TABLE]);

    const TCR_VALUE: u64 = {
        const T0SZ: u64 = 16;
        const T1SZ: u64 = 16 << 16;
        const TG0_4K: u64 = 0b00 << 14;
        const TG1_4K: u64 = 0b10 << 30;
        const IRGN0_WB: u64 = 0b01 << 8;
        const ORGN0_WB: u64 = 0b01 << 10;
        const SH0_INNER: u64 = 0b11 << 12;
        const IRGN1_WB: u64 = 0b01 << 24;
        const ORGN1_WB: u64 = 0b01 << 26;
        const SH1_INNER: u64 = 0b11 << 28;
        T0SZ | T1SZ | TG0_4K | TG1_4K | IRGN0_WB | ORGN0_WB | SH0_INNER | IRGN1_WB | ORGN1_WB
            | SH1_INNER
    };

    const MAIR_VALUE: u64 = ((MAIR_NORMAL_NOCACHE as u64) << 8) | (MAIR_DEVICE_NGNRNE as u64);

    /// Builds the static boot tables and activates the MMU. Called once
    /// from `_start`, with the MMU off and every address still a bare
    /// physical address (the kernel image is loaded and linked at the same
    /// low physical base, so no relocation is needed).
    ///
    /// # Safety
    /// Must run exactly once, before any other code, with interrupts
    /// masked and no concurrent access to the static tables possible.
    #[no_mangle]
    unsafe extern "C" fn mmu_enable() {
        // SAFETY: single-threaded boot-time setup; every table is touched
        // exactly once here before the MMU (and thus any concurrent
        // access path) exists.
        unsafe {
            for i in 0..LINEAR_MAP_PAGES {
                let pa = i * BLOCK_SIZE;
                let mair_idx = if pa < MMIO_BASE {
                    MAIR_NORMAL_NOCACHE_INDEX
                } else {
                    super::MAIR_DEVICE_NGNRNE_INDEX
                };
                PMD_LINEAR.0[i] = (pa as u64) | BLOCK_VALID | (mair_idx << 2) | AF | SH_INNER;
            }

            let pmd_phys = core::ptr::addr_of!(PMD_LINEAR) as u64;
            PUD0.0[pud_index(0)] = pmd_phys | TABLE_VALID;
            PGD0.0[pgd_index(0)] = (core::ptr::addr_of!(PUD0) as u64) | TABLE_VALID;

            PUD1.0[pud_index(KERNEL_VA_BASE)] = pmd_phys | TABLE_VALID;
            PGD1.0[pgd_index(KERNEL_VA_BASE)] = (core::ptr::addr_of!(PUD1) as u64) | TABLE_VALID;

            let ttbr0 = core::ptr::addr_of!(PGD0) as u64;
            let ttbr1 = core::ptr::addr_of!(PGD1) as u64;

            asm!(
                "msr mair_el1, {mair}",
                "msr tcr_el1, {tcr}",
                "msr ttbr0_el1, {ttbr0}",
                "msr ttbr1_el1, {ttbr1}",
                "isb",
                mair = in(reg) MAIR_VALUE,
                tcr = in(reg) TCR_VALUE,
                ttbr0 = in(reg) ttbr0,
                ttbr1 = in(reg) ttbr1,
                options(nostack),
            );
        }
    }
}

/// Installs `pgd_phys` as the running task's user address space and
/// invalidates any stale TLB entries tagged to the old `TTBR0_EL1`. Called
/// by [`crate::sched`] on every context switch; this kernel doesn't use
/// ASIDs, so a full TLB invalidate is needed rather than a tagged one.
pub fn set_ttbr0(pgd_phys: usize) {
    // SAFETY: `pgd_phys` is a live VMMap's PGD frame, installed only while
    // IRQs are masked around the scheduling transition that owns it.
    unsafe {
        core::arch::asm!(
            "msr ttbr0_el1, {0}",
            "isb",
            "tlbi vmalle1",
            "dsb ish",
            "isb",
            in(reg) pgd_phys as u64,
            options(nostack),
        );
    }
}
