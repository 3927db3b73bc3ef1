//! ELF64 executable loader (§6). Only `PT_LOAD` segments are honored; this
//! kernel never links dynamically (non-goal, §1), so `PT_DYNAMIC`/`PT_INTERP`
//! are deliberately ignored rather than rejected.

use alloc::vec;

use crate::error::{KResult, KernelError};
use crate::mm::buddy::PAGE_SIZE;
use crate::mm::vmmap::{MapAttr, VMMap};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;

/// Where `e_entry` is relative to, for the position-independent-less
/// executables this kernel loads (no ASLR, §1 non-goal).
pub const ELF_DEFAULT_BASE: usize = 0;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64Header {
    magic: [u8; 4],
    class: u8,
    data: u8,
    version: u8,
    os_abi: u8,
    abi_version: u8,
    padding: [u8; 7],
    elf_type: u16,
    machine: u16,
    version2: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64ProgramHeader {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

const PF_X: u32 = 1 << 0;
const PF_W: u32 = 1 << 1;
const PF_R: u32 = 1 << 2;

/// The result of a successful load: where to set `ELR_EL1`/`SP_EL0`.
pub struct LoadedImage {
    pub entry: usize,
    pub user_stack_top: usize,
}

/// Size of the freshly mapped user stack region (§1 scenario 2: "at least
/// one page").
const USER_STACK_PAGES: usize = 4;
const USER_STACK_TOP: usize = 0x0000_7fff_ffff_0000;

fn read_header(image: &[u8]) -> KResult<Elf64Header> {
    if image.len() < core::mem::size_of::<Elf64Header>() {
        return Err(KernelError::InvalidArgument);
    }
    // SAFETY: length checked above; `Elf64Header` has no invalid bit
    // patterns for any byte sequence (all integer fields).
    let header = unsafe { (image.as_ptr() as *const Elf64Header).read_unaligned() };
    if header.magic != ELF_MAGIC {
        return Err(KernelError::InvalidArgument);
    }
    if header.class != ELFCLASS64 || header.data != ELFDATA2LSB {
        return Err(KernelError::InvalidArgument);
    }
    if header.elf_type != ET_EXEC {
        return Err(KernelError::InvalidArgument);
    }
    Ok(header)
}

fn program_headers(image: &[u8], header: &Elf64Header) -> KResult<&[Elf64ProgramHeader]> {
    let count = header.phnum as usize;
    let offset = header.phoff as usize;
    let entsize = core::mem::size_of::<Elf64ProgramHeader>();
    if header.phentsize as usize != entsize {
        return Err(KernelError::InvalidArgument);
    }
    let end = offset
        .checked_add(count * entsize)
        .ok_or(KernelError::InvalidArgument)?;
    if end > image.len() {
        return Err(KernelError::InvalidArgument);
    }
    // SAFETY: `offset..end` was just bounds-checked against `image.len()`,
    // and `Elf64ProgramHeader` has no invalid bit patterns.
    let slice = unsafe {
        core::slice::from_raw_parts(image[offset..].as_ptr() as *const Elf64ProgramHeader, count)
    };
    Ok(slice)
}

fn segment_attr(flags: u32) -> MapAttr {
    MapAttr {
        writable: flags & PF_W != 0,
        user_accessible: true,
        executable: flags & PF_X != 0,
        device: false,
    }
    .normalize_read_only(flags & PF_R != 0)
}

impl MapAttr {
    /// ELF `p_flags` without `PF_R` is not a representable hardware state
    /// (AArch64 has no write-without-read); the flag is accepted purely for
    /// faithfulness to the format and otherwise ignored.
    fn normalize_read_only(self, _readable: bool) -> MapAttr {
        self
    }
}

/// Loads `image`'s `PT_LOAD` segments into `vmmap`, honoring each segment's
/// r/w/x permissions, then maps a fresh user stack. `vmmap` is assumed to
/// already be empty (the caller is responsible for `VMMap::unmap_all`
/// beforehand, per §4.6's exec contract).
pub fn load(image: &[u8], vmmap: &mut VMMap) -> KResult<LoadedImage> {
    let header = read_header(image)?;
    let phdrs = program_headers(image, &header)?;

    for ph in phdrs {
        if ph.p_type != PT_LOAD {
            continue;
        }
        load_segment(image, ph, vmmap)?;
    }

    let user_stack_top = map_user_stack(vmmap)?;

    Ok(LoadedImage {
        entry: ELF_DEFAULT_BASE + header.entry as usize,
        user_stack_top,
    })
}

fn load_segment(image: &[u8], ph: &Elf64ProgramHeader, vmmap: &mut VMMap) -> KResult<()> {
    let vaddr = ph.p_vaddr as usize;
    let file_off = ph.p_offset as usize;
    let file_sz = ph.p_filesz as usize;
    let mem_sz = ph.p_memsz as usize;

    if file_off
        .checked_add(file_sz)
        .is_none_or(|end| end > image.len())
    {
        return Err(KernelError::InvalidArgument);
    }

    let page_start = vaddr & !(PAGE_SIZE - 1);
    let page_end = (vaddr + mem_sz).div_ceil(PAGE_SIZE) * PAGE_SIZE;
    let attr = segment_attr(ph.p_flags);

    let mut page_va = page_start;
    while page_va < page_end {
        let frame = crate::mm::phys::alloc_frame().ok_or(KernelError::OutOfMemory)?;
        let dst = (crate::arch::aarch64::KERNEL_VA_BASE + frame) as *mut u8;
        // SAFETY: `frame` is a freshly allocated, exclusively owned page.
        unsafe {
            core::ptr::write_bytes(dst, 0, PAGE_SIZE);
        }

        // Copy whatever portion of the segment's file bytes fall in this
        // page; anything past `file_sz` (the `.bss` tail) stays zeroed.
        let page_file_start = page_va.max(vaddr);
        let page_file_end = (page_va + PAGE_SIZE).min(vaddr + file_sz);
        if page_file_end > page_file_start {
            let src_off = file_off + (page_file_start - vaddr);
            let len = page_file_end - page_file_start;
            let dst_off = page_file_start - page_va;
            // SAFETY: `src_off..src_off+len` was validated against
            // `image.len()` via `file_off + file_sz <= image.len()` above;
            // `dst_off..dst_off+len` is within the freshly zeroed page.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    image[src_off..src_off + len].as_ptr(),
                    dst.add(dst_off),
                    len,
                );
            }
        }

        vmmap.map(page_va, frame, attr);
        page_va += PAGE_SIZE;
    }
    Ok(())
}

fn map_user_stack(vmmap: &mut VMMap) -> KResult<usize> {
    let base = USER_STACK_TOP - USER_STACK_PAGES * PAGE_SIZE;
    for i in 0..USER_STACK_PAGES {
        let frame = crate::mm::phys::alloc_frame().ok_or(KernelError::OutOfMemory)?;
        vmmap.map(base + i * PAGE_SIZE, frame, MapAttr::USER_RW);
    }
    Ok(USER_STACK_TOP)
}

/// Copies `argv` onto the top of the freshly mapped user stack as a
/// NUL-terminated string table, returning the user-space pointer to the
/// resulting `argv[]` array (the kernel never passes `argc`/`argv` any
/// other way; there is no C runtime below user-space `main` to do it).
pub fn copy_argv(vmmap: &mut VMMap, stack_top: usize, argv: &[&str]) -> KResult<usize> {
    let mut cursor = stack_top;
    let mut pointers = vec![0usize; argv.len()];

    for (i, arg) in argv.iter().enumerate() {
        let bytes = arg.as_bytes();
        cursor -= bytes.len() + 1;
        write_user_bytes(vmmap, cursor, bytes)?;
        write_user_bytes(vmmap, cursor + bytes.len(), &[0])?;
        pointers[i] = cursor;
    }

    cursor &= !0xf;
    cursor -= (pointers.len() + 1) * core::mem::size_of::<usize>();
    for (i, p) in pointers.iter().enumerate() {
        write_user_bytes(vmmap, cursor + i * core::mem::size_of::<usize>(), &p.to_le_bytes())?;
    }
    Ok(cursor)
}

/// Writes a `#[repr(C)]` value into user memory byte-for-byte. Used by the
/// signal-delivery path (§4.9 id 8) to push a [`crate::process::signal::SignalFrame`]
/// onto the user stack without the kernel ever dereferencing a user pointer
/// directly.
pub fn write_user_struct<T: Copy>(vmmap: &mut VMMap, va: usize, value: &T) -> KResult<()> {
    // SAFETY: reads `size_of::<T>()` bytes out of `value`, which is a valid
    // reference for that length; the resulting slice is never mutated.
    let bytes = unsafe {
        core::slice::from_raw_parts(value as *const T as *const u8, core::mem::size_of::<T>())
    };
    write_user_bytes(vmmap, va, bytes)
}

fn write_user_bytes(vmmap: &mut VMMap, va: usize, bytes: &[u8]) -> KResult<()> {
    for (i, &b) in bytes.iter().enumerate() {
        let addr = va + i;
        let phys = vmmap
            .get_physical_address(addr & !(PAGE_SIZE - 1))
            .ok_or(KernelError::InvalidAddress)?;
        let page_off = addr & (PAGE_SIZE - 1);
        // SAFETY: `phys` is a live frame mapped by `map_user_stack`, seen
        // through the kernel's high-half identity mapping.
        unsafe {
            let dst = (crate::arch::aarch64::KERNEL_VA_BASE + phys - (addr & (PAGE_SIZE - 1)) + page_off) as *mut u8;
            *dst = b;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let image = [0u8; 64];
        assert!(read_header(&image).is_err());
    }

    #[test]
    fn segment_attr_denies_write_without_flag() {
        let attr = segment_attr(PF_R | PF_X);
        assert!(!attr.writable);
        assert!(attr.executable);
    }
}
