//! Raw user-memory access helpers shared by every syscall handler that
//! takes a pointer argument. There is no separate user/kernel copy
//! instruction on this target; every access walks the current task's
//! [`crate::mm::vmmap::VMMap`] by hand and reads/writes through the
//! kernel's high-half mapping of the backing frame.

use alloc::string::String;
use alloc::vec::Vec;

use crate::arch::aarch64::KERNEL_VA_BASE;
use crate::error::{KResult, KernelError};
use crate::mm::buddy::PAGE_SIZE;
use crate::mm::vmmap::VMMap;

fn translate(vmmap: &mut VMMap, va: usize) -> KResult<usize> {
    let page_base = va & !(PAGE_SIZE - 1);
    let phys_base = vmmap
        .get_physical_address(page_base)
        .ok_or(KernelError::InvalidAddress)?;
    Ok(phys_base + (va - page_base))
}

pub fn copy_from_user(vmmap: &mut VMMap, va: usize, buf: &mut [u8]) -> KResult<()> {
    for (i, slot) in buf.iter_mut().enumerate() {
        let phys = translate(vmmap, va + i)?;
        // SAFETY: `phys` is a frame mapped into the calling task's address
        // space, reached through the kernel's permanent high-half mapping.
        *slot = unsafe { *((KERNEL_VA_BASE + phys) as *const u8) };
    }
    Ok(())
}

pub fn copy_to_user(vmmap: &mut VMMap, va: usize, buf: &[u8]) -> KResult<()> {
    for (i, &b) in buf.iter().enumerate() {
        let phys = translate(vmmap, va + i)?;
        // SAFETY: see copy_from_user.
        unsafe {
            *((KERNEL_VA_BASE + phys) as *mut u8) = b;
        }
    }
    Ok(())
}

/// Reads a NUL-terminated string from user memory, capped at `max_len`
/// bytes (every VFS path argument goes through this).
pub fn read_user_cstr(vmmap: &mut VMMap, va: usize, max_len: usize) -> KResult<String> {
    let mut bytes = Vec::new();
    for i in 0..max_len {
        let mut byte = [0u8; 1];
        copy_from_user(vmmap, va + i, &mut byte)?;
        if byte[0] == 0 {
            return String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument);
        }
        bytes.push(byte[0]);
    }
    Err(KernelError::InvalidArgument)
}
