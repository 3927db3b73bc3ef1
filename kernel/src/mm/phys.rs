//! The single physical-memory zone this kernel manages, and the thin
//! `alloc_frame`/`free_frame` surface everything above C1 builds on.
//!
//! A real multi-zone (DMA/Normal/High) kernel would keep one
//! [`BuddyAllocator`] per [`crate::mm::MemoryZone`]; RPi3B+'s flat physical
//! layout and this kernel's scope (no DMA-incapable peripherals drive page
//! allocation decisions) make one zone sufficient.

use spin::Mutex;

use crate::mm::buddy::{BuddyAllocator, PAGE_SIZE};

/// Upper bound on zone size: 1 GiB of frames, matching the RPi3B+'s
/// installed RAM. The frame-state table is sized to this at link time; the
/// zone itself may cover fewer frames once the mailbox reports the actual
/// ARM/VideoCore memory split (a device contract, §4.12, outside this
/// module).
const MAX_FRAMES: usize = 1 << 18; // 256Ki frames * 4KiB = 1GiB

static mut FRAME_STATE: [i8; MAX_FRAMES] = [0; MAX_FRAMES];

pub static ZONE: Mutex<Option<BuddyAllocator>> = Mutex::new(None);

/// Initializes the single physical zone. Must run once, before any other
/// C1-or-above allocation, and before the slab allocator is wired up as the
/// global allocator.
///
/// # Safety
/// `base` and `total_frames` must describe memory this kernel exclusively
/// owns (excludes the kernel image itself and anything the mailbox has
/// reserved for VideoCore).
pub unsafe fn init(base: usize, total_frames: usize) {
    assert!(total_frames <= MAX_FRAMES, "physical zone exceeds MAX_FRAMES");
    // SAFETY: called exactly once during bootstrap, before any concurrent
    // access to FRAME_STATE is possible (IRQs are still masked and no other
    // task exists yet).
    let state: &'static mut [i8] = unsafe { &mut FRAME_STATE[..total_frames] };
    *ZONE.lock() = Some(BuddyAllocator::new(base, total_frames, state));
}

pub fn alloc_frame() -> Option<usize> {
    ZONE.lock().as_mut()?.allocate(PAGE_SIZE)
}

pub fn alloc_frames(order_bytes: usize) -> Option<usize> {
    ZONE.lock().as_mut()?.allocate(order_bytes)
}

pub fn free_frame(addr: usize) {
    if let Some(zone) = ZONE.lock().as_mut() {
        zone.deallocate(addr, PAGE_SIZE);
    }
}

pub fn free_frames(addr: usize, nbytes: usize) {
    if let Some(zone) = ZONE.lock().as_mut() {
        zone.deallocate(addr, nbytes);
    }
}
