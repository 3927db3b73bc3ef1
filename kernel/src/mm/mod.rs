//! Physical/virtual memory management: buddy allocator (C1), slab allocator
//! (C2), page-reference table (C3), and the per-task virtual memory map
//! (C4).

pub mod buddy;
pub mod page_ref;
pub mod phys;
pub mod slab;
pub mod vmmap;

#[cfg(target_os = "none")]
#[global_allocator]
static GLOBAL_ALLOCATOR: slab::GlobalSlab = slab::GlobalSlab;

#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    panic!("allocation failure: {} bytes, align {}", layout.size(), layout.align());
}

// Host test builds (the `testing` feature, §4.16) link `std` and use its
// allocator instead; the kernel's own slab allocator only makes sense atop
// the bare-metal physical memory layout `phys::init` describes.
#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

/// Brings up C1-C3 over the physical memory the mailbox reports as
/// available. The slab allocator (C2, also the `#[global_allocator]`) pulls
/// fresh page frames from C1 lazily on its first allocation, so there is
/// nothing further to wire up here. Called once from [`crate::bootstrap`],
/// before anything that needs `alloc` runs.
pub fn init(base: usize, total_frames: usize) {
    // SAFETY: called exactly once, at a point in bootstrap where no other
    // code has touched physical memory management yet.
    unsafe {
        phys::init(base, total_frames);
    }
}
