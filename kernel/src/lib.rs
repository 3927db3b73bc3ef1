//! `ember-kernel`: a preemptive, round-robin kernel for the Raspberry Pi
//! 3B+ (AArch64, single core in active use).
//!
//! Bare-metal (`target_os = "none"`) by default. The `testing` feature
//! instead links `std` (see `mm`'s global allocator split) so the pure
//! data-structure logic — the buddy/slab allocators, VFS path resolution,
//! the ELF loader, the signal ABI — runs through ordinary `cargo test` on
//! the host, rather than requiring a QEMU or hardware round-trip for every
//! change.

#![no_std]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod arch;
pub mod bootstrap;
pub mod device;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod logging;
pub mod mm;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod timer;
pub mod vfs;
