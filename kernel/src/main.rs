//! Binary entry point. `_start` (the boot-stub handoff) and `kernel_main`
//! (bootstrap, C11) both live in `ember_kernel`'s library target; this
//! crate's only job is to pull that library into the final link.

#![no_std]
#![no_main]

use ember_kernel as _;
