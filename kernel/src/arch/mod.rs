//! Architecture-specific glue. This kernel targets AArch64 exclusively (the
//! spec's RPi3B+); the module split mirrors how a multi-arch kernel would be
//! laid out, but only one arch is ever compiled in.

pub mod aarch64;

pub use aarch64 as current;
