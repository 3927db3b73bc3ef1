//! IRQ-masking primitives. There is no SMP in this kernel, so the only
//! correctness hazard inside a critical section is re-entrant preemption by
//! an interrupt, not another core. Every shared-mutable singleton is guarded
//! by a [`spin::Mutex`] taken under an [`IrqGuard`] wherever the same state
//! is also touched from IRQ context.

mod irqlock;

pub use irqlock::IrqGuard;
