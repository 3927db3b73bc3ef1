//! Logging & diagnostics (C13): a [`log`](https://docs.rs/log) facade sink
//! that writes formatted records to the console UART, plus the crate's
//! panic handler.
//!
//! Installed once, at the earliest point [`crate::bootstrap`] has a live
//! UART, via [`log::set_logger`]. Verbosity is a build-time decision (the
//! `log-trace`/`log-debug` Cargo features), matching the teacher's
//! convention of feature-gated subsystems rather than a runtime knob.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record};
use spin::Once;

use crate::device::CharacterDevice;

/// A `core::fmt::Write` adapter over any [`CharacterDevice`], used both by
/// the logger and directly by early boot prints before `log::set_logger`
/// has run.
pub struct UartWriter<'a>(pub &'a dyn CharacterDevice);

impl Write for UartWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.0.write_byte(b'\r');
            }
            self.0.write_byte(byte);
        }
        Ok(())
    }
}

struct KernelLogger;

/// The console device the logger writes through. Set exactly once by
/// [`init`]; unset before that point (log records are dropped, not
/// buffered, since nothing before UART bring-up should be logging).
///
/// A trait object reference is a fat pointer, so this is a `spin::Once`
/// rather than an `AtomicPtr` (which requires a `Sized` pointee).
static CONSOLE: Once<&'static dyn CharacterDevice> = Once::new();

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(console) = CONSOLE.get().copied() else {
            return;
        };
        let pid = crate::sched::current_pid_if_any()
            .map(|p| p.0)
            .unwrap_or(0);
        let mut writer = UartWriter(console);
        let _ = write!(
            writer,
            "[{:>5} pid={}] {}\n",
            record.level(),
            pid,
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Installs the console logger. Must run after the UART device is live and
/// before any other subsystem calls into `log::{info,warn,error,debug,trace}`.
///
/// # Safety
/// `console` must remain valid for the `'static` lifetime of the kernel
/// (true of every console device, which is a boot-time singleton).
pub unsafe fn init(console: &'static dyn CharacterDevice) {
    CONSOLE.call_once(|| console);
    let level = if cfg!(feature = "log-trace") {
        LevelFilter::Trace
    } else if cfg!(feature = "log-debug") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    log::set_max_level(level);
    // `set_logger` can only fail if called twice; bootstrap calls this once.
    log::set_logger(&LOGGER).expect("logging::init called more than once");
}

/// The panic handler: format through the same UART sink, mask IRQs, halt.
/// Never attempts to unwind or resume (§7).
///
/// Host `testing`-feature builds link `std`, which supplies its own panic
/// runtime; a second `#[panic_handler]` there is a compile error, so this
/// one only exists in the bare-metal build.
#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    crate::arch::aarch64::irq::disable_irqs();
    if let Some(console) = CONSOLE.get().copied() {
        let mut writer = UartWriter(console);
        let _ = writeln!(writer, "\nkernel panic: {info}");
    }
    loop {
        // SAFETY: `wfe` has no side effect beyond suspending the core until
        // the next event; appropriate terminal state for an unrecoverable
        // fault.
        unsafe {
            core::arch::asm!("wfe", options(nomem, nostack));
        }
    }
}
