//! BCM2837 mini UART (UART1), the RPi3B+'s secondary UART and the one
//! wired to the GPIO header pins this kernel's serial console uses.
//!
//! Register-level only: baud-rate/GPIO pin-mux setup happens once in
//! [`MiniUart::init`], called by [`crate::bootstrap`] before anything else
//! touches the console.

use crate::arch::aarch64::mmio::{mmio_read32, mmio_write32};
use crate::device::CharacterDevice;

// Offsets within the peripheral MMIO window (§6 "Memory-mapped I/O").
const AUX_ENABLES: usize = 0x0021_5004;
const AUX_MU_IO_REG: usize = 0x0021_5040;
const AUX_MU_IER_REG: usize = 0x0021_5044;
const AUX_MU_IIR_REG: usize = 0x0021_5048;
const AUX_MU_LCR_REG: usize = 0x0021_504C;
const AUX_MU_MCR_REG: usize = 0x0021_5050;
const AUX_MU_LSR_REG: usize = 0x0021_5054;
const AUX_MU_CNTL_REG: usize = 0x0021_5060;
const AUX_MU_BAUD_REG: usize = 0x0021_5068;

const GPFSEL1: usize = 0x0020_0004;
const GPPUD: usize = 0x0020_2094;
const GPPUDCLK0: usize = 0x0020_2098;

const LSR_TX_EMPTY: u32 = 1 << 5;
const LSR_RX_READY: u32 = 1 << 0;

pub struct MiniUart;

impl MiniUart {
    pub const fn new() -> Self {
        MiniUart
    }

    /// Muxes GPIO14/15 to the mini UART's TXD1/RXD1 alt function, disables
    /// their pull-up/down, then enables the mini UART at 115200 8N1. Must
    /// run before any byte is read or written.
    ///
    /// # Safety
    /// Must be called exactly once, before any other code touches the
    /// AUX/mini-UART or GPIO14/15 MMIO registers.
    pub unsafe fn init(&self) {
        // SAFETY: every access below targets registers documented by the
        // BCM2837 peripheral manual, driven in the vendor-specified order;
        // the caller's contract guarantees exclusivity.
        unsafe {
            mmio_write32(AUX_ENABLES, 1);
            mmio_write32(AUX_MU_IER_REG, 0);
            mmio_write32(AUX_MU_CNTL_REG, 0);
            mmio_write32(AUX_MU_LCR_REG, 3); // 8-bit mode
            mmio_write32(AUX_MU_MCR_REG, 0);
            mmio_write32(AUX_MU_IER_REG, 0);
            mmio_write32(AUX_MU_IIR_REG, 0xc6); // clear FIFOs
            mmio_write32(AUX_MU_BAUD_REG, 270); // 250MHz / (8 * (270+1)) ~= 115200

            let mut sel = mmio_read32(GPFSEL1);
            sel &= !((7 << 12) | (7 << 15));
            sel |= (2 << 12) | (2 << 15); // ALT5 on GPIO14/15
            mmio_write32(GPFSEL1, sel);

            mmio_write32(GPPUD, 0);
            for _ in 0..150 {
                core::arch::asm!("nop", options(nomem, nostack));
            }
            mmio_write32(GPPUDCLK0, (1 << 14) | (1 << 15));
            for _ in 0..150 {
                core::arch::asm!("nop", options(nomem, nostack));
            }
            mmio_write32(GPPUDCLK0, 0);

            mmio_write32(AUX_MU_CNTL_REG, 3); // enable tx+rx
        }
    }
}

impl Default for MiniUart {
    fn default() -> Self {
        Self::new()
    }
}

impl CharacterDevice for MiniUart {
    fn read_byte(&self) -> u8 {
        loop {
            // SAFETY: LSR is a read-only status register, no side effect.
            let ready = unsafe { mmio_read32(AUX_MU_LSR_REG) } & LSR_RX_READY != 0;
            if ready {
                break;
            }
        }
        // SAFETY: LSR just confirmed a byte is waiting in the RX FIFO.
        unsafe { mmio_read32(AUX_MU_IO_REG) as u8 }
    }

    fn write_byte(&self, byte: u8) {
        loop {
            // SAFETY: LSR is a read-only status register, no side effect.
            let empty = unsafe { mmio_read32(AUX_MU_LSR_REG) } & LSR_TX_EMPTY != 0;
            if empty {
                break;
            }
        }
        // SAFETY: LSR just confirmed the TX FIFO has room.
        unsafe { mmio_write32(AUX_MU_IO_REG, byte as u32) };
    }
}
