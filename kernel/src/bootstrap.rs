//! Kernel bootstrap (C11): the one-shot sequence between `_start`'s jump
//! into Rust and the scheduler's first, never-returning switch.
//!
//! Runs once, on the boot stack `link.ld` reserves, entirely before any
//! task exists. Order matters and mirrors §4.11 exactly: console before
//! anything prints, the exception vector before IRQs are ever unmasked,
//! memory management before anything allocates, the VFS before `init` is
//! loaded, and the `init` task created *before* idle so it claims PID 1
//! (`process::INIT_PID`) — bootstrap's own ordering decision, since
//! `task::alloc_pid` hands out PIDs strictly in creation order and the
//! spec leaves idle/init creation order unspecified. Recorded in
//! `DESIGN.md`.

use alloc::sync::Arc;

use crate::arch::aarch64::trap::TrapFrame;
use crate::arch::aarch64::{trap, KERNEL_VA_BASE};
use crate::device::{self, Mailbox};
use crate::drivers::mailbox::{VideoCoreMailbox, TAG_GET_ARM_MEMORY};
use crate::drivers::uart::MiniUart;
use crate::elf;
use crate::error::KResult;
use crate::mm::buddy::PAGE_SIZE;
use crate::process::signal;
use crate::process::{self, Pid, Task};
use crate::sched;
use crate::vfs;

/// Physical base address the CPIO initramfs is loaded at before `_start`
/// ever runs, matching the boot stub's contract in the source this kernel
/// is modeled on (`CPIO_ARCHIVE_ADDR`, recorded in `DESIGN.md`).
const INITRAMFS_PHYS_BASE: usize = 0x0800_0000;
/// Upper bound this kernel scans for the archive's `TRAILER!!!` marker
/// (§4.17); `cpio::unpack` stops there regardless of how much of this
/// region is actually real archive versus untouched memory.
const INITRAMFS_MAX_SIZE: usize = 16 * 1024 * 1024;

/// Absolute path of the first user program, per the source this kernel is
/// modeled on (`start_init.cc`'s `INIT_PATH`).
const INIT_PATH: &str = "/sbin/init";

/// The property-channel channel number for tag-based requests (GPU memory
/// queries, clocks, etc.) — fixed by the mailbox protocol, not configurable.
const MBOX_CHANNEL_PROPERTY: u8 = 8;

extern "C" {
    /// `__kernel_end` from `link.ld`: the first physical byte this kernel's
    /// own image (text/rodata/data/bss/boot stack) does not occupy. Only
    /// its address is ever taken.
    static __kernel_end: u8;
}

fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

/// Issues the VideoCore `GET_ARM_MEMORY` property-channel tag and returns
/// `(base, size)` in bytes. The eight-word, 16-byte-aligned buffer layout
/// (size, request code, tag id, max value size, tag request code, two
/// response words, end tag) matches the mailbox driver this kernel is
/// modeled on (`Mailbox::get_arm_memory`, recorded in `DESIGN.md`) rather
/// than a guess at the property-channel spec.
fn query_arm_memory(mailbox: &dyn Mailbox) -> KResult<(u32, u32)> {
    #[repr(C, align(16))]
    struct PropertyBuffer([u32; 8]);

    let mut buf = PropertyBuffer([
        8 * 4,
        0,
        TAG_GET_ARM_MEMORY,
        8,
        0,
        0,
        0,
        0,
    ]);
    mailbox.call(MBOX_CHANNEL_PROPERTY, &mut buf.0)?;
    Ok((buf.0[5], buf.0[6]))
}

/// Entered from `boot.rs`'s `_start`, already running at the
/// `KERNEL_VA_BASE`-relative alias with the MMU enabled and a 16 KiB boot
/// stack under it. Implements §4.11's initialization order. Never returns.
#[no_mangle]
pub extern "C" fn kernel_main() -> ! {
    // SAFETY: called exactly once, before any other code touches the
    // mini-UART or its GPIO pins.
    let uart: &'static MiniUart = {
        static UART: MiniUart = MiniUart::new();
        unsafe { UART.init() };
        &UART
    };
    // SAFETY: `uart` is a `'static` singleton, published exactly once here.
    unsafe {
        device::init_console(uart);
        crate::logging::init(uart);
    }

    log::info!("ember-kernel: booting on Raspberry Pi 3B+");

    // SAFETY: installs the vector table built in trap.rs; must happen
    // before IRQs are ever unmasked, which the first syscall/IRQ return
    // path assumes has already occurred.
    unsafe {
        core::arch::asm!(
            "msr vbar_el1, {0}",
            "isb",
            in(reg) trap::vector_table_addr() as u64,
            options(nostack),
        );
    }

    let mailbox = VideoCoreMailbox::new();
    let (arm_base, arm_size) = query_arm_memory(&mailbox).expect("mailbox: GET_ARM_MEMORY failed");
    log::info!("hardware: ARM memory base={arm_base:#x} size={arm_size:#x}");

    // SAFETY: `&__kernel_end` only has its address taken, never read.
    let kernel_end_phys = unsafe { &__kernel_end as *const u8 as usize };
    let heap_start = align_up(
        kernel_end_phys.max(INITRAMFS_PHYS_BASE + INITRAMFS_MAX_SIZE),
        PAGE_SIZE,
    );
    let heap_end = arm_base as usize + arm_size as usize;
    let total_frames = (heap_end - heap_start) / PAGE_SIZE;
    crate::mm::init(heap_start, total_frames);
    log::info!("mm: {total_frames} frames available from {heap_start:#x}");

    // SAFETY: the initramfs was loaded by the boot stub before `_start`
    // ran, at the fixed physical base the whole image layout assumes; its
    // virtual alias is live as soon as the boot page tables map linear
    // physical memory, which they do unconditionally.
    let initramfs = unsafe {
        core::slice::from_raw_parts(
            (KERNEL_VA_BASE + INITRAMFS_PHYS_BASE) as *const u8,
            INITRAMFS_MAX_SIZE,
        )
    };
    let root = vfs::init(uart, initramfs).expect("vfs: initramfs mount failed");

    crate::timer::init();

    // `init` is created before idle so it claims PID 1 (see module docs).
    let init_task = Task::new_kernel(Pid(0), root.clone(), init_launcher);
    process::register(init_task.clone());
    sched::enqueue(init_task);

    let idle_task = Task::new_kernel(Pid(0), root, idle_entry);
    sched::init(idle_task);

    log::info!("scheduler: handing off to init");
    sched::start(process::lookup(process::INIT_PID).expect("init task just registered"));
}

/// The idle task's body: wait for an event, then let the scheduler pick
/// whatever became runnable. Runs only when the runqueue is empty.
extern "C" fn idle_entry() -> ! {
    loop {
        crate::arch::aarch64::irq::enable_irqs();
        // SAFETY: `wfe` only suspends the core until the next event/IRQ.
        unsafe {
            core::arch::asm!("wfe", options(nomem, nostack));
        }
        sched::schedule();
    }
}

/// PID 1's kernel-thread body: resolves and loads `/sbin/init` into its own
/// (otherwise empty) address space, then hands off to user mode. Unlike
/// `process::exec`, there is no existing trap frame to rewrite — this task
/// never trapped in the first place — so it builds one from scratch and
/// enters through [`trap::enter_user_mode`] instead.
extern "C" fn init_launcher() -> ! {
    let task = sched::current_task();

    let frame = load_init(&task).unwrap_or_else(|e| {
        panic!("bootstrap: failed to start {INIT_PATH}: {e}");
    });
    trap::enter_user_mode(frame);
}

fn load_init(task: &Arc<Task>) -> KResult<TrapFrame> {
    let cwd = task.cwd.lock().clone();
    let file = vfs::resolve(&cwd, INIT_PATH)?;
    let image = vfs::file::read_whole(&file)?;

    let mut vmmap = task.vmmap.lock();
    let loaded = elf::load(&image, &mut vmmap)?;
    let argv_ptr = elf::copy_argv(&mut vmmap, loaded.user_stack_top, &[INIT_PATH])?;
    signal::map_trampoline(&mut vmmap)?;
    drop(vmmap);

    let mut frame = TrapFrame::default();
    frame.elr_el1 = loaded.entry as u64;
    frame.sp_el0 = loaded.user_stack_top as u64;
    frame.x[0] = 1;
    frame.x[1] = argv_ptr as u64;
    Ok(frame)
}
