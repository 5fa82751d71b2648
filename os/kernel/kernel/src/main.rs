//! # Kernel Entry Point
//!
//! Boot flow:
//!
//! ```text
//! loader ─► boot::_start ─► kernel_entry ─► kernel_main
//!                                             ├─ frame allocator
//!                                             ├─ paging (bootstrap)
//!                                             ├─ #PF gate
//!                                             └─ release .init
//! ```
//!
//! Hosted builds only compile the descriptor tables and boot helpers so that
//! their unit tests can run.

#![cfg_attr(target_os = "none", no_std, no_main)]
#![cfg_attr(not(target_os = "none"), allow(dead_code))]
#![allow(unsafe_code)]

mod boot;
mod gdt;
mod idt;
#[cfg(all(target_arch = "x86", target_os = "none"))]
mod page_fault;
#[cfg(all(target_arch = "x86", target_os = "none"))]
mod paging;

use kernel_alloc::global;
use kernel_info::boot::BootMemoryInfo;
use kernel_memory_addresses::VirtualAddress;
use kernel_qemu::QemuLogger;
#[cfg(target_os = "none")]
use kernel_qemu::qemu_trace;
use kernel_vmem::PageEntryBits;
use log::{LevelFilter, info, warn};

static LOGGER: QemuLogger = QemuLogger::new(if cfg!(debug_assertions) {
    LevelFilter::Debug
} else {
    LevelFilter::Info
});

/// Scratch window for the post-boot mapping check.
const SCRATCH_START: u32 = 0xD000_0000;
const SCRATCH_PAGES: u32 = 4;

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    qemu_trace!("kernel panic: {info}\n");
    halt()
}

#[cfg(not(target_os = "none"))]
fn main() {}

/// Called by [`boot::_start`] with the values the loader left in `eax` and
/// `ebx`.
#[cfg(all(target_arch = "x86", target_os = "none"))]
extern "C" fn kernel_entry(magic: u32, multiboot_info: u32) -> ! {
    use kernel_info::boot::MULTIBOOT_BOOTLOADER_MAGIC;
    use kernel_memory_addresses::PhysicalAddress;

    qemu_trace!("kernel reporting to QEMU\n");
    if LOGGER.init().is_err() {
        qemu_trace!("logger already installed\n");
    }

    assert_eq!(
        magic, MULTIBOOT_BOOTLOADER_MAGIC,
        "not started by a multiboot loader (eax = {magic:#x})"
    );
    kernel_main(PhysicalAddress::new(multiboot_info))
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
fn kernel_main(multiboot_info: kernel_memory_addresses::PhysicalAddress) -> ! {
    use crate::idt::Idt;
    use crate::page_fault::PageFaultInterrupt;

    // SAFETY: Handed over by the loader; the boot segments are still loaded.
    let Some(memory) = (unsafe { boot::memory_info(multiboot_info) }) else {
        panic!("boot loader did not report memory sizes");
    };
    let image = boot::kernel_image();
    info!(
        "kernel image {}..{} ({} frames), {} KiB lower / {} KiB upper memory",
        image.virt_start,
        image.virt_end(),
        image.frames(),
        memory.lower_kib,
        memory.upper_kib
    );

    // SAFETY: Called once, before anything else owns the memory behind the image.
    let storage = unsafe { boot::allocator_storage(&image, memory) };
    match global::init_frames(memory, image, storage) {
        Ok(stats) => info!("frame allocator ready: {stats}"),
        Err(e) => panic!("frame allocator: {e}"),
    }

    // SAFETY: Single CPU, CPL0, paging off, boot segments loaded.
    if let Err(e) = unsafe { global::init_paging(&mut paging::CpuPaging) } {
        panic!("paging bootstrap: {e}");
    }

    let mut idt = Idt::new();
    idt.init_page_fault_gate();
    // SAFETY: Flat segments are in place and interrupts are off.
    unsafe { idt::init_idt_once(idt) };

    match global::release_init_sections() {
        Ok(frames) => info!("released {frames} boot-only frames"),
        Err(e) => warn!("could not release boot-only sections: {e}"),
    }

    check_mappings(memory);
    global::dump_map();
    info!("memory manager ready, halting");
    halt()
}

/// Map, touch and unmap a few anonymous pages and check that the frame
/// accounting comes back to where it started.
fn check_mappings(memory: BootMemoryInfo) {
    let start = VirtualAddress::new(SCRATCH_START);
    let end = start + SCRATCH_PAGES * kernel_memory_addresses::PAGE_SIZE;
    let before = global::stats();

    if let Err(e) = global::map_range(start, end, PageEntryBits::kernel_rw()) {
        warn!("scratch mapping {start}..{end} failed: {e}");
        return;
    }
    let word = start.as_mut_ptr::<u32>();
    // SAFETY: Freshly mapped, zeroed and owned by this function.
    unsafe {
        assert_eq!(word.read_volatile(), 0);
        word.write_volatile(u32::from_le_bytes(*b"page"));
    }
    info!(
        "scratch {start} -> {:?} of {} frames total",
        global::query(start),
        memory.total_frames()
    );

    if let Err(e) = global::unmap_range(start, end) {
        warn!("scratch unmapping {start}..{end} failed: {e}");
    }
    assert_eq!(global::stats(), before, "scratch mapping leaked frames");
}

fn halt() -> ! {
    loop {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        core::hint::spin_loop();
    }
}
