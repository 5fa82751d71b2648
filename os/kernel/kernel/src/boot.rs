//! # Boot Entry
//!
//! The loader jumps to the physical address of [`_start`] in 32-bit
//! protected mode with flat segments and paging off. The stub
//!
//! 1. loads [`BOOT_GDT`](crate::gdt::BOOT_GDT) so that high-half addresses
//!    wrap around to physical memory,
//! 2. switches to the boot stack and far-jumps to the link address,
//! 3. calls `kernel_entry(magic, multiboot_info)`.
//!
//! The linker script places `.multiboot` first and exports the section
//! boundaries read by [`kernel_image`].

use kernel_alloc::frame_alloc::FrameAllocator;
use kernel_bitmap::Word;
use kernel_info::boot::{BootMemoryInfo, KernelImage, MultibootInfo, SectionRange};
use kernel_info::memory::{KERNEL_STACK_SIZE, phys_to_virt, virt_to_phys};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

pub const MULTIBOOT_HEADER_MAGIC: u32 = 0x1BAD_B002;

/// Load modules on page boundaries.
pub const MULTIBOOT_PAGE_ALIGN: u32 = 1 << 0;

/// Ask for `mem_lower` / `mem_upper`.
pub const MULTIBOOT_MEMORY_INFO: u32 = 1 << 1;

#[repr(C, align(4))]
pub struct MultibootHeader {
    magic: u32,
    flags: u32,
    checksum: u32,
}

impl MultibootHeader {
    #[must_use]
    pub const fn new(flags: u32) -> Self {
        Self {
            magic: MULTIBOOT_HEADER_MAGIC,
            flags,
            checksum: 0u32.wrapping_sub(MULTIBOOT_HEADER_MAGIC).wrapping_sub(flags),
        }
    }
}

#[used]
#[unsafe(link_section = ".multiboot")]
static MULTIBOOT_HEADER: MultibootHeader =
    MultibootHeader::new(MULTIBOOT_PAGE_ALIGN | MULTIBOOT_MEMORY_INFO);

#[repr(C, align(16))]
pub struct Aligned<const N: usize>(pub [u8; N]);

#[unsafe(link_section = ".bss.boot")]
pub static mut BOOT_STACK: Aligned<KERNEL_STACK_SIZE> = Aligned([0; KERNEL_STACK_SIZE]);

/// Kernel entry point, called by the loader at its physical address.
///
/// # Safety
/// Only the boot loader may jump here: `eax` must hold the multiboot magic,
/// `ebx` the physical address of the information block.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[unsafe(no_mangle)]
#[unsafe(naked)]
#[unsafe(link_section = ".init.text")]
pub unsafe extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        "cli",
        // Segments are still flat: address the GDTR by its physical address.
        "mov dword ptr [{gdtr} + 2 - {offset}], offset {gdt} - {offset}",
        "lgdt [{gdtr} - {offset}]",
        "mov cx, {ds}",
        "mov ds, cx",
        "mov es, cx",
        "mov fs, cx",
        "mov gs, cx",
        "mov ss, cx",
        // From here on, link addresses resolve.
        "lea esp, [{stack} + {stack_size}]",
        "push {cs}",
        "lea ecx, [2f]",
        "push ecx",
        "retf",
        "2:",
        "xor ebp, ebp",
        "push ebx",
        "push eax",
        "call {entry}",
        "3: hlt",
        "jmp 3b",
        gdtr = sym crate::gdt::BOOT_GDTR,
        gdt = sym crate::gdt::BOOT_GDT,
        offset = const kernel_info::memory::KERNEL_VIRT_OFFSET,
        ds = const crate::gdt::KERNEL_DS,
        cs = const crate::gdt::KERNEL_CS,
        stack = sym BOOT_STACK,
        stack_size = const KERNEL_STACK_SIZE,
        entry = sym crate::kernel_entry,
    );
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
unsafe extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
    static __text_start: u8;
    static __text_end: u8;
    static __init_text_start: u8;
    static __init_text_end: u8;
    static __init_start: u8;
    static __init_end: u8;
}

/// Section layout as placed by the linker script.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[must_use]
pub fn kernel_image() -> KernelImage {
    image_from_bounds(
        (&raw const __kernel_start).addr(),
        (&raw const __kernel_end).addr(),
        [
            ((&raw const __text_start).addr(), (&raw const __text_end).addr()),
            ((&raw const __init_text_start).addr(), (&raw const __init_text_end).addr()),
            ((&raw const __init_start).addr(), (&raw const __init_end).addr()),
        ],
    )
}

/// `sections` holds `.text`, `.init.text` and `.init`, in that order.
#[allow(clippy::cast_possible_truncation)]
fn image_from_bounds(start: usize, end: usize, sections: [(usize, usize); 3]) -> KernelImage {
    let section = |(start, end): (usize, usize)| {
        SectionRange::new(VirtualAddress::new(start as u32), (end - start) as u32)
    };
    let virt_start = VirtualAddress::new(start as u32);
    let size = (end - start) as u32;
    let [text, init_text, init] = sections.map(section);
    KernelImage {
        phys_start: PhysicalAddress::new(virt_to_phys(virt_start.as_u32())),
        virt_start,
        size: size.next_multiple_of(PAGE_SIZE),
        text,
        init_text,
        init,
    }
}

/// Read the memory sizes from the loader's information block.
///
/// # Safety
/// `mbi` must be the address handed over in `ebx`, and the high half must
/// still reach physical memory (boot segments, or the kernel mapping if the
/// block lies inside it).
#[must_use]
pub unsafe fn memory_info(mbi: PhysicalAddress) -> Option<BootMemoryInfo> {
    let ptr = VirtualAddress::new(phys_to_virt(mbi.as_u32()))
        .as_mut_ptr::<MultibootInfo>()
        .cast_const();
    // SAFETY: See above.
    let info = unsafe { ptr.read_unaligned() };
    BootMemoryInfo::from_multiboot(&info)
}

/// Storage for the frame allocator's maps, right behind the kernel image.
///
/// The frames it occupies are reserved by [`FrameAllocator::init`] together
/// with the image itself.
///
/// # Safety
/// Must be called once; the returned slice aliases physical memory that
/// nothing else owns yet.
#[must_use]
pub unsafe fn allocator_storage(image: &KernelImage, memory: BootMemoryInfo) -> &'static mut [Word] {
    let words = FrameAllocator::storage_words(memory.total_frames());
    let start = image.virt_end();
    // SAFETY: See above.
    unsafe { core::slice::from_raw_parts_mut(start.as_mut_ptr(), words) }
}
