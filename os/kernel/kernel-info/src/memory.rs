//! # Memory Layout

/// Base of the kernel's high half. Every address space maps the top 1 GiB
/// identically.
pub const KERNEL_VIRT_OFFSET: u32 = 0xC000_0000;

/// Segment base used between the boot stub and paging. Adding it to a
/// high-half virtual address wraps around to the physical address.
pub const BOOT_SEGMENT_BASE: u32 = 0x4000_0000;

/// Where the kernel image is placed in *physical* memory.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const KERNEL_PHYS: u32 = 0x0010_0000;

/// Where the kernel executes (VMA).
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const KERNEL_VIRT: u32 = KERNEL_PHYS + KERNEL_VIRT_OFFSET;

/// First physical address of upper memory. Frames between the end of lower
/// memory and this address are never managed.
pub const UPPER_MEMORY_START: u32 = 0x0010_0000;

/// Entries per page directory and per page table.
pub const PAGE_ENTRIES: usize = 1024;

/// Directory slot that maps the page directory onto itself.
pub const RECURSIVE_SLOT: usize = PAGE_ENTRIES - 1;

/// Linear window through which all page tables of the active address space
/// are visible (table `n` lives at `PTE_WINDOW + n * 4096`).
pub const PTE_WINDOW: u32 = 0xFFC0_0000;

/// Linear address of the active page directory.
pub const PDE_WINDOW: u32 = 0xFFFF_F000;

/// Number of frames summarized by one superframe bit.
pub const SUPERFRAME_FRAMES: usize = 1024;

/// The size of the boot kernel stack.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Physical address backing a high-half kernel address.
#[inline]
#[must_use]
pub const fn virt_to_phys(virt: u32) -> u32 {
    virt.wrapping_sub(KERNEL_VIRT_OFFSET)
}

/// High-half kernel address of a physical address in the first GiB.
#[inline]
#[must_use]
pub const fn phys_to_virt(phys: u32) -> u32 {
    phys.wrapping_add(KERNEL_VIRT_OFFSET)
}

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(4096));
    assert!(KERNEL_VIRT_OFFSET.wrapping_add(BOOT_SEGMENT_BASE) == 0);
    assert!(PTE_WINDOW == (RECURSIVE_SLOT as u32) << 22);
    assert!(PDE_WINDOW == PTE_WINDOW + (RECURSIVE_SLOT as u32) * 4096);
    assert!(KERNEL_PHYS >= UPPER_MEMORY_START);
    assert!((KERNEL_VIRT_OFFSET >> 22) as usize != RECURSIVE_SLOT);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_half_conversions() {
        assert_eq!(virt_to_phys(KERNEL_VIRT), KERNEL_PHYS);
        assert_eq!(phys_to_virt(0), KERNEL_VIRT_OFFSET);
        // Segment base arithmetic wraps high-half addresses to physical ones.
        assert_eq!(KERNEL_VIRT.wrapping_add(BOOT_SEGMENT_BASE), KERNEL_PHYS);
    }
}
