//! # Kernel Boot Information

use crate::memory::KERNEL_VIRT_OFFSET;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

/// Value a multiboot compliant loader leaves in `eax`.
pub const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// `mem_lower` / `mem_upper` are valid.
pub const MULTIBOOT_INFO_MEMORY: u32 = 1 << 0;

/// Leading part of the multiboot information block.
///
/// Only the fields up to the memory sizes are read; the block lives in
/// physical memory and is accessed through the high half before paging.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct MultibootInfo {
    pub flags: u32,
    /// KiB of lower memory starting at address 0.
    pub mem_lower: u32,
    /// KiB of upper memory starting at 1 MiB.
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
}

/// Memory sizes reported by the boot loader.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootMemoryInfo {
    /// Lower memory in KiB (at most 640).
    pub lower_kib: u32,
    /// Upper memory in KiB, starting at 1 MiB.
    pub upper_kib: u32,
}

impl BootMemoryInfo {
    #[must_use]
    pub const fn new(lower_kib: u32, upper_kib: u32) -> Self {
        Self {
            lower_kib,
            upper_kib,
        }
    }

    /// Reads the memory sizes, `None` if the loader did not provide them.
    #[must_use]
    pub const fn from_multiboot(info: &MultibootInfo) -> Option<Self> {
        if info.flags & MULTIBOOT_INFO_MEMORY == 0 {
            return None;
        }
        Some(Self::new(info.mem_lower, info.mem_upper))
    }

    #[must_use]
    pub const fn lower_frames(&self) -> usize {
        kib_to_frames(self.lower_kib)
    }

    #[must_use]
    pub const fn upper_frames(&self) -> usize {
        kib_to_frames(self.upper_kib)
    }

    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.lower_frames() + self.upper_frames()
    }
}

const fn kib_to_frames(kib: u32) -> usize {
    (kib as usize * 1024) / PAGE_SIZE as usize
}

/// A linked section of the kernel image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SectionRange {
    pub start: VirtualAddress,
    /// Size in bytes.
    pub size: u32,
}

impl SectionRange {
    #[must_use]
    pub const fn new(start: VirtualAddress, size: u32) -> Self {
        Self { start, size }
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self::new(VirtualAddress::new(KERNEL_VIRT_OFFSET), 0)
    }

    /// Number of pages the section touches when it starts page aligned.
    #[must_use]
    pub const fn pages(&self) -> u32 {
        self.size.div_ceil(PAGE_SIZE)
    }

    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.start.as_u32() + self.size)
    }

    /// End of the last page the section touches.
    #[must_use]
    pub const fn page_end(&self) -> VirtualAddress {
        VirtualAddress::new(self.start.as_u32() + self.pages() * PAGE_SIZE)
    }
}

/// Where the kernel image lives and how its sections are laid out.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelImage {
    pub phys_start: PhysicalAddress,
    pub virt_start: VirtualAddress,
    /// Image size in bytes, up to the end of `.bss`.
    pub size: u32,
    pub text: SectionRange,
    pub init_text: SectionRange,
    /// Code and data only needed during boot.
    pub init: SectionRange,
}

impl KernelImage {
    /// An image with no named sections, `frames` pages large.
    #[must_use]
    pub const fn with_frames(
        phys_start: PhysicalAddress,
        virt_start: VirtualAddress,
        frames: u32,
    ) -> Self {
        Self {
            phys_start,
            virt_start,
            size: frames * PAGE_SIZE,
            text: SectionRange::empty(),
            init_text: SectionRange::empty(),
            init: SectionRange::empty(),
        }
    }

    /// Frames covered by the image.
    #[must_use]
    pub const fn frames(&self) -> u32 {
        self.size.div_ceil(PAGE_SIZE)
    }

    /// First virtual address past the image.
    #[must_use]
    pub const fn virt_end(&self) -> VirtualAddress {
        VirtualAddress::new(self.virt_start.as_u32() + self.size)
    }

    /// Physical address backing a virtual address inside the image.
    #[must_use]
    pub const fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        PhysicalAddress::new(va.as_u32() - self.virt_start.as_u32() + self.phys_start.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_counts_from_kib() {
        let mem = BootMemoryInfo::new(640, 64512);
        assert_eq!(mem.lower_frames(), 160);
        assert_eq!(mem.upper_frames(), 16128);
        assert_eq!(mem.total_frames(), 16288);
    }

    #[test]
    fn multiboot_without_memory_flag_is_rejected() {
        let mut info = MultibootInfo {
            flags: 0,
            mem_lower: 640,
            mem_upper: 1024,
            boot_device: 0,
            cmdline: 0,
        };
        assert_eq!(BootMemoryInfo::from_multiboot(&info), None);
        info.flags = MULTIBOOT_INFO_MEMORY;
        assert_eq!(
            BootMemoryInfo::from_multiboot(&info),
            Some(BootMemoryInfo::new(640, 1024))
        );
    }

    #[test]
    fn image_geometry() {
        let mut image = KernelImage::with_frames(
            PhysicalAddress::new(0x10_0000),
            VirtualAddress::new(0xC010_0000),
            3,
        );
        assert_eq!(image.frames(), 3);
        image.size = 3 * PAGE_SIZE + 1;
        assert_eq!(image.frames(), 4);
        assert_eq!(
            image.virt_to_phys(VirtualAddress::new(0xC010_2000)),
            PhysicalAddress::new(0x10_2000)
        );
        assert_eq!(SectionRange::new(VirtualAddress::new(0xC010_0000), 4097).pages(), 2);
    }
}
