//! # Global Descriptor Table (GDT)
//!
//! The kernel runs with two tables of identical layout:
//!
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code (32-bit, DPL=0; [`KERNEL_CS`])
//! 2     | 0x10     | Kernel data (DPL=0; [`KERNEL_DS`])
//!
//! - [`BOOT_GDT`] gives both segments the base [`BOOT_SEGMENT_BASE`]. Loaded by
//!   the entry stub while paging is off, it lets the high-half kernel run at
//!   `phys + 0xC000_0000`: the addition wraps around to the physical address.
//! - [`KERNEL_GDT`] is flat (base 0). Loaded right after paging is enabled,
//!   from then on linear addresses equal virtual addresses.
//!
//! Both tables cover the full 4 GiB with page granularity.

use bitfield_struct::bitfield;
use kernel_info::memory::BOOT_SEGMENT_BASE;

pub const KERNEL_CS: u16 = 0x08;
pub const KERNEL_DS: u16 = 0x10;

/// Bit layout of a 32-bit code or data segment descriptor.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub limit_lo: u16, // [15:0]
    pub base_lo: u16,  // [31:16]
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40]
    pub s: bool,       // [44] = 1 (code/data)
    #[bits(2)]
    pub dpl: u8, // [46:45]
    pub p: bool,       // [47]
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,     // [52]
    pub l: bool,       // [53] = 0 outside long mode
    pub db: bool,      // [54] = 1 (32-bit)
    pub g: bool,       // [55] = 1 (4 KiB granularity)
    pub base_hi: u8,   // [63:56]
}

impl SegmentDescriptor {
    /// Execute + read.
    const CODE: u8 = 0b1010;
    /// Read + write.
    const DATA: u8 = 0b0010;

    #[allow(clippy::cast_possible_truncation)]
    const fn ring0(typ: u8, base: u32) -> Self {
        Self::new()
            .with_limit_lo(0xFFFF)
            .with_limit_hi(0xF)
            .with_base_lo(base as u16)
            .with_base_mid((base >> 16) as u8)
            .with_base_hi((base >> 24) as u8)
            .with_typ(typ)
            .with_s(true)
            .with_dpl(0)
            .with_p(true)
            .with_db(true)
            .with_g(true)
    }

    #[must_use]
    pub const fn code(base: u32) -> Self {
        Self::ring0(Self::CODE, base)
    }

    #[must_use]
    pub const fn data(base: u32) -> Self {
        Self::ring0(Self::DATA, base)
    }

    #[must_use]
    pub const fn base(self) -> u32 {
        self.base_lo() as u32 | (self.base_mid() as u32) << 16 | (self.base_hi() as u32) << 24
    }
}

#[repr(C, align(8))]
pub struct Gdt {
    null: SegmentDescriptor, // 0
    code: SegmentDescriptor, // 1
    data: SegmentDescriptor, // 2
}

impl Gdt {
    #[must_use]
    pub const fn with_base(base: u32) -> Self {
        Self {
            null: SegmentDescriptor::new(),
            code: SegmentDescriptor::code(base),
            data: SegmentDescriptor::data(base),
        }
    }
}

/// Pointer format required by `lgdt`.
#[repr(C, packed)]
pub struct DescTablePtr {
    /// Size of the table **minus one** in bytes.
    pub limit: u16,
    /// Linear address of the table.
    pub base: u32,
}

#[allow(clippy::cast_possible_truncation)]
pub const GDT_LIMIT: u16 = (size_of::<Gdt>() - 1) as u16;

/// Loaded by the entry stub; only needed until paging is on.
#[unsafe(link_section = ".init.data")]
pub static BOOT_GDT: Gdt = Gdt::with_base(BOOT_SEGMENT_BASE);

/// `lgdt` operand for [`BOOT_GDT`]. The entry stub stores the physical base.
#[unsafe(link_section = ".init.data")]
pub static mut BOOT_GDTR: DescTablePtr = DescTablePtr {
    limit: GDT_LIMIT,
    base: 0,
};

pub static KERNEL_GDT: Gdt = Gdt::with_base(0);

/// Load [`KERNEL_GDT`] and reload every segment register with it.
///
/// # Safety
/// - Paging must map the kernel at its link address.
/// - The running code, its stack and the table itself must also be reachable
///   through the current segments (the slot 0 alias during boot).
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub unsafe fn load_kernel_gdt() {
    use kernel_memory_addresses::VirtualAddress;

    let ptr = DescTablePtr {
        limit: GDT_LIMIT,
        base: VirtualAddress::from_ptr(&raw const KERNEL_GDT).as_u32(),
    };

    unsafe {
        core::arch::asm!(
            "lgdt [{ptr}]",
            "mov ds, {ds:x}",
            "mov es, {ds:x}",
            "mov fs, {ds:x}",
            "mov gs, {ds:x}",
            "mov ss, {ds:x}",
            // Far return to reload CS.
            "push {cs}",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            ptr = in(reg) &raw const ptr,
            ds = in(reg) u32::from(KERNEL_DS),
            cs = const KERNEL_CS,
            tmp = out(reg) _,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_descriptors() {
        let gdt = Gdt::with_base(0);
        assert_eq!(gdt.null.into_bits(), 0);
        assert_eq!(gdt.code.into_bits(), 0x00CF_9A00_0000_FFFF);
        assert_eq!(gdt.data.into_bits(), 0x00CF_9200_0000_FFFF);
    }

    #[test]
    fn boot_descriptors_carry_the_segment_base() {
        let gdt = Gdt::with_base(BOOT_SEGMENT_BASE);
        assert_eq!(gdt.code.into_bits(), 0x40CF_9A00_0000_FFFF);
        assert_eq!(gdt.data.base(), 0x4000_0000);
        assert_eq!(SegmentDescriptor::data(0x1234_5678).base(), 0x1234_5678);
    }

    #[test]
    fn layout() {
        assert_eq!(size_of::<Gdt>(), 24);
        assert_eq!(GDT_LIMIT, 23);
        assert_eq!(size_of::<DescTablePtr>(), 6);
    }
}
