use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// A single 32-bit paging entry in its raw bitfield form (non-PAE).
///
/// Directory entries (PDE) and table entries (PTE) share this layout; the
/// typed wrappers [`PdEntry`](crate::page_table::pd::PdEntry) and
/// [`PtEntry`](crate::page_table::pt::PtEntry) decide which bits matter.
///
/// ### Bit layout
///
/// | Bits   | Name            | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `P` (present)   | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (PTE only) |
/// | 7      | `PS` / `PAT`    | 4 MiB page in a PDE, PAT in a PTE |
/// | 8      | `G`             | Global (PTE only) |
/// | 9–11   | OS available    | Ignored by hardware |
/// | 12–31  | `addr`          | Physical frame bits [31:12] |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let mut e = PageEntryBits::kernel_rw();
/// e.set_physical_address(PhysicalAddress::new(0x0012_3000));
/// assert!(e.present() && e.writable());
/// assert_eq!(e.into_bits(), 0x0012_3003);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    ///
    /// Clear means any access through this entry faults.
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Supervisor writes ignore this bit unless CR0.WP is set.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5), set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6), set by the CPU on the first write through a PTE.
    pub dirty: bool,

    /// Page Size in a PDE (4 MiB page, unused here), PAT in a PTE.
    pub large_page: bool,

    /// Global (G, bit 8).
    ///
    /// Survives CR3 reloads when CR4.PGE is enabled.
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Physical address bits [31:12].
    #[bits(20)]
    phys_addr_bits_31_12: u32,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_phys_addr_bits_31_12(phys.as_u32() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_31_12() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage {
        PhysicalPage::new_aligned(self.physical_address())
    }

    /// The same permission and caching bits without a frame address.
    #[inline]
    #[must_use]
    pub const fn flags_only(self) -> Self {
        self.with_phys_addr_bits_31_12(0)
    }

    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    #[inline]
    #[must_use]
    pub const fn kernel_ro() -> Self {
        Self::new().with_present(true)
    }

    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::kernel_rw().with_user_access(true)
    }

    #[inline]
    #[must_use]
    pub const fn user_ro() -> Self {
        Self::kernel_ro().with_user_access(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_bits_do_not_touch_flags() {
        let mut e = PageEntryBits::user_ro().with_global_translation(true);
        e.set_physical_address(PhysicalAddress::new(0xFFFF_F000));
        assert_eq!(e.into_bits(), 0xFFFF_F105);
        assert_eq!(e.physical_address(), PhysicalAddress::new(0xFFFF_F000));
        assert_eq!(e.flags_only().into_bits(), 0x105);
    }

    #[test]
    fn presets() {
        assert_eq!(PageEntryBits::kernel_rw().into_bits(), 0b011);
        assert_eq!(PageEntryBits::kernel_ro().into_bits(), 0b001);
        assert_eq!(PageEntryBits::user_rw().into_bits(), 0b111);
    }
}
