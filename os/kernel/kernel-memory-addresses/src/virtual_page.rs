use crate::{MemoryAddressOffset, MemoryPage, VirtualAddress};
use core::fmt;

/// Virtual memory page base.
///
/// A `VirtualPage` represents the **page-aligned base** of a 4 KiB virtual
/// page. It is a thin wrapper over [`MemoryPage`] with virtual-address intent.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0xC000_1234);
/// let vp = va.page();
/// assert_eq!(vp.base().as_u32() & (PAGE_SIZE - 1), 0);
/// assert_eq!(vp.join(va.offset()), va);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(pub(crate) MemoryPage);

impl VirtualPage {
    /// Page that contains `addr` (aligns down to page boundary).
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: VirtualAddress) -> Self {
        Self(MemoryPage::from_addr(addr.0))
    }

    /// Page starting at `addr`, which must be aligned (checked in debug builds).
    #[inline]
    #[must_use]
    pub const fn new_aligned(addr: VirtualAddress) -> Self {
        Self(MemoryPage::new_aligned(addr.0))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress(self.0.base())
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: MemoryAddressOffset) -> VirtualAddress {
        VirtualAddress(self.0.join(off))
    }

    #[inline]
    #[must_use]
    pub const fn checked_add_pages(self, n: u32) -> Option<Self> {
        match self.0.checked_add_pages(n) {
            Some(p) => Some(Self(p)),
            None => None,
        }
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage(0x{:08X})", self.base().as_u32())
    }
}

impl TryFrom<VirtualAddress> for VirtualPage {
    type Error = ();

    #[inline]
    fn try_from(va: VirtualAddress) -> Result<Self, ()> {
        if va.is_page_aligned() {
            Ok(va.page())
        } else {
            Err(())
        }
    }
}
