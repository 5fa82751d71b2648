use crate::{MemoryAddressOffset, MemoryPage, PhysicalAddress};
use core::fmt;

/// Physical frame base.
///
/// A `PhysicalPage` represents the **page-aligned base** of a 4 KiB physical
/// frame. It is a thin wrapper over [`MemoryPage`] with physical-address intent.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(pub(crate) MemoryPage);

impl PhysicalPage {
    /// Frame that contains `p` (aligns down).
    #[inline]
    #[must_use]
    pub const fn from_addr(p: PhysicalAddress) -> Self {
        Self(MemoryPage::from_addr(p.0))
    }

    /// Frame starting at `p`, which must be aligned (checked in debug builds).
    #[inline]
    #[must_use]
    pub const fn new_aligned(p: PhysicalAddress) -> Self {
        Self(MemoryPage::new_aligned(p.0))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0.base())
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: MemoryAddressOffset) -> PhysicalAddress {
        PhysicalAddress(self.0.join(off))
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

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(0x{:08X})", self.base().as_u32())
    }
}

impl From<MemoryPage> for PhysicalPage {
    #[inline]
    fn from(p: MemoryPage) -> Self {
        Self(p)
    }
}
