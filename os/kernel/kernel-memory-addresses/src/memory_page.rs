use crate::{MemoryAddress, MemoryAddressOffset, PAGE_SIZE};
use core::fmt;

/// A page base address (lower 12 bits are zero).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryPage(u32);

impl MemoryPage {
    /// Create from a raw value, aligning down to the page boundary.
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: MemoryAddress) -> Self {
        Self(addr.as_u32() & !(PAGE_SIZE - 1))
    }

    /// Create from a raw value that must already be aligned.
    /// Panics in debug if unaligned (no runtime cost in release).
    #[inline]
    #[must_use]
    pub const fn new_aligned(addr: MemoryAddress) -> Self {
        debug_assert!(addr.is_page_aligned(), "unaligned page address");
        Self(addr.as_u32())
    }

    /// Return the base as `MemoryAddress`.
    #[inline]
    #[must_use]
    pub const fn base(self) -> MemoryAddress {
        MemoryAddress::new(self.0)
    }

    /// Combine with an offset to form a full address.
    #[inline]
    #[must_use]
    pub const fn join(self, off: MemoryAddressOffset) -> MemoryAddress {
        MemoryAddress::new(self.0 | off.as_u32())
    }

    /// The page `n` pages above this one, `None` past the 4 GiB boundary.
    #[inline]
    #[must_use]
    pub const fn checked_add_pages(self, n: u32) -> Option<Self> {
        let Some(bytes) = n.checked_mul(PAGE_SIZE) else {
            return None;
        };
        match self.0.checked_add(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Display for MemoryPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}/4K", self.0)
    }
}

impl fmt::Debug for MemoryPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryPage(0x{:08X})", self.0)
    }
}
