//! # IA-32 Page Directory (PD)
//!
//! - [`DirectoryIndex`]: index type for VA bits `[31:22]`.
//! - [`PdEntry`]: a directory entry (PDE) pointing at a [`PageTable`](super::pt::PageTable).
//! - [`PageDirectory`]: the 4 KiB-aligned root, 1024 PDEs.
//!
//! Each directory slot covers 4 MiB of virtual address space. 4 MiB pages
//! (`PS=1`) are never created; every present PDE links a page table.
//!
//! The last slot, [`DirectoryIndex::RECURSIVE`], points back at the directory
//! itself. Through it, table `n` is visible at `0xFFC0_0000 + n * 4096` and
//! the directory at `0xFFFF_F000`.

use crate::PageEntryBits;
use kernel_info::memory::{PAGE_ENTRIES, PDE_WINDOW, PTE_WINDOW, RECURSIVE_SLOT};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, VirtualAddress, VirtualPage};

/// Index into the Page Directory (derived from VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

/// A single Page Directory entry (PDE).
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PdEntry(PageEntryBits);

/// The Page Directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; PAGE_ENTRIES],
}

const _: () = assert!(size_of::<PageDirectory>() == 4096);

impl DirectoryIndex {
    /// The self-referencing slot.
    #[allow(clippy::cast_possible_truncation)]
    pub const RECURSIVE: Self = Self(RECURSIVE_SLOT as u16);

    /// Extract bits `[31:22]` of `va`.
    #[inline]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self((va.as_u32() >> 22) as u16)
    }

    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < PAGE_ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    #[must_use]
    pub const fn is_recursive(self) -> bool {
        self.0 == Self::RECURSIVE.0
    }

    /// First virtual address covered by this slot.
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.as_u32() << 22)
    }

    /// Where the page table linked at this slot appears through the recursive slot.
    #[inline]
    #[must_use]
    pub const fn table_window(self) -> VirtualPage {
        VirtualPage::new_aligned(VirtualAddress::new(PTE_WINDOW + self.as_u32() * PAGE_SIZE))
    }

    /// Where the active directory appears through the recursive slot.
    #[inline]
    #[must_use]
    pub const fn directory_window() -> VirtualPage {
        VirtualPage::new_aligned(VirtualAddress::new(PDE_WINDOW))
    }
}

impl PdEntry {
    /// Create a zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// If present, the frame holding the linked page table.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<PhysicalPage> {
        if !self.is_present() {
            return None;
        }
        debug_assert!(!self.0.large_page(), "4 MiB pages are not used");
        Some(self.0.physical_page())
    }

    /// Link `table` with `flags`; forces `PS=0` and `present=1`.
    #[inline]
    #[must_use]
    pub const fn make_next(table: PhysicalPage, flags: PageEntryBits) -> Self {
        let mut bits = flags.with_large_page(false).with_present(true);
        bits.set_physical_address(table.base());
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    /// No validation is performed.
    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

impl PageDirectory {
    /// Create a fully zeroed Page Directory (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); PAGE_ENTRIES],
        }
    }

    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> PdEntry {
        self.entries[i.as_usize()]
    }

    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> DirectoryIndex {
        DirectoryIndex::from(va)
    }
}
