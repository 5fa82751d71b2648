//! # IA-32 Page Table (PT)
//!
//! - [`TableIndex`]: index type for VA bits `[21:12]`.
//! - [`PtEntry`]: a page table entry (PTE) mapping one 4 KiB page.
//! - [`PageTable`]: a 4 KiB-aligned array of 1024 PTEs.
//!
//! ## Invariants & Notes
//!
//! - [`PtEntry::make_4k`] forces `PAT=0` and `present=1`.
//! - After modifying active mappings, the caller must perform any required TLB maintenance.

use crate::PageEntryBits;
use kernel_info::memory::PAGE_ENTRIES;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};

/// Index into a Page Table (derived from VA bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

/// A single Page Table entry (PTE).
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PtEntry(PageEntryBits);

/// The Page Table: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PtEntry; PAGE_ENTRIES],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl TableIndex {
    /// Extract bits `[21:12]` of `va`.
    #[inline]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(((va.as_u32() >> 12) & 0x3FF) as u16)
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
}

impl PtEntry {
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

    /// Expose the underlying bitfield.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// If present, return the mapped physical page and its flags.
    #[inline]
    #[must_use]
    pub const fn page_4k(self) -> Option<(PhysicalPage, PageEntryBits)> {
        if !self.is_present() {
            return None;
        }
        Some((self.0.physical_page(), self.0.flags_only()))
    }

    /// Create a present 4 KiB leaf for `page`.
    #[inline]
    #[must_use]
    pub const fn make_4k(page: PhysicalPage, flags: PageEntryBits) -> Self {
        let mut bits = flags.with_large_page(false).with_present(true);
        bits.set_physical_address(page.base());
        Self(bits)
    }

    /// The same entry with the writable bit replaced.
    #[inline]
    #[must_use]
    pub const fn with_writable(self, writable: bool) -> Self {
        Self(self.0.with_writable(writable))
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

impl PageTable {
    /// Create a fully zeroed Page Table (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PtEntry::zero(); PAGE_ENTRIES],
        }
    }

    /// Mark every entry non-present.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PtEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PtEntry {
        self.entries[i.as_usize()]
    }

    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PtEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Number of present entries.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_present()).count()
    }

    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> TableIndex {
        TableIndex::from(va)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn pte_4k_leaf() {
        let page = PhysicalPage::from_addr(PhysicalAddress::new(0x5555_0000));
        let e = PtEntry::make_4k(page, PageEntryBits::user_ro().with_large_page(true));
        let (p, fl) = e.page_4k().unwrap();
        assert_eq!(p.base().as_u32(), 0x5555_0000);
        assert!(!fl.large_page());
        assert!(fl.user_access());
        assert!(!fl.writable());
        assert!(e.with_writable(true).flags().writable());
    }

    #[test]
    fn index_from_address() {
        assert_eq!(TableIndex::from(VirtualAddress::new(0xC010_0000)).as_usize(), 256);
        assert_eq!(TableIndex::from(VirtualAddress::new(0xFFFF_FFFF)).as_usize(), 1023);
    }

    #[test]
    fn zeroed_table_has_no_entries() {
        let mut pt = PageTable::zeroed();
        assert_eq!(pt.present_count(), 0);
        pt.set(TableIndex::new(7), PtEntry::from_raw(0x1000 | 1));
        assert_eq!(pt.present_count(), 1);
        pt.zero();
        assert_eq!(pt.present_count(), 0);
    }
}
