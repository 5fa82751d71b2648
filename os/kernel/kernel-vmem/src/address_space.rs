//! # Address Space (IA-32, directory-rooted)
//!
//! A handle to one virtual address space: the frame of its page directory
//! plus the [`PhysMapper`] used to reach its tables.
//!
//! ## Highlights
//!
//! - [`AddressSpace::map_page`] installs one 4 KiB mapping, creating the page
//!   table on demand.
//! - [`AddressSpace::unmap_page`] removes it and releases the page table
//!   once its last entry is gone.
//! - [`AddressSpace::query`] translates a VA to a PA.
//! - [`AddressSpace::walk`] records the entries seen on the way, for fault
//!   reports.
//!
//! ## Page-table lifetime
//!
//! The usage counter of a page-table frame (see [`FrameAlloc::inc_usage`])
//! equals the number of present entries in it. Mapping increments it,
//! unmapping decrements it, and at zero the table frame is freed and the
//! directory slot cleared.

use crate::page_table::pd::{DirectoryIndex, PageDirectory, PdEntry};
use crate::page_table::pt::{PageTable, PtEntry, TableIndex};
use crate::page_table::split_indices;
use crate::{FrameAlloc, PageEntryBits, PhysMapper, VmmError};
use core::fmt;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use log::debug;

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: RootPage,
    mapper: &'m M,
}

/// The page-directory frame of an [`AddressSpace`].
pub type RootPage = PhysicalPage;

/// The entries visited while translating one address.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Walk {
    pub va: VirtualAddress,
    pub directory_index: DirectoryIndex,
    pub pde: PdEntry,
    /// Only present if the PDE links a table.
    pub pte: Option<(TableIndex, PtEntry)>,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// View the **currently active** address space by reading CR3.
    ///
    /// # Safety
    /// - Must run at CPL0 with paging enabled.
    /// - Assumes CR3 points at a valid page directory.
    #[inline]
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    pub unsafe fn from_current(mapper: &'m M) -> Self {
        use kernel_registers::LoadRegisterUnsafe;
        use kernel_registers::cr3::Cr3;

        let cr3 = unsafe { Cr3::load_unsafe() };
        Self::from_root(mapper, PhysicalPage::from_addr(cr3.directory_phys()))
    }

    #[inline]
    #[must_use]
    pub const fn from_root(mapper: &'m M, root: RootPage) -> Self {
        Self { root, mapper }
    }

    /// Load CR3 with this address space's root.
    ///
    /// # Safety
    /// The target space must map the running code, the stack and the
    /// recursive slot.
    #[inline]
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    pub unsafe fn activate(&self) {
        use kernel_registers::StoreRegisterUnsafe;
        use kernel_registers::cr3::Cr3;

        unsafe { Cr3::from_directory_phys(self.root.base()).store_unsafe() };
    }

    /// Physical page of the directory.
    #[inline]
    #[must_use]
    pub const fn root_page(&self) -> RootPage {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn directory_mut(&self) -> &mut PageDirectory {
        unsafe { self.mapper.directory_mut(self.root) }
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn table_mut(&self, slot: DirectoryIndex, table: PhysicalPage) -> &mut PageTable {
        unsafe { self.mapper.table_mut(slot, table) }
    }

    /// Map `page → frame` with `flags`.
    ///
    /// A missing page table is allocated from `alloc`, linked with
    /// `flags | writable | present` and zeroed.
    ///
    /// # Errors
    /// - [`VmmError::ReservedWindow`] if `page` lies in the recursive window.
    /// - [`VmmError::OutOfMemory`] if a page table is needed and none is left.
    ///
    /// # Panics
    /// If `page` is already mapped.
    pub fn map_page<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        page: VirtualPage,
        frame: PhysicalPage,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        let (di, ti) = split_indices(page.base());
        if di.is_recursive() {
            return Err(VmmError::ReservedWindow(page.base()));
        }

        let pd = self.directory_mut();
        let table = if let Some(table) = pd.get(di).next_table() {
            table
        } else {
            let Some(table) = alloc.alloc_frame() else {
                return Err(VmmError::OutOfMemory);
            };
            let link = flags.flags_only().with_writable(true);
            pd.set(di, PdEntry::make_next(table, link));
            self.mapper.invalidate_table(di);
            self.table_mut(di, table).zero();
            debug!("page table {table:?} installed for {}", di.base());
            table
        };

        let pt = self.table_mut(di, table);
        if let Some((old, _)) = pt.get(ti).page_4k() {
            panic!("map_page: {page:?} already mapped to {old:?}");
        }
        pt.set(ti, PtEntry::make_4k(frame, flags));
        self.mapper.invalidate_page(page);
        alloc.inc_usage(table);
        Ok(())
    }

    /// Unmap `page` and return the frame it mapped.
    ///
    /// The frame itself is left alone; the page table is freed if this was
    /// its last entry.
    ///
    /// # Panics
    /// If `page` has no page table or is not mapped.
    pub fn unmap_page<A: FrameAlloc>(&self, alloc: &mut A, page: VirtualPage) -> PhysicalPage {
        let (di, ti) = split_indices(page.base());
        assert!(!di.is_recursive(), "unmap_page: {page:?} is inside the recursive window");

        let pd = self.directory_mut();
        let Some(table) = pd.get(di).next_table() else {
            panic!("unmap_page: no page table for {page:?}");
        };

        let pt = self.table_mut(di, table);
        let Some((frame, _)) = pt.get(ti).page_4k() else {
            panic!("unmap_page: {page:?} is not mapped");
        };
        pt.set(ti, PtEntry::zero());
        self.mapper.invalidate_page(page);

        if alloc.dec_usage(table) == 0 {
            pd.set(di, PdEntry::zero());
            alloc.free_frame(table);
            self.mapper.invalidate_table(di);
            debug!("page table {table:?} for {} released", di.base());
        }
        frame
    }

    /// Replace the writable bit of an existing mapping.
    ///
    /// # Panics
    /// If `page` is not mapped.
    pub fn set_writable(&self, page: VirtualPage, writable: bool) {
        let (di, ti) = split_indices(page.base());
        let Some(table) = self.directory_mut().get(di).next_table() else {
            panic!("set_writable: no page table for {page:?}");
        };
        let pt = self.table_mut(di, table);
        let entry = pt.get(ti);
        assert!(entry.is_present(), "set_writable: {page:?} is not mapped");
        pt.set(ti, entry.with_writable(writable));
        self.mapper.invalidate_page(page);
    }

    /// The page-table entry for `page`, if its table exists.
    #[must_use]
    pub fn entry(&self, page: VirtualPage) -> Option<PtEntry> {
        let (di, ti) = split_indices(page.base());
        let table = self.directory_mut().get(di).next_table()?;
        Some(self.table_mut(di, table).get(ti))
    }

    /// Translate a `VirtualAddress` to `PhysicalAddress` if mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (page, offset) = va.split();
        let (base, _) = self.entry(page)?.page_4k()?;
        Some(base.join(offset))
    }

    /// Record the directory and table entries for `va`.
    #[must_use]
    pub fn walk(&self, va: VirtualAddress) -> Walk {
        let (di, ti) = split_indices(va);
        let pde = self.directory_mut().get(di);
        let pte = pde
            .next_table()
            .map(|table| (ti, self.table_mut(di, table).get(ti)));
        Walk {
            va,
            directory_index: di,
            pde,
            pte,
        }
    }
}

impl fmt::Display for Walk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: PDE[{}]={:#010x}",
            self.va,
            self.directory_index.as_usize(),
            self.pde.raw()
        )?;
        let Some((ti, pte)) = self.pte else {
            return f.write_str(" (no table)");
        };
        write!(f, " PTE[{}]={:#010x}", ti.as_usize(), pte.raw())?;
        if let Some((frame, _)) = pte.page_4k() {
            write!(f, " -> {}", frame.join(self.va.offset()))
        } else {
            f.write_str(" (not present)")
        }
    }
}
