//! Minimal Virtual Memory Manager (VMM) for the kernel.
//!
//! Pairs an [`AddressSpace`] with a [`FrameAlloc`] and builds the page and
//! range operations on top of single-page mapping:
//!
//! - **Anonymous pages** ([`Vmm::alloc_page`], [`Vmm::map_range`]) get a fresh
//!   zeroed frame whose usage counter tracks how many mappings share it.
//! - **Direct mappings** ([`Vmm::map_direct`]) point at caller-owned frames,
//!   such as device memory; the frames are never freed here.
//!
//! Range operations are all-or-nothing: a failure part way through undoes
//! the pages already mapped before the error is returned.
//!
//! # Example
//! ```ignore
//! use kernel_alloc::{phys_mapper::RecursivePhysMapper, vmm::Vmm};
//! let aspace = AddressSpace::from_root(&RecursivePhysMapper, root);
//! let mut vmm = Vmm::new(aspace, &mut frames);
//! vmm.map_range(start, end, PageEntryBits::kernel_rw())?;
//! ```

use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage,
};
use kernel_vmem::{AddressSpace, FrameAlloc, PageEntryBits, PhysMapper, VmmError};
use log::{info, warn};

/// Minimal kernel virtual memory manager.
pub struct Vmm<'m, M: PhysMapper, A: FrameAlloc> {
    aspace: AddressSpace<'m, M>,
    alloc: &'m mut A,
}

impl<'m, M: PhysMapper, A: FrameAlloc> Vmm<'m, M, A> {
    pub const fn new(aspace: AddressSpace<'m, M>, alloc: &'m mut A) -> Self {
        Self { aspace, alloc }
    }

    /// # Safety
    /// - Must run at CPL0 with paging enabled.
    /// - Assumes CR3 points at a valid page directory.
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    pub unsafe fn from_current(mapper: &'m M, alloc: &'m mut A) -> Self {
        let aspace = unsafe { AddressSpace::from_current(mapper) };
        Self { aspace, alloc }
    }

    #[must_use]
    pub const fn address_space(&self) -> &AddressSpace<'m, M> {
        &self.aspace
    }

    /// Translate VA→PA if mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.aspace.query(va)
    }

    /// Map `page → frame` without touching the frame's usage counter.
    ///
    /// # Errors
    /// See [`AddressSpace::map_page`].
    pub fn map_page(
        &mut self,
        page: VirtualPage,
        frame: PhysicalPage,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        self.aspace.map_page(self.alloc, page, frame, flags)
    }

    /// Unmap `page`, returning the frame it pointed at.
    pub fn unmap_page(&mut self, page: VirtualPage) -> PhysicalPage {
        self.aspace.unmap_page(self.alloc, page)
    }

    /// Back `page` with a fresh, zeroed frame.
    ///
    /// # Errors
    /// - [`VmmError::OutOfMemory`] if no frame is left for the page or its table.
    /// - [`VmmError::ReservedWindow`] if `page` lies in the recursive window.
    ///
    /// The frame is returned to the allocator on failure. Read-only pages are
    /// zeroed through a writable entry that is write-protected afterwards.
    pub fn alloc_page(
        &mut self,
        page: VirtualPage,
        flags: PageEntryBits,
    ) -> Result<PhysicalPage, VmmError> {
        let Some(frame) = self.alloc.alloc_frame() else {
            return Err(VmmError::OutOfMemory);
        };
        let writable = flags.with_writable(true);
        if let Err(e) = self.aspace.map_page(self.alloc, page, frame, writable) {
            self.alloc.free_frame(frame);
            return Err(e);
        }
        self.alloc.inc_usage(frame);

        // SAFETY: `page` was just mapped to `frame`, which nobody else references.
        let bytes = unsafe { self.aspace.mapper().page_mut(page, frame) };
        bytes.fill(0);
        if !flags.writable() {
            // CR0.WP makes ring 0 fault on read-only pages too.
            self.aspace.set_writable(page, false);
        }
        Ok(frame)
    }

    /// Unmap an anonymous page; its frame is freed once no mapping uses it.
    pub fn free_page(&mut self, page: VirtualPage) {
        let frame = self.aspace.unmap_page(self.alloc, page);
        if self.alloc.dec_usage(frame) == 0 {
            self.alloc.free_frame(frame);
        }
    }

    /// [`alloc_page`](Self::alloc_page) every page in `[start, end)`.
    ///
    /// # Errors
    /// - [`VmmError::InvalidRange`] if `start > end`.
    /// - Any error of [`alloc_page`](Self::alloc_page); pages mapped so far
    ///   are released again.
    pub fn map_range(
        &mut self,
        start: VirtualAddress,
        end: VirtualAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        check_range(start, end)?;
        for page in pages(start, end) {
            if let Err(e) = self.alloc_page(page, flags) {
                warn!("map_range {start}..{end}: {e} at {}, rolling back", page.base());
                self.unmap_range(start, page.base())?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// [`free_page`](Self::free_page) every page in `[start, end)`.
    ///
    /// # Errors
    /// [`VmmError::InvalidRange`] if `start > end`.
    pub fn unmap_range(&mut self, start: VirtualAddress, end: VirtualAddress) -> Result<(), VmmError> {
        check_range(start, end)?;
        for page in pages(start, end) {
            self.free_page(page);
        }
        Ok(())
    }

    /// Map `[start, end)` onto the frames starting at `phys_start`.
    ///
    /// The frames stay owned by the caller; no usage counters change.
    ///
    /// # Errors
    /// - [`VmmError::InvalidRange`] if `start > end`.
    /// - Any error of [`map_page`](Self::map_page); pages mapped so far are
    ///   unmapped again.
    pub fn map_direct(
        &mut self,
        start: VirtualAddress,
        end: VirtualAddress,
        phys_start: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        check_range(start, end)?;
        debug_assert!(phys_start.is_page_aligned(), "unaligned {phys_start}");
        for page in pages(start, end) {
            let frame = (phys_start + (page.base().as_u32() - start.as_u32())).page();
            if let Err(e) = self.aspace.map_page(self.alloc, page, frame, flags) {
                warn!("map_direct {start}..{end}: {e} at {}, rolling back", page.base());
                self.unmap_direct(start, page.base())?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Undo [`map_direct`](Self::map_direct); the frames are left alone.
    ///
    /// # Errors
    /// [`VmmError::InvalidRange`] if `start > end`.
    pub fn unmap_direct(&mut self, start: VirtualAddress, end: VirtualAddress) -> Result<(), VmmError> {
        check_range(start, end)?;
        for page in pages(start, end) {
            self.aspace.unmap_page(self.alloc, page);
        }
        Ok(())
    }

    /// Unmap part of the kernel image and hand its frames back to the
    /// allocator. Returns the number of frames released.
    ///
    /// # Errors
    /// [`VmmError::InvalidRange`] if `start > end`.
    pub fn release_kernel_range(
        &mut self,
        start: VirtualAddress,
        end: VirtualAddress,
    ) -> Result<usize, VmmError> {
        check_range(start, end)?;
        let mut released = 0;
        for page in pages(start, end) {
            let frame = self.aspace.unmap_page(self.alloc, page);
            self.alloc.free_frame(frame);
            released += 1;
        }
        info!(
            "released {start}..{end} ({} KiB)",
            released * PAGE_SIZE as usize / 1024
        );
        Ok(released)
    }
}

fn check_range(start: VirtualAddress, end: VirtualAddress) -> Result<(), VmmError> {
    debug_assert!(
        start.is_page_aligned() && end.is_page_aligned(),
        "unaligned range {start}..{end}"
    );
    if start > end {
        return Err(VmmError::InvalidRange { start, end });
    }
    Ok(())
}

fn pages(start: VirtualAddress, end: VirtualAddress) -> impl Iterator<Item = VirtualPage> {
    (start.as_u32()..end.as_u32())
        .step_by(PAGE_SIZE as usize)
        .map(|va| VirtualPage::new_aligned(VirtualAddress::new(va)))
}
