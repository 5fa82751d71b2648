//! # Physical Mappers for the Kernel
//!
//! The paging code never dereferences a physical address directly; it asks a
//! [`PhysMapper`] for a view of the directory, a table or a page. The kernel
//! needs two such views over its lifetime.
//!
//! ## Before paging: [`EarlyPhysMapper`]
//! - The kernel is linked at `0xC000_0000 + phys` but paging is still off.
//! - The boot code loads segments with base `0x4000_0000`, so a high-half
//!   address wraps around to its physical counterpart:
//!   `0xC010_0000 + 0x4000_0000 = 0x0010_0000 (mod 2^32)`.
//! - Physical memory is therefore reachable at `phys + KERNEL_VIRT_OFFSET`.
//!
//! ## After paging: [`RecursivePhysMapper`]
//! - Only the active address space is reachable, through the recursive slot.
//! - The directory appears at `0xFFFF_F000`, the table of slot `n` at
//!   `0xFFC0_0000 + n * 4096`.
//! - Pages are reached at their virtual address, so they must be mapped
//!   before their bytes are touched.
//!
//! ## See also
//! - [`PhysMapper`] trait in `kernel-vmem`
//! - [`bootstrap`](crate::bootstrap), which switches from one to the other

use kernel_info::memory::phys_to_virt;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};
use kernel_vmem::{
    DirectoryIndex, PageBytes, PageDirectory, PageTable, PhysMapper, invalidate_tlb_page,
};

/// [`PhysMapper`] for the window between kernel entry and enabling paging.
///
/// # Safety
/// - Only valid while paging is off and the boot segments (base
///   `0x4000_0000`) are loaded.
/// - Any frame can be reached; callers must only touch frames they own.
#[derive(Debug, Default, Copy, Clone)]
pub struct EarlyPhysMapper;

impl EarlyPhysMapper {
    #[inline]
    fn ptr<T>(frame: PhysicalPage) -> *mut T {
        VirtualAddress::new(phys_to_virt(frame.base().as_u32())).as_mut_ptr()
    }
}

impl PhysMapper for EarlyPhysMapper {
    unsafe fn directory_mut<'a>(&self, root: PhysicalPage) -> &'a mut PageDirectory {
        // SAFETY: Caller guarantees that the boot segments are loaded.
        unsafe { &mut *Self::ptr(root) }
    }

    unsafe fn table_mut<'a>(&self, _slot: DirectoryIndex, table: PhysicalPage) -> &'a mut PageTable {
        // SAFETY: See above.
        unsafe { &mut *Self::ptr(table) }
    }

    unsafe fn page_mut<'a>(&self, _page: VirtualPage, frame: PhysicalPage) -> &'a mut PageBytes {
        // SAFETY: See above.
        unsafe { &mut *Self::ptr(frame) }
    }
}

/// [`PhysMapper`] for the active address space once paging is enabled.
///
/// The `root` passed to [`PhysMapper::directory_mut`] is ignored; the
/// recursive window always shows whatever directory CR3 points at.
///
/// # Safety
/// - Paging must be on with a directory whose slot 1023 points at itself.
/// - Only the active address space may be edited through this mapper.
#[derive(Debug, Default, Copy, Clone)]
pub struct RecursivePhysMapper;

impl PhysMapper for RecursivePhysMapper {
    unsafe fn directory_mut<'a>(&self, _root: PhysicalPage) -> &'a mut PageDirectory {
        let va = DirectoryIndex::directory_window().base();
        // SAFETY: The recursive slot maps the active directory here.
        unsafe { &mut *va.as_mut_ptr() }
    }

    unsafe fn table_mut<'a>(&self, slot: DirectoryIndex, _table: PhysicalPage) -> &'a mut PageTable {
        let va = slot.table_window().base();
        // SAFETY: The recursive slot maps the table linked at `slot` here.
        unsafe { &mut *va.as_mut_ptr() }
    }

    unsafe fn page_mut<'a>(&self, page: VirtualPage, _frame: PhysicalPage) -> &'a mut PageBytes {
        // SAFETY: Caller guarantees `page` is mapped to the frame.
        unsafe { &mut *page.base().as_mut_ptr() }
    }

    #[inline]
    fn invalidate_page(&self, page: VirtualPage) {
        // SAFETY: The mapper is only used at CPL0.
        unsafe { invalidate_tlb_page(page) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn early_view_is_offset_by_the_kernel_base() {
        let frame = PhysicalPage::new_aligned(PhysicalAddress::new(0x0010_3000));
        let ptr = EarlyPhysMapper::ptr::<u8>(frame);
        assert_eq!(ptr.addr(), 0xC010_3000);
    }
}
