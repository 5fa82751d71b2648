//! # Virtual Memory Support
//!
//! Two-level IA-32 paging (no PAE) for a higher-half kernel.
//!
//! ## What you get
//! - An [`address space`](address_space) handle rooted at a page directory.
//! - A 4 KiB-aligned [`PageDirectory`] and [`PageTable`] with typed indices.
//! - The shared entry layout [`PageEntryBits`].
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//! - The decoded [`PageFaultError`] code.
//!
//! ## IA-32 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |   PD  |   PT  | Offset |
//! ```
//!
//! The directory and each table hold 1024 entries of 4 bytes. A present PDE
//! links a page table; a present PTE maps one 4 KiB frame.
//!
//! ## Recursive self-map
//!
//! Directory slot 1023 points at the directory itself. Once paging is on,
//! this makes every page table of the active space visible at
//! `0xFFC0_0000 + slot * 4096` and the directory at `0xFFFF_F000`, so the
//! kernel never needs a direct map of physical memory. The window is owned by
//! the paging code: [`AddressSpace::map_page`] refuses addresses inside it.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod page_entry_bits;
mod page_fault;
pub mod page_table;

pub use crate::address_space::{AddressSpace, RootPage, Walk};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_fault::PageFaultError;
pub use crate::page_table::pd::{DirectoryIndex, PageDirectory, PdEntry};
pub use crate::page_table::pt::{PageTable, PtEntry, TableIndex};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage, VirtualAddress, VirtualPage};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Bytes of one page, as seen through [`PhysMapper::page_mut`].
pub type PageBytes = [u8; PAGE_SIZE as usize];

/// Errors reported by mapping operations.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmmError {
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("{0} lies in the recursive page table window")]
    ReservedWindow(VirtualAddress),
    #[error("invalid range {start}..{end}")]
    InvalidRange {
        start: VirtualAddress,
        end: VirtualAddress,
    },
}

/// Physical frame source for page tables and anonymous pages.
///
/// Frames carry a usage counter. For a page table it counts the present
/// entries; for a data frame it counts the mappings that share it.
pub trait FrameAlloc {
    /// Allocate one 4 KiB frame, `None` when memory is exhausted.
    fn alloc_frame(&mut self) -> Option<PhysicalPage>;

    /// Return a frame that is no longer referenced.
    fn free_frame(&mut self, frame: PhysicalPage);

    /// Increment the usage counter, returning the new value.
    fn inc_usage(&mut self, frame: PhysicalPage) -> u16;

    /// Decrement the usage counter, returning the new value.
    fn dec_usage(&mut self, frame: PhysicalPage) -> u16;
}

/// Makes paging structures and page contents reachable from the CPU's
/// current view of memory.
///
/// Before paging, physical memory is reached through a fixed offset; after
/// it, through the recursive window. Both views are hidden behind this trait
/// so the walking code is the same.
///
/// # Safety
/// - The returned references alias physical memory; callers must not hold two
///   references to the same frame at once.
/// - Lifetime `'a` is purely borrow-checked; the view must remain valid for
///   `'a`.
#[allow(clippy::mut_from_ref)]
pub trait PhysMapper {
    /// The directory stored in `root`.
    ///
    /// # Safety
    /// `root` must hold a page directory reachable through this mapper.
    unsafe fn directory_mut<'a>(&self, root: PhysicalPage) -> &'a mut PageDirectory;

    /// The page table stored in `table`, linked at directory `slot`.
    ///
    /// # Safety
    /// `table` must hold a page table that is reachable through this mapper.
    unsafe fn table_mut<'a>(&self, slot: DirectoryIndex, table: PhysicalPage) -> &'a mut PageTable;

    /// The bytes of `frame`, which is (or is about to be) mapped at `page`.
    ///
    /// # Safety
    /// `frame` must be reachable through this mapper and not referenced elsewhere.
    unsafe fn page_mut<'a>(&self, page: VirtualPage, frame: PhysicalPage) -> &'a mut PageBytes;

    /// Drop any cached translation for `page`.
    #[inline]
    fn invalidate_page(&self, _page: VirtualPage) {}

    /// Drop any cached translation for the window of the table at `slot`.
    #[inline]
    fn invalidate_table(&self, slot: DirectoryIndex) {
        self.invalidate_page(slot.table_window());
    }
}

/// Invalidate the TLB entry for `page` (`invlpg`).
///
/// # Safety
/// Must run at CPL0.
#[inline(always)]
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub unsafe fn invalidate_tlb_page(page: VirtualPage) {
    let va = page.base().as_u32();
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va, options(nostack, preserves_flags));
    }
}

/// Hosted builds have no TLB to maintain.
///
/// # Safety
/// Always safe to call; the signature matches the bare-metal variant.
#[inline(always)]
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub const unsafe fn invalidate_tlb_page(_page: VirtualPage) {}
