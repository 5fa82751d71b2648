//! # Memory Page Table

pub mod pd;
pub mod pt;

use crate::page_table::pd::DirectoryIndex;
use crate::page_table::pt::TableIndex;
use kernel_memory_addresses::{VirtualAddress, VirtualPage};

#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirectoryIndex, TableIndex) {
    (DirectoryIndex::from(va), TableIndex::from(va))
}

/// The page selected by a directory slot and a table slot.
#[inline]
#[must_use]
pub const fn join_indices(di: DirectoryIndex, ti: TableIndex) -> VirtualPage {
    VirtualPage::new_aligned(VirtualAddress::new(
        (di.as_u32() << 22) | (ti.as_u32() << 12),
    ))
}
