//! CPU side of the paging bootstrap.

use crate::gdt;
use kernel_alloc::bootstrap::PagingControl;
use kernel_registers::cr0::Cr0;
use kernel_registers::cr3::Cr3;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_vmem::RootPage;

/// Drives CR0/CR3 and the GDT for [`kernel_alloc::global::init_paging`].
pub struct CpuPaging;

impl PagingControl for CpuPaging {
    unsafe fn enable_paging(&mut self, root: RootPage) {
        unsafe {
            Cr3::from_directory_phys(root.base()).store_unsafe();
            // WP makes read-only kernel pages binding at CPL0 as well.
            Cr0::load_unsafe()
                .with_pg_paging(true)
                .with_wp_write_protect(true)
                .store_unsafe();
        }
    }

    unsafe fn flatten_segments(&mut self) {
        unsafe { gdt::load_kernel_gdt() }
    }
}
