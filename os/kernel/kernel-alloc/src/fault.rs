//! Page-fault reporting.
//!
//! There is no demand paging: every fault is fatal. The report names the
//! decoded error code and the directory and table entries for the faulting
//! address, then hands over to the panic handler.

use crate::global;
use crate::phys_mapper::RecursivePhysMapper;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{AddressSpace, PageFaultError, PhysMapper};
use log::error;

/// Entry point for the `#PF` vector.
///
/// `addr` is the value of CR2, `code` the error code pushed by the CPU.
pub fn page_fault(addr: VirtualAddress, code: PageFaultError) -> ! {
    let root = global::try_current_root();
    let aspace = root.map(|root| AddressSpace::from_root(&RecursivePhysMapper, root));
    report_fault(aspace.as_ref(), addr, code)
}

/// Log a fault against `aspace` (if paging is on) and panic.
pub fn report_fault<M: PhysMapper>(
    aspace: Option<&AddressSpace<'_, M>>,
    addr: VirtualAddress,
    code: PageFaultError,
) -> ! {
    error!("page fault at {addr}: {}", code.explain());
    error!(
        "error code {:#x}: present={} write={} user={} reserved={} fetch={}",
        code.into_bits(),
        code.present(),
        code.write(),
        code.user(),
        code.reserved_bit(),
        code.instruction_fetch()
    );
    if let Some(aspace) = aspace {
        error!("walk {}", aspace.walk(addr));
    } else {
        error!("no address space active");
    }
    panic!("page fault at {addr}: {}", code.explain());
}
