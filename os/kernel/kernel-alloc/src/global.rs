//! Kernel-wide memory manager instances.
//!
//! The frame allocator (with the kernel image it was set up for) and the
//! active root live in statics behind [`SpinMutex::lock_irq`], so every call
//! below runs with interrupts off. Mapping calls take the root first and
//! then the allocator inside one bracket, and range operations hold it for
//! the whole range.
//!
//! Lifecycle: [`init_frames`] once, [`init_paging`] once, then any of the
//! steady-state calls. The mapping calls edit the **active** address space
//! through the recursive window.

use crate::bootstrap::{self, BootstrapError, PagingControl};
use crate::frame_alloc::{FrameAllocInitError, FrameAllocator, MemoryStats};
use crate::phys_mapper::{EarlyPhysMapper, RecursivePhysMapper};
use crate::vmm::Vmm;
use kernel_bitmap::Word;
use kernel_info::boot::{BootMemoryInfo, KernelImage};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_sync::SpinMutex;
use kernel_vmem::{AddressSpace, PageEntryBits, PhysMapper, RootPage, VmmError};

struct KernelMemory {
    frames: FrameAllocator<'static>,
    image: KernelImage,
}

/// Lock order: [`ROOT`] before [`MEMORY`].
static ROOT: SpinMutex<Option<RootPage>> = SpinMutex::new(None);
static MEMORY: SpinMutex<Option<KernelMemory>> = SpinMutex::new(None);

type KernelVmm<'m, M = RecursivePhysMapper> = Vmm<'m, M, FrameAllocator<'static>>;

/// Set up the frame allocator over `storage`.
///
/// # Errors
/// See [`FrameAllocator::init`].
///
/// # Panics
/// If called twice.
pub fn init_frames(
    memory: BootMemoryInfo,
    image: KernelImage,
    storage: &'static mut [Word],
) -> Result<MemoryStats, FrameAllocInitError> {
    let mut state = MEMORY.lock_irq();
    assert!(state.is_none(), "init_frames: frame allocator already initialized");

    let frames = FrameAllocator::init(memory, &image, storage)?;
    let stats = frames.stats();
    *state = Some(KernelMemory { frames, image });
    Ok(stats)
}

/// Build the kernel address space and enable paging.
///
/// # Errors
/// See [`bootstrap::init_paging`].
///
/// # Panics
/// If [`init_frames`] has not run or paging is already on.
///
/// # Safety
/// See [`bootstrap::init_paging`].
pub unsafe fn init_paging<C: PagingControl>(control: &mut C) -> Result<RootPage, BootstrapError> {
    let mut current = ROOT.lock_irq();
    assert!(current.is_none(), "init_paging: paging already enabled");

    let root = MEMORY.with_lock(|state| {
        let Some(KernelMemory { frames, image }) = state.as_mut() else {
            panic!("init_paging: called before init_frames");
        };
        let kernel = frames.stats().kernel;
        unsafe {
            bootstrap::init_paging(
                &EarlyPhysMapper,
                &RecursivePhysMapper,
                frames,
                image,
                kernel,
                control,
            )
        }
    })?;
    *current = Some(root);
    Ok(root)
}

/// The kernel image registered by [`init_frames`].
#[must_use]
pub fn kernel_image() -> Option<KernelImage> {
    MEMORY.lock_irq().as_ref().map(|state| state.image)
}

fn frames_of(state: &mut Option<KernelMemory>) -> &mut FrameAllocator<'static> {
    let Some(memory) = state.as_mut() else {
        panic!("frame allocator used before init_frames");
    };
    &mut memory.frames
}

fn with_frames<R>(f: impl FnOnce(&mut FrameAllocator<'static>) -> R) -> R {
    MEMORY.with_lock_irq(|state| f(frames_of(state)))
}

fn with_vmm<R>(f: impl FnOnce(&mut KernelVmm<'_>) -> R) -> R {
    with_vmm_in(&RecursivePhysMapper, f)
}

/// Runs `f` on the active address space with [`ROOT`] and [`MEMORY`] held in
/// one bracket, so the root cannot change underneath the edit.
fn with_vmm_in<M: PhysMapper, R>(mapper: &M, f: impl FnOnce(&mut KernelVmm<'_, M>) -> R) -> R {
    let active = ROOT.lock_irq();
    let Some(root) = *active else {
        panic!("address space used before init_paging");
    };
    MEMORY.with_lock(|state| {
        let aspace = AddressSpace::from_root(mapper, root);
        f(&mut Vmm::new(aspace, frames_of(state)))
    })
}

#[must_use]
pub fn alloc_frame() -> Option<PhysicalPage> {
    with_frames(FrameAllocator::alloc_frame)
}

pub fn free_frame(frame: PhysicalPage) {
    with_frames(|alloc| alloc.free_frame(frame));
}

pub fn alloc_region(start: PhysicalAddress, end: PhysicalAddress) {
    with_frames(|alloc| alloc.alloc_region(start, end));
}

pub fn free_region(start: PhysicalAddress, end: PhysicalAddress) {
    with_frames(|alloc| alloc.free_region(start, end));
}

#[must_use]
pub fn inc_usage(frame: PhysicalPage) -> u16 {
    with_frames(|alloc| alloc.inc_usage(frame))
}

#[must_use]
pub fn dec_usage(frame: PhysicalPage) -> u16 {
    with_frames(|alloc| alloc.dec_usage(frame))
}

/// `None` before [`init_frames`].
#[must_use]
pub fn stats() -> Option<MemoryStats> {
    MEMORY.lock_irq().as_ref().map(|state| state.frames.stats())
}

pub fn dump_map() {
    with_frames(|alloc| alloc.dump_map());
}

/// # Errors
/// See [`Vmm::map_page`].
pub fn map_page(page: VirtualPage, frame: PhysicalPage, flags: PageEntryBits) -> Result<(), VmmError> {
    with_vmm(|vmm| vmm.map_page(page, frame, flags))
}

#[must_use]
pub fn unmap_page(page: VirtualPage) -> PhysicalPage {
    with_vmm(|vmm| vmm.unmap_page(page))
}

/// # Errors
/// See [`Vmm::alloc_page`].
pub fn alloc_page(page: VirtualPage, flags: PageEntryBits) -> Result<PhysicalPage, VmmError> {
    with_vmm(|vmm| vmm.alloc_page(page, flags))
}

pub fn free_page(page: VirtualPage) {
    with_vmm(|vmm| vmm.free_page(page));
}

/// # Errors
/// See [`Vmm::map_range`].
pub fn map_range(start: VirtualAddress, end: VirtualAddress, flags: PageEntryBits) -> Result<(), VmmError> {
    with_vmm(|vmm| vmm.map_range(start, end, flags))
}

/// # Errors
/// See [`Vmm::unmap_range`].
pub fn unmap_range(start: VirtualAddress, end: VirtualAddress) -> Result<(), VmmError> {
    with_vmm(|vmm| vmm.unmap_range(start, end))
}

/// # Errors
/// See [`Vmm::map_direct`].
pub fn map_direct(
    start: VirtualAddress,
    end: VirtualAddress,
    phys_start: PhysicalAddress,
    flags: PageEntryBits,
) -> Result<(), VmmError> {
    with_vmm(|vmm| vmm.map_direct(start, end, phys_start, flags))
}

/// # Errors
/// See [`Vmm::unmap_direct`].
pub fn unmap_direct(start: VirtualAddress, end: VirtualAddress) -> Result<(), VmmError> {
    with_vmm(|vmm| vmm.unmap_direct(start, end))
}

/// Hand the `.init` section of the kernel back to the frame allocator.
///
/// Returns the number of frames released. Nothing in `.init` may run or be
/// read afterwards.
///
/// # Errors
/// See [`Vmm::release_kernel_range`].
pub fn release_init_sections() -> Result<usize, VmmError> {
    let Some(image) = kernel_image() else {
        panic!("release_init_sections: called before init_frames");
    };
    let (start, end) = (image.init.start, image.init.page_end());
    with_vmm(|vmm| vmm.release_kernel_range(start, end))
}

#[must_use]
pub fn query(va: VirtualAddress) -> Option<PhysicalAddress> {
    with_vmm(|vmm| vmm.query(va))
}

/// The root of the active address space, `None` before [`init_paging`].
#[must_use]
pub fn current_root() -> Option<RootPage> {
    *ROOT.lock_irq()
}

/// Like [`current_root`], but gives up instead of spinning.
///
/// For the fault path, which may interrupt a holder of the lock.
#[must_use]
pub fn try_current_root() -> Option<RootPage> {
    ROOT.try_lock().and_then(|root| *root)
}

/// Make `root` the active address space.
///
/// # Safety
/// `root` must share the kernel's mappings, including the running code, the
/// stack and its own recursive slot.
pub unsafe fn switch_address_space(root: RootPage) {
    let mut current = ROOT.lock_irq();
    if *current == Some(root) {
        return;
    }
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    unsafe {
        AddressSpace::from_root(&RecursivePhysMapper, root).activate();
    }
    *current = Some(root);
}
