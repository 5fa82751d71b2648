//! # Paging Bootstrap
//!
//! Builds the first address space and turns paging on.
//!
//! On entry the kernel runs at its high-half link address through segments
//! with base `0x4000_0000` (see [`EarlyPhysMapper`](crate::phys_mapper::EarlyPhysMapper)).
//! [`init_paging`] then:
//!
//! 1. allocates the page directory and installs the recursive slot,
//! 2. maps every kernel frame at [`KERNEL_VIRT`](kernel_info::memory::KERNEL_VIRT)
//!    through a single page table, read-only for `.text` and `.init.text`,
//! 3. aliases the kernel table into slot 0 so the code keeps running once
//!    linear addresses stop wrapping,
//! 4. enables paging and reloads flat segments,
//! 5. drops the slot 0 alias again through the recursive window.

use kernel_info::boot::{KernelImage, SectionRange};
use kernel_info::memory::PAGE_ENTRIES;
use kernel_memory_addresses::{VirtualAddress, VirtualPage};
use kernel_vmem::{
    AddressSpace, DirectoryIndex, FrameAlloc, PageEntryBits, PdEntry, PhysMapper, RootPage,
    TableIndex, VmmError,
};
use log::{debug, info};

/// The CPU state changes the bootstrap needs from the caller.
pub trait PagingControl {
    /// Load CR3 with `root` and set `CR0.PG`.
    ///
    /// # Safety
    /// `root` must map the currently executing code at its linear address.
    unsafe fn enable_paging(&mut self, root: RootPage);

    /// Load the code and data segments with base 0.
    ///
    /// # Safety
    /// Paging must map the kernel at its link address.
    unsafe fn flatten_segments(&mut self);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootstrapError {
    #[error("out of physical memory for the boot page directory")]
    OutOfMemory,
    #[error("kernel of {frames} frames does not fit the boot page table")]
    KernelTooLarge { frames: usize },
    #[error("mapping the kernel failed: {0}")]
    Map(#[from] VmmError),
}

/// Build the kernel address space and switch to it.
///
/// `kernel_frames` counts the frames reserved behind `image.phys_start`,
/// which includes the frame allocator's maps. `early` must reach physical
/// memory with paging off; `active` is used once paging is on.
///
/// # Errors
/// - [`BootstrapError::OutOfMemory`] if no frame is left for the directory.
/// - [`BootstrapError::KernelTooLarge`] if the kernel spills over a single
///   page table.
/// - [`BootstrapError::Map`] if the page table cannot be allocated.
///
/// # Safety
/// - Must run once, at CPL0, with paging off and the boot segments loaded.
/// - `control` must really switch the CPU; the code after it relies on the
///   recursive window.
pub unsafe fn init_paging<E, R, A, C>(
    early: &E,
    active: &R,
    alloc: &mut A,
    image: &KernelImage,
    kernel_frames: usize,
    control: &mut C,
) -> Result<RootPage, BootstrapError>
where
    E: PhysMapper,
    R: PhysMapper,
    A: FrameAlloc,
    C: PagingControl,
{
    let first = TableIndex::from(image.virt_start).as_usize();
    if first + kernel_frames > PAGE_ENTRIES {
        return Err(BootstrapError::KernelTooLarge {
            frames: kernel_frames,
        });
    }

    let Some(root) = alloc.alloc_frame() else {
        return Err(BootstrapError::OutOfMemory);
    };
    {
        // SAFETY: The frame was just allocated and paging is off.
        let pd = unsafe { early.directory_mut(root) };
        pd.zero();
        pd.set(
            DirectoryIndex::RECURSIVE,
            PdEntry::make_next(root, PageEntryBits::kernel_rw()),
        );
    }

    let aspace = AddressSpace::from_root(early, root);
    let virt = image.virt_start.page();
    let phys = image.phys_start.page();
    for n in 0..kernel_frames {
        #[allow(clippy::cast_possible_truncation)]
        let n = n as u32;
        let (Some(page), Some(frame)) = (virt.checked_add_pages(n), phys.checked_add_pages(n)) else {
            return Err(BootstrapError::KernelTooLarge {
                frames: kernel_frames,
            });
        };
        aspace.map_page(alloc, page, frame, PageEntryBits::kernel_rw())?;
    }
    write_protect(&aspace, image.text);
    write_protect(&aspace, image.init_text);

    let kernel_slot = DirectoryIndex::from(image.virt_start);
    {
        // SAFETY: Still the same directory, still with paging off.
        let pd = unsafe { early.directory_mut(root) };
        pd.set(DirectoryIndex::new(0), pd.get(kernel_slot));
    }
    debug!("boot directory {root:?}: {kernel_frames} kernel pages, slot 0 aliases slot {}", kernel_slot.as_usize());

    unsafe {
        control.enable_paging(root);
        control.flatten_segments();
    }

    // SAFETY: Paging is on with `root` active.
    let pd = unsafe { active.directory_mut(root) };
    pd.set(DirectoryIndex::new(0), PdEntry::zero());
    active.invalidate_page(VirtualPage::new_aligned(VirtualAddress::new(0)));

    info!("paging enabled, page directory at {}", root.base());
    Ok(root)
}

fn write_protect<M: PhysMapper>(aspace: &AddressSpace<'_, M>, section: SectionRange) {
    let first = section.start.page();
    for n in 0..section.pages() {
        if let Some(page) = first.checked_add_pages(n) {
            aspace.set_writable(page, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{IMAGE_FRAMES, SimulatedRam, boot_allocator, image};
    use kernel_info::memory::{KERNEL_PHYS, KERNEL_VIRT};
    use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        root: Option<RootPage>,
    }

    impl PagingControl for Recorder {
        unsafe fn enable_paging(&mut self, root: RootPage) {
            self.calls.push("enable_paging");
            self.root = Some(root);
        }

        unsafe fn flatten_segments(&mut self) {
            self.calls.push("flatten_segments");
        }
    }

    fn sectioned_image() -> KernelImage {
        let mut image = image();
        image.text = SectionRange::new(VirtualAddress::new(KERNEL_VIRT), 0x1800);
        image.init_text = SectionRange::new(VirtualAddress::new(KERNEL_VIRT + 0x5000), 0x1000);
        image
    }

    fn vp(addr: u32) -> VirtualPage {
        VirtualPage::new_aligned(VirtualAddress::new(addr))
    }

    #[test]
    fn builds_the_kernel_address_space() {
        let ram = SimulatedRam::new();
        let mut storage = ram.storage();
        let mut frames = boot_allocator(&mut storage);
        let kernel = frames.stats().kernel;
        assert_eq!(kernel, IMAGE_FRAMES as usize + 1);

        let image = sectioned_image();
        let mut control = Recorder::default();
        let root =
            unsafe { init_paging(&ram, &ram, &mut frames, &image, kernel, &mut control) }.unwrap();

        assert_eq!(control.calls, ["enable_paging", "flatten_segments"]);
        assert_eq!(control.root, Some(root));

        let pd = unsafe { ram.directory_mut(root) };
        assert_eq!(pd.get(DirectoryIndex::RECURSIVE).next_table(), Some(root));
        assert!(!pd.get(DirectoryIndex::new(0)).is_present());
        let table = pd.get(DirectoryIndex::new(768)).next_table().unwrap();
        assert_eq!(frames.usage(table), kernel as u16);

        let aspace = AddressSpace::from_root(&ram, root);
        for n in 0..kernel as u32 {
            let va = VirtualAddress::new(KERNEL_VIRT + n * 4096 + 8);
            assert_eq!(aspace.query(va), Some(PhysicalAddress::new(KERNEL_PHYS + n * 4096 + 8)));
        }
        let writable = |addr| aspace.entry(vp(addr)).unwrap().flags().writable();
        assert!(!writable(KERNEL_VIRT));
        assert!(!writable(KERNEL_VIRT + 0x1000));
        assert!(writable(KERNEL_VIRT + 0x2000));
        assert!(!writable(KERNEL_VIRT + 0x5000));
        assert!(writable(KERNEL_VIRT + 0x6000));
        assert_eq!(aspace.query(VirtualAddress::new(KERNEL_PHYS)), None);

        assert_eq!(ram.invalidated.borrow().last(), Some(&vp(0)));
    }

    #[test]
    fn alias_is_present_while_paging_is_switched_on() {
        struct Checker<'r> {
            ram: &'r SimulatedRam,
            aliased: bool,
        }

        impl PagingControl for Checker<'_> {
            unsafe fn enable_paging(&mut self, root: RootPage) {
                let pd = unsafe { self.ram.directory_mut(root) };
                self.aliased = pd.get(DirectoryIndex::new(0)) == pd.get(DirectoryIndex::new(768));
            }

            unsafe fn flatten_segments(&mut self) {}
        }

        let ram = SimulatedRam::new();
        let mut storage = ram.storage();
        let mut frames = boot_allocator(&mut storage);
        let kernel = frames.stats().kernel;
        let mut control = Checker {
            ram: &ram,
            aliased: false,
        };
        unsafe { init_paging(&ram, &ram, &mut frames, &image(), kernel, &mut control) }.unwrap();
        assert!(control.aliased);
    }

    #[test]
    fn kernel_must_fit_one_table() {
        let ram = SimulatedRam::new();
        let mut storage = ram.storage();
        let mut frames = boot_allocator(&mut storage);
        let before = frames.stats();
        let mut control = Recorder::default();

        // The image starts at table index 256.
        let err = unsafe { init_paging(&ram, &ram, &mut frames, &image(), 769, &mut control) }
            .unwrap_err();
        assert_eq!(err, BootstrapError::KernelTooLarge { frames: 769 });
        assert!(control.calls.is_empty());
        assert_eq!(frames.stats(), before);
        assert!(frames.is_free(PhysicalPage::new_aligned(PhysicalAddress::new(0))));
    }
}
