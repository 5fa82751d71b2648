//! Test doubles: simulated physical memory and a boot-time allocator over it.

use crate::frame_alloc::FrameAllocator;
use core::cell::{RefCell, UnsafeCell};
use kernel_bitmap::Word;
use kernel_info::boot::{BootMemoryInfo, KernelImage};
use kernel_info::memory::{KERNEL_PHYS, KERNEL_VIRT};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_vmem::{
    DirectoryIndex, FrameAlloc, PageBytes, PageDirectory, PageEntryBits, PageTable, PdEntry,
    PhysMapper, RootPage, TableIndex,
};

/// 640 KiB lower and 1 MiB upper memory.
pub const MEMORY: BootMemoryInfo = BootMemoryInfo::new(640, 1024);

/// Kernel image size used by [`boot_allocator`].
pub const IMAGE_FRAMES: u32 = 8;

#[repr(align(4096))]
struct Frame([u8; 4096]);

/// The first 2 MiB of physical memory; frame `n` sits at `n * 4096`.
pub struct SimulatedRam {
    frames: Vec<UnsafeCell<Frame>>,
    pub invalidated: RefCell<Vec<VirtualPage>>,
}

impl SimulatedRam {
    pub fn new() -> Self {
        Self {
            frames: (0..512).map(|_| UnsafeCell::new(Frame([0; 4096]))).collect(),
            invalidated: RefCell::new(Vec::new()),
        }
    }

    pub fn storage(&self) -> Vec<Word> {
        vec![0; FrameAllocator::storage_words(MEMORY.total_frames())]
    }

    fn frame_ptr<T>(&self, frame: PhysicalPage) -> *mut T {
        self.frames[(frame.base().as_u32() >> 12) as usize].get().cast()
    }
}

impl PhysMapper for SimulatedRam {
    unsafe fn directory_mut<'a>(&self, root: PhysicalPage) -> &'a mut PageDirectory {
        unsafe { &mut *self.frame_ptr(root) }
    }

    unsafe fn table_mut<'a>(&self, _slot: DirectoryIndex, table: PhysicalPage) -> &'a mut PageTable {
        unsafe { &mut *self.frame_ptr(table) }
    }

    unsafe fn page_mut<'a>(&self, _page: VirtualPage, frame: PhysicalPage) -> &'a mut PageBytes {
        unsafe { &mut *self.frame_ptr(frame) }
    }

    fn invalidate_page(&self, page: VirtualPage) {
        self.invalidated.borrow_mut().push(page);
    }
}

/// [`SimulatedRam`] seen through the page tables of `root` with CR0.WP set:
/// writing to a page whose entry is read-only panics.
pub struct WriteProtectedRam<'r> {
    ram: &'r SimulatedRam,
    root: RootPage,
}

impl<'r> WriteProtectedRam<'r> {
    pub fn new(ram: &'r SimulatedRam, root: RootPage) -> Self {
        Self { ram, root }
    }
}

impl PhysMapper for WriteProtectedRam<'_> {
    unsafe fn directory_mut<'a>(&self, root: PhysicalPage) -> &'a mut PageDirectory {
        unsafe { self.ram.directory_mut(root) }
    }

    unsafe fn table_mut<'a>(&self, slot: DirectoryIndex, table: PhysicalPage) -> &'a mut PageTable {
        unsafe { self.ram.table_mut(slot, table) }
    }

    unsafe fn page_mut<'a>(&self, page: VirtualPage, frame: PhysicalPage) -> &'a mut PageBytes {
        let va = page.base();
        let pd = unsafe { self.ram.directory_mut(self.root) };
        let Some(table) = pd.get(DirectoryIndex::from(va)).next_table() else {
            panic!("write to unmapped page {va}");
        };
        let pt = unsafe { self.ram.table_mut(DirectoryIndex::from(va), table) };
        let flags = pt.get(TableIndex::from(va)).flags();
        assert!(flags.present(), "write to unmapped page {va}");
        assert!(flags.writable(), "write to read-only page {va}");
        unsafe { self.ram.page_mut(page, frame) }
    }

    fn invalidate_page(&self, page: VirtualPage) {
        self.ram.invalidate_page(page);
    }
}

pub fn image() -> KernelImage {
    KernelImage::with_frames(
        PhysicalAddress::new(KERNEL_PHYS),
        VirtualAddress::new(KERNEL_VIRT),
        IMAGE_FRAMES,
    )
}

/// Allocator over [`MEMORY`] with [`image`] reserved.
pub fn boot_allocator(storage: &mut [Word]) -> FrameAllocator<'_> {
    FrameAllocator::init(MEMORY, &image(), storage).unwrap()
}

/// Allocate and zero a directory with the recursive slot installed.
pub fn new_space<A: FrameAlloc>(ram: &SimulatedRam, frames: &mut A) -> RootPage {
    let root = frames.alloc_frame().unwrap();
    let pd = unsafe { ram.directory_mut(root) };
    pd.zero();
    pd.set(
        DirectoryIndex::RECURSIVE,
        PdEntry::make_next(root, PageEntryBits::kernel_rw()),
    );
    root
}

/// Forwards to `inner` until `remaining` frames were handed out.
pub struct FailAfter<'a, A> {
    inner: &'a mut A,
    remaining: usize,
}

impl<'a, A: FrameAlloc> FailAfter<'a, A> {
    pub fn new(inner: &'a mut A, remaining: usize) -> Self {
        Self { inner, remaining }
    }
}

impl<A: FrameAlloc> FrameAlloc for FailAfter<'_, A> {
    fn alloc_frame(&mut self) -> Option<PhysicalPage> {
        self.remaining = self.remaining.checked_sub(1)?;
        self.inner.alloc_frame()
    }

    fn free_frame(&mut self, frame: PhysicalPage) {
        self.inner.free_frame(frame);
    }

    fn inc_usage(&mut self, frame: PhysicalPage) -> u16 {
        self.inner.inc_usage(frame)
    }

    fn dec_usage(&mut self, frame: PhysicalPage) -> u16 {
        self.inner.dec_usage(frame)
    }
}
