//! The kernel-wide allocator behind `lock_irq`.
//!
//! Paging cannot be switched on in a hosted test, so only the frame calls are
//! driven here. Everything runs in one test: the statics and the emulated
//! interrupt flag are shared by the whole binary.

use kernel_alloc::frame_alloc::FrameAllocator;
use kernel_alloc::global;
use kernel_info::boot::{BootMemoryInfo, KernelImage};
use kernel_info::memory::{KERNEL_PHYS, KERNEL_VIRT};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sync::irq::interrupts_enabled;

#[test]
fn frame_calls_through_the_global_allocator() {
    assert_eq!(global::stats(), None);
    assert_eq!(global::current_root(), None);
    assert!(interrupts_enabled());

    let memory = BootMemoryInfo::new(640, 4096);
    let image = KernelImage::with_frames(
        PhysicalAddress::new(KERNEL_PHYS),
        VirtualAddress::new(KERNEL_VIRT),
        32,
    );
    let storage = vec![0; FrameAllocator::storage_words(memory.total_frames())];
    let stats = global::init_frames(memory, image, Box::leak(storage.into_boxed_slice())).unwrap();
    assert_eq!(stats.total, 160 + 1024);
    assert_eq!(stats.kernel, 33);
    assert_eq!(global::kernel_image(), Some(image));
    assert!(interrupts_enabled());

    let a = global::alloc_frame().unwrap();
    let b = global::alloc_frame().unwrap();
    assert!(a.base() < b.base());
    assert_eq!(global::inc_usage(a), 1);
    assert_eq!(global::dec_usage(a), 0);
    global::free_frame(a);
    global::free_frame(b);
    assert_eq!(global::stats(), Some(stats));
    assert!(interrupts_enabled());

    let start = PhysicalAddress::new(0x0020_0000);
    let end = PhysicalAddress::new(0x0030_0000);
    global::alloc_region(start, end);
    assert_eq!(global::stats().unwrap().used, stats.used + 256);
    global::free_region(start, end);
    assert_eq!(global::stats(), Some(stats));
    assert!(interrupts_enabled());
}
