//! Frame allocator behaviour over whole memory maps.

use kernel_alloc::frame_alloc::FrameAllocator;
use kernel_info::boot::{BootMemoryInfo, KernelImage};
use kernel_info::memory::{KERNEL_PHYS, KERNEL_VIRT};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
use std::collections::HashSet;

fn image(frames: u32) -> KernelImage {
    KernelImage::with_frames(
        PhysicalAddress::new(KERNEL_PHYS),
        VirtualAddress::new(KERNEL_VIRT),
        frames,
    )
}

fn storage(memory: BootMemoryInfo) -> Vec<u32> {
    vec![0; FrameAllocator::storage_words(memory.total_frames())]
}

fn page(addr: u32) -> PhysicalPage {
    PhysicalPage::new_aligned(PhysicalAddress::new(addr))
}

#[test]
fn exhaustion_hands_out_every_free_frame_once() {
    let memory = BootMemoryInfo::new(640, 1024);
    let mut words = storage(memory);
    let mut frames = FrameAllocator::init(memory, &image(8), &mut words).unwrap();
    let initial = frames.stats();

    let mut seen = HashSet::new();
    while let Some(frame) = frames.alloc_frame() {
        assert!(seen.insert(frame), "{frame:?} handed out twice");
    }
    assert_eq!(seen.len(), initial.free);
    assert_eq!(frames.stats().free, 0);
    assert_eq!(frames.alloc_frame(), None);

    for frame in seen {
        frames.free_frame(frame);
    }
    assert_eq!(frames.stats(), initial);
    assert_eq!(frames.alloc_frame(), Some(page(0)));
}

#[test]
fn allocation_moves_on_to_the_next_superframe() {
    // 2048 frames of upper memory; the kernel fills all but two of the first 1024.
    let memory = BootMemoryInfo::new(0, 8192);
    let mut words = storage(memory);
    let mut frames = FrameAllocator::init(memory, &image(1020), &mut words).unwrap();
    assert_eq!(frames.stats().kernel, 1022);

    assert_eq!(frames.alloc_frame(), Some(page(KERNEL_PHYS + 1022 * 4096)));
    assert_eq!(frames.alloc_frame(), Some(page(KERNEL_PHYS + 1023 * 4096)));
    assert_eq!(frames.alloc_frame(), Some(page(KERNEL_PHYS + 1024 * 4096)));

    frames.free_frame(page(KERNEL_PHYS + 1023 * 4096));
    assert_eq!(frames.alloc_frame(), Some(page(KERNEL_PHYS + 1023 * 4096)));
}

#[test]
fn region_round_trip_is_a_no_op() {
    let memory = BootMemoryInfo::new(640, 8192);
    let mut words = storage(memory);
    let mut frames = FrameAllocator::init(memory, &image(16), &mut words).unwrap();
    let initial = frames.stats();

    // Crosses the boundary between the first two superframes.
    let start = PhysicalAddress::new(0x0030_0000);
    let end = PhysicalAddress::new(0x0050_0000);
    frames.alloc_region(start, end);
    assert_eq!(frames.stats().used, initial.used + 512);
    assert!(!frames.is_free(page(0x0030_0000)));
    assert!(!frames.is_free(page(0x004F_F000)));
    assert!(frames.is_free(page(0x0050_0000)));

    frames.free_region(start, end);
    assert_eq!(frames.stats(), initial);
    assert!(frames.is_free(page(0x0030_0000)));
    assert!(frames.is_free(page(0x004F_F000)));
}

#[test]
fn empty_region_changes_nothing() {
    let memory = BootMemoryInfo::new(640, 1024);
    let mut words = storage(memory);
    let mut frames = FrameAllocator::init(memory, &image(8), &mut words).unwrap();
    let initial = frames.stats();

    let at = PhysicalAddress::new(0x0018_0000);
    frames.alloc_region(at, at);
    frames.free_region(at, at);
    assert_eq!(frames.stats(), initial);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "is not entirely free")]
fn overlapping_region_is_detected() {
    let memory = BootMemoryInfo::new(640, 1024);
    let mut words = storage(memory);
    let mut frames = FrameAllocator::init(memory, &image(8), &mut words).unwrap();

    frames.alloc_region(PhysicalAddress::new(0x0018_0000), PhysicalAddress::new(0x0019_0000));
    frames.alloc_region(PhysicalAddress::new(0x0018_F000), PhysicalAddress::new(0x001A_0000));
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "already freed")]
fn double_free_is_detected() {
    let memory = BootMemoryInfo::new(640, 1024);
    let mut words = storage(memory);
    let mut frames = FrameAllocator::init(memory, &image(8), &mut words).unwrap();

    let frame = frames.alloc_frame().unwrap();
    frames.free_frame(frame);
    frames.free_frame(frame);
}
