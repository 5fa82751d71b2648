//! # Physical Frame Allocator
//!
//! Two-tier bitmap allocator for 4 KiB frames with a 16-bit usage counter per
//! frame.
//!
//! ## Frame numbering
//!
//! Lower memory (below 640 KiB) and upper memory (from 1 MiB) are numbered
//! contiguously, skipping the hole in between:
//!
//! ```text
//! index:   0 .. lower            lower .. total
//! address: 0 .. lower * 4 KiB    1 MiB .. 1 MiB + (total - lower) * 4 KiB
//! ```
//!
//! ## Maps
//!
//! - **Frame map**: one bit per frame, set = free.
//! - **Superframe map**: one bit per group of 1024 frames, set = the group
//!   has at least one free frame. Allocation scans this summary first, then
//!   only the 32 words of the chosen group.
//! - **Usage counters**: one `u16` per frame, packed two to a word.
//!
//! All three live in a single borrowed word slice (see [`FrameMapLayout`]),
//! placed by the kernel right behind its image and counted as kernel frames.

use core::fmt;
use kernel_bitmap::{BITS_PER_WORD, Bitmap, Word, words_for};
use kernel_info::boot::{BootMemoryInfo, KernelImage};
use kernel_info::memory::{SUPERFRAME_FRAMES, UPPER_MEMORY_START};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};
use kernel_vmem::FrameAlloc;
use log::{info, warn};

/// Word counts of the allocator's storage for a given number of frames.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameMapLayout {
    pub frame_words: usize,
    pub superframe_words: usize,
    pub usage_words: usize,
}

impl FrameMapLayout {
    #[must_use]
    pub const fn for_frames(total_frames: usize) -> Self {
        Self {
            frame_words: words_for(total_frames),
            superframe_words: words_for(total_frames.div_ceil(SUPERFRAME_FRAMES)),
            usage_words: total_frames.div_ceil(USAGE_PER_WORD),
        }
    }

    #[must_use]
    pub const fn total_words(&self) -> usize {
        self.frame_words + self.superframe_words + self.usage_words
    }

    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.total_words() * size_of::<Word>()
    }

    /// Whole frames occupied by the storage.
    #[must_use]
    pub const fn frames(&self) -> usize {
        self.bytes().div_ceil(PAGE_SIZE as usize)
    }
}

const USAGE_PER_WORD: usize = size_of::<Word>() / size_of::<u16>();

/// Frame counts, reported in KiB by [`Display`](fmt::Display).
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct MemoryStats {
    pub total: usize,
    pub free: usize,
    pub used: usize,
    /// Frames reserved at boot for the kernel image and this allocator.
    pub kernel: usize,
    /// Frames of lower memory (below 640 KiB).
    pub lower: usize,
    /// Frames of upper memory (from 1 MiB).
    pub upper: usize,
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KIB: usize = PAGE_SIZE as usize / 1024;
        write!(
            f,
            "{} KiB total ({} KiB lower, {} KiB upper), {} KiB free, {} KiB used, {} KiB kernel",
            self.total * KIB,
            self.lower * KIB,
            self.upper * KIB,
            self.free * KIB,
            self.used * KIB,
            self.kernel * KIB
        )
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocInitError {
    #[error("allocator storage holds {provided} words, {required} required")]
    StorageTooSmall { provided: usize, required: usize },
    #[error("boot loader reported no memory")]
    NoMemory,
    #[error("kernel reservation {start}..{end} is outside upper memory")]
    KernelOutsideUpperMemory {
        start: PhysicalAddress,
        end: PhysicalAddress,
    },
}

/// Bitmap-backed physical frame allocator.
pub struct FrameAllocator<'a> {
    frames: Bitmap<'a>,
    superframes: Bitmap<'a>,
    usage: &'a mut [Word],
    stats: MemoryStats,
}

impl<'a> FrameAllocator<'a> {
    /// Words of storage [`init`](Self::init) needs for `total_frames`.
    #[must_use]
    pub const fn storage_words(total_frames: usize) -> usize {
        FrameMapLayout::for_frames(total_frames).total_words()
    }

    /// Build the maps over `storage` and reserve the kernel.
    ///
    /// Every frame starts free; then the kernel image plus the frames covering
    /// `storage` itself are reserved starting at `image.phys_start`.
    ///
    /// # Errors
    /// - [`FrameAllocInitError::NoMemory`] if `memory` reports no frames.
    /// - [`FrameAllocInitError::StorageTooSmall`] if `storage` is shorter than
    ///   [`storage_words`](Self::storage_words).
    /// - [`FrameAllocInitError::KernelOutsideUpperMemory`] if the reservation
    ///   does not lie inside upper memory.
    pub fn init(
        memory: BootMemoryInfo,
        image: &KernelImage,
        storage: &'a mut [Word],
    ) -> Result<Self, FrameAllocInitError> {
        let total = memory.total_frames();
        if total == 0 {
            return Err(FrameAllocInitError::NoMemory);
        }

        let layout = FrameMapLayout::for_frames(total);
        let required = layout.total_words();
        if storage.len() < required {
            return Err(FrameAllocInitError::StorageTooSmall {
                provided: storage.len(),
                required,
            });
        }

        let storage = &mut storage[..required];
        storage.fill(0);
        let (frame_words, rest) = storage.split_at_mut(layout.frame_words);
        let (superframe_words, usage) = rest.split_at_mut(layout.superframe_words);

        let superframe_count = total.div_ceil(SUPERFRAME_FRAMES);
        let mut frames = Bitmap::new(frame_words, total);
        let mut superframes = Bitmap::new(superframe_words, superframe_count);
        frames.set_range(0, total);
        superframes.set_range(0, superframe_count);

        let kernel = image.frames() as usize + layout.frames();
        let mut this = Self {
            frames,
            superframes,
            usage,
            stats: MemoryStats {
                total,
                free: total,
                used: 0,
                kernel,
                lower: memory.lower_frames(),
                upper: memory.upper_frames(),
            },
        };

        let start = image.phys_start;
        let end = frames_after(start, kernel);
        let upper_end = UPPER_MEMORY_START as usize + memory.upper_frames() * PAGE_SIZE as usize;
        if start.as_u32() < UPPER_MEMORY_START || end.as_u32() as usize > upper_end || end < start {
            return Err(FrameAllocInitError::KernelOutsideUpperMemory { start, end });
        }
        this.alloc_region(start, end);

        info!("frame allocator: {total} frames, {required} words of maps, {kernel} kernel frames");
        info!("memory: {}", this.stats);
        Ok(this)
    }

    /// Allocate the lowest free frame, `None` when memory is exhausted.
    pub fn alloc_frame(&mut self) -> Option<PhysicalPage> {
        if self.stats.free == 0 {
            warn!("out of physical memory");
            return None;
        }

        let Some(superframe) = self.superframes.find_first_set() else {
            warn!("out of physical memory: {} frames counted free", self.stats.free);
            return None;
        };

        let first = superframe * SUPERFRAME_FRAMES;
        let Some(index) = self.frames.find_first_set_in(first, SUPERFRAME_FRAMES) else {
            panic!("alloc_frame: superframe {superframe} is marked free but holds no free frame");
        };

        self.frames.clear(index);
        if self.superframe_full(superframe) {
            self.superframes.clear(superframe);
        }
        self.stats.free -= 1;
        self.stats.used += 1;
        Some(self.frame_address(index))
    }

    /// Return `frame` to the free pool.
    ///
    /// # Panics
    /// In debug builds, if `frame` is already free.
    pub fn free_frame(&mut self, frame: PhysicalPage) {
        let index = self.frame_index(frame);
        debug_assert!(!self.frames.get(index), "free_frame: {frame:?} already freed");

        self.frames.set(index);
        self.superframes.set(index / SUPERFRAME_FRAMES);
        self.stats.free += 1;
        self.stats.used -= 1;
    }

    /// Reserve every frame in `[start, end)`.
    ///
    /// # Panics
    /// In debug builds, if any frame in the range is already allocated.
    pub fn alloc_region(&mut self, start: PhysicalAddress, end: PhysicalAddress) {
        let Some((first, count)) = self.region(start, end) else {
            return;
        };
        debug_assert!(
            self.frames.all_set(first, count),
            "alloc_region: {start}..{end} is not entirely free"
        );

        self.frames.clear_range(first, count);
        let last = first + count;

        let covered = first.div_ceil(SUPERFRAME_FRAMES)..last / SUPERFRAME_FRAMES;
        if !covered.is_empty() {
            self.superframes.clear_range(covered.start, covered.len());
        }
        for superframe in [first / SUPERFRAME_FRAMES, (last - 1) / SUPERFRAME_FRAMES] {
            if self.superframe_full(superframe) {
                self.superframes.clear(superframe);
            }
        }

        self.stats.free -= count;
        self.stats.used += count;
    }

    /// Release every frame in `[start, end)`.
    ///
    /// # Panics
    /// In debug builds, if any frame in the range is already free.
    pub fn free_region(&mut self, start: PhysicalAddress, end: PhysicalAddress) {
        let Some((first, count)) = self.region(start, end) else {
            return;
        };
        debug_assert!(
            self.frames.all_clear(first, count),
            "free_region: {start}..{end} is not entirely allocated"
        );

        self.frames.set_range(first, count);
        let touched = first / SUPERFRAME_FRAMES..(first + count).div_ceil(SUPERFRAME_FRAMES);
        self.superframes.set_range(touched.start, touched.len());

        self.stats.free += count;
        self.stats.used -= count;
    }

    /// # Panics
    /// If the counter would overflow.
    pub fn inc_usage(&mut self, frame: PhysicalPage) -> u16 {
        let Some(n) = self.usage(frame).checked_add(1) else {
            panic!("inc_usage: usage counter of {frame:?} overflowed");
        };
        self.set_usage(frame, n);
        n
    }

    /// # Panics
    /// If the counter is already zero.
    pub fn dec_usage(&mut self, frame: PhysicalPage) -> u16 {
        let Some(n) = self.usage(frame).checked_sub(1) else {
            panic!("dec_usage: usage counter of {frame:?} is already zero");
        };
        self.set_usage(frame, n);
        n
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn usage(&self, frame: PhysicalPage) -> u16 {
        let (word, shift) = usage_slot(self.frame_index(frame));
        (self.usage[word] >> shift) as u16
    }

    fn set_usage(&mut self, frame: PhysicalPage, n: u16) {
        let (word, shift) = usage_slot(self.frame_index(frame));
        let w = &mut self.usage[word];
        *w = (*w & !(0xFFFF << shift)) | (Word::from(n) << shift);
    }

    #[must_use]
    pub fn is_free(&self, frame: PhysicalPage) -> bool {
        self.frames.get(self.frame_index(frame))
    }

    #[must_use]
    pub const fn stats(&self) -> MemoryStats {
        self.stats
    }

    /// Allocator index of `frame`.
    #[must_use]
    pub fn frame_index(&self, frame: PhysicalPage) -> usize {
        let addr = frame.base().as_u32() as usize;
        let index = if addr < UPPER_MEMORY_START as usize {
            debug_assert!(
                addr / (PAGE_SIZE as usize) < self.stats.lower,
                "{frame:?} lies in the lower memory hole"
            );
            addr / PAGE_SIZE as usize
        } else {
            (addr - UPPER_MEMORY_START as usize) / PAGE_SIZE as usize + self.stats.lower
        };
        debug_assert!(index < self.stats.total, "{frame:?} is beyond the end of memory");
        index
    }

    /// Frame at allocator index `index`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn frame_address(&self, index: usize) -> PhysicalPage {
        debug_assert!(index < self.stats.total, "frame index {index} out of range");
        let addr = if index < self.stats.lower {
            index * PAGE_SIZE as usize
        } else {
            (index - self.stats.lower) * PAGE_SIZE as usize + UPPER_MEMORY_START as usize
        };
        PhysicalPage::new_aligned(PhysicalAddress::new(addr as u32))
    }

    /// Log both maps, `-` for free and `U` for used.
    pub fn dump_map(&self) {
        info!("superframe map:\n{}", self.superframes.dump());
        info!("frame map:\n{}", self.frames.dump());
        info!("memory: {}", self.stats);
    }

    /// Allocator indices covered by a page-aligned range, `None` if empty.
    fn region(&self, start: PhysicalAddress, end: PhysicalAddress) -> Option<(usize, usize)> {
        debug_assert!(start.is_page_aligned() && end.is_page_aligned(), "unaligned region");
        if end <= start {
            return None;
        }
        let first = self.frame_index(start.page());
        let last = self.frame_index(PhysicalAddress::new(end.as_u32() - PAGE_SIZE).page());
        debug_assert_eq!(
            (last - first + 1) * PAGE_SIZE as usize,
            (end.as_u32() - start.as_u32()) as usize,
            "region {start}..{end} spans the lower memory hole"
        );
        Some((first, last - first + 1))
    }

    fn superframe_full(&self, superframe: usize) -> bool {
        let first = superframe * SUPERFRAME_FRAMES;
        let len = SUPERFRAME_FRAMES.min(self.stats.total - first);
        self.frames.all_clear(first, len)
    }
}

impl FrameAlloc for FrameAllocator<'_> {
    fn alloc_frame(&mut self) -> Option<PhysicalPage> {
        Self::alloc_frame(self)
    }

    fn free_frame(&mut self, frame: PhysicalPage) {
        Self::free_frame(self, frame);
    }

    fn inc_usage(&mut self, frame: PhysicalPage) -> u16 {
        Self::inc_usage(self, frame)
    }

    fn dec_usage(&mut self, frame: PhysicalPage) -> u16 {
        Self::dec_usage(self, frame)
    }
}

impl fmt::Debug for FrameAllocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameAllocator")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn usage_slot(index: usize) -> (usize, u32) {
    (index / USAGE_PER_WORD, ((index % USAGE_PER_WORD) * 16) as u32)
}

#[allow(clippy::cast_possible_truncation)]
fn frames_after(start: PhysicalAddress, frames: usize) -> PhysicalAddress {
    PhysicalAddress::new(start.as_u32().wrapping_add((frames * PAGE_SIZE as usize) as u32))
}

const _: () = assert!(SUPERFRAME_FRAMES % BITS_PER_WORD == 0);

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::{KERNEL_PHYS, KERNEL_VIRT};
    use kernel_memory_addresses::VirtualAddress;

    fn image(frames: u32) -> KernelImage {
        KernelImage::with_frames(
            PhysicalAddress::new(KERNEL_PHYS),
            VirtualAddress::new(KERNEL_VIRT),
            frames,
        )
    }

    fn page(addr: u32) -> PhysicalPage {
        PhysicalPage::new_aligned(PhysicalAddress::new(addr))
    }

    #[test]
    fn layout_for_reference_machine() {
        let layout = FrameMapLayout::for_frames(16288);
        assert_eq!(layout.frame_words, 509);
        assert_eq!(layout.superframe_words, 1);
        assert_eq!(layout.usage_words, 8144);
        assert_eq!(layout.bytes(), 34616);
        assert_eq!(layout.frames(), 9);
        assert_eq!(FrameAllocator::storage_words(16288), 8654);
    }

    #[test]
    fn init_reserves_image_and_storage() {
        let mem = BootMemoryInfo::new(640, 64512);
        let mut storage = vec![0xDEAD_BEEF; FrameAllocator::storage_words(mem.total_frames())];
        let fa = FrameAllocator::init(mem, &image(256), &mut storage).unwrap();

        let stats = fa.stats();
        assert_eq!(stats.total, 16288);
        assert_eq!(stats.lower, 160);
        assert_eq!(stats.upper, 16128);
        assert_eq!(stats.kernel, 265);
        assert_eq!(stats.used, 265);
        assert_eq!(stats.free, 16288 - 265);

        // The reservation starts at 1 MiB, i.e. right after lower memory.
        let reserved = 160..160 + 265;
        for index in 0..stats.total {
            let frame = fa.frame_address(index);
            assert_eq!(fa.is_free(frame), !reserved.contains(&index), "frame {index} at {frame:?}");
            assert_eq!(fa.usage(frame), 0);
        }
    }

    #[test]
    fn index_and_address_skip_the_hole() {
        let mem = BootMemoryInfo::new(640, 64512);
        let mut storage = vec![0; FrameAllocator::storage_words(mem.total_frames())];
        let fa = FrameAllocator::init(mem, &image(1), &mut storage).unwrap();

        assert_eq!(fa.frame_index(page(0x9F000)), 159);
        assert_eq!(fa.frame_index(page(0x10_0000)), 160);
        assert_eq!(fa.frame_address(160), page(0x10_0000));
        for index in [0, 1, 159, 160, 1023, 1024, 16287] {
            assert_eq!(fa.frame_index(fa.frame_address(index)), index);
        }
    }

    #[test]
    fn first_allocations_come_from_lower_memory() {
        let mem = BootMemoryInfo::new(640, 64512);
        let mut storage = vec![0; FrameAllocator::storage_words(mem.total_frames())];
        let mut fa = FrameAllocator::init(mem, &image(256), &mut storage).unwrap();

        assert_eq!(fa.alloc_frame(), Some(page(0x0000)));
        assert_eq!(fa.alloc_frame(), Some(page(0x1000)));
        assert_eq!(fa.stats().used, 267);

        fa.free_frame(page(0x0000));
        assert_eq!(fa.alloc_frame(), Some(page(0x0000)));
    }

    #[test]
    fn storage_too_small() {
        let mem = BootMemoryInfo::new(640, 1024);
        let mut storage = [0; 4];
        let err = FrameAllocator::init(mem, &image(1), &mut storage).unwrap_err();
        assert!(matches!(err, FrameAllocInitError::StorageTooSmall { provided: 4, .. }));
    }

    #[test]
    fn kernel_must_fit_upper_memory() {
        let mem = BootMemoryInfo::new(640, 64);
        let mut storage = vec![0; FrameAllocator::storage_words(mem.total_frames())];
        let err = FrameAllocator::init(mem, &image(64), &mut storage).unwrap_err();
        assert!(matches!(err, FrameAllocInitError::KernelOutsideUpperMemory { .. }));

        let err = FrameAllocator::init(BootMemoryInfo::new(0, 0), &image(1), &mut storage).unwrap_err();
        assert_eq!(err, FrameAllocInitError::NoMemory);
    }

    #[test]
    fn usage_counters_are_independent() {
        let mem = BootMemoryInfo::new(640, 4096);
        let mut storage = vec![0; FrameAllocator::storage_words(mem.total_frames())];
        let mut fa = FrameAllocator::init(mem, &image(4), &mut storage).unwrap();

        assert_eq!(fa.inc_usage(page(0x2000)), 1);
        assert_eq!(fa.inc_usage(page(0x2000)), 2);
        assert_eq!(fa.inc_usage(page(0x3000)), 1);
        assert_eq!(fa.dec_usage(page(0x2000)), 1);
        assert_eq!(fa.usage(page(0x1000)), 0);
        assert_eq!(fa.usage(page(0x2000)), 1);
        assert_eq!(fa.usage(page(0x3000)), 1);
    }

    #[test]
    #[should_panic(expected = "already zero")]
    fn usage_underflow_panics() {
        let mem = BootMemoryInfo::new(640, 4096);
        let mut storage = vec![0; FrameAllocator::storage_words(mem.total_frames())];
        let mut fa = FrameAllocator::init(mem, &image(4), &mut storage).unwrap();
        fa.dec_usage(page(0x2000));
    }

    #[test]
    #[should_panic(expected = "overflowed")]
    fn usage_overflow_panics() {
        let mem = BootMemoryInfo::new(640, 4096);
        let mut storage = vec![0; FrameAllocator::storage_words(mem.total_frames())];
        let mut fa = FrameAllocator::init(mem, &image(4), &mut storage).unwrap();
        for _ in 0..=u16::MAX {
            fa.inc_usage(page(0x2000));
        }
    }

    #[test]
    fn stats_display_in_kib() {
        let stats = MemoryStats {
            total: 4,
            free: 3,
            used: 1,
            kernel: 1,
            lower: 1,
            upper: 3,
        };
        assert_eq!(
            stats.to_string(),
            "16 KiB total (4 KiB lower, 12 KiB upper), 12 KiB free, 4 KiB used, 4 KiB kernel"
        );
    }
}
