//! # Kernel Memory Allocation and Virtual Memory Management
//!
//! Physical frame allocation, the paging bootstrap and the page/range
//! mapping operations the rest of the kernel uses.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          global: kernel-wide instances              │
//! │    • lock_irq around every call                     │
//! │    • active root, page-fault entry                  │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │          Virtual Memory Manager (vmm)               │
//! │    • anonymous pages and ranges with rollback       │
//! │    • direct mappings of caller-owned frames         │
//! └─────────────────┬───────────────────────────────────┘
//!                   │  kernel_vmem::AddressSpace
//! ┌─────────────────▼───────────────────────────────────┐
//! │          Physical Mappers (phys_mapper)             │
//! │    • early: phys + 0xC000_0000 via segment base     │
//! │    • recursive: 0xFFC0_0000 / 0xFFFF_F000 windows   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │          Physical Frame Allocator (frame_alloc)     │
//! │    • frame + superframe bitmaps                     │
//! │    • 16-bit usage counter per frame                 │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Boot sequence
//!
//! 1. [`global::init_frames`] with the memory sizes reported by the boot
//!    loader, the kernel image layout and storage placed right behind the
//!    image.
//! 2. [`global::init_paging`] runs the [`bootstrap`] and records the root.
//! 3. Steady state: [`global::alloc_page`], [`global::map_range`] and friends.
//!
//! ## Virtual Address Space Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │   unmapped after boot           │
//! 0xC000_0000 ├─────────────────────────────────┤
//!             │   kernel image + allocator maps │
//!             │   kernel mappings               │
//! 0xFFC0_0000 ├─────────────────────────────────┤
//!             │   page tables (recursive slot)  │
//! 0xFFFF_F000 ├─────────────────────────────────┤
//!             │   page directory                │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::frame_alloc::FrameAllocator;
//! use kernel_info::boot::{BootMemoryInfo, KernelImage};
//! use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
//!
//! let memory = BootMemoryInfo::new(640, 4096);
//! let image = KernelImage::with_frames(
//!     PhysicalAddress::new(0x0010_0000),
//!     VirtualAddress::new(0xC010_0000),
//!     16,
//! );
//! let mut storage = vec![0; FrameAllocator::storage_words(memory.total_frames())];
//! let mut frames = FrameAllocator::init(memory, &image, &mut storage).unwrap();
//!
//! let frame = frames.alloc_frame().unwrap();
//! assert_eq!(frame.base().as_u32(), 0);
//! frames.free_frame(frame);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod bootstrap;
pub mod fault;
pub mod frame_alloc;
pub mod global;
pub mod phys_mapper;
#[cfg(test)]
mod sim;
pub mod vmm;
