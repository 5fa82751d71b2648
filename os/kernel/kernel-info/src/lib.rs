//! # Kernel Configuration and Boot Interface
//!
//! Memory layout constants and the boot-time data contracts shared by the
//! frame allocator, the paging code and the kernel binary.
//!
//! ## Memory Layout ([`memory`])
//!
//! The kernel is linked at `0xC010_0000` and loaded at physical `0x0010_0000`.
//! Until paging is enabled, the boot code runs with segment bases of
//! `0x4000_0000`, so a high-half virtual address wraps around to its physical
//! address:
//!
//! ```text
//! Linear address phases:
//!
//!   boot          linear == physical (multiboot, flat segments)
//!   early         virt + 0x4000_0000 == physical (temporary GDT)
//!   paged         virt -> page tables -> physical (flat GDT)
//!
//! Virtual layout once paged:
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  unmapped (null guard) / user   │
//! 0xC000_0000 ├─────────────────────────────────┤ KERNEL_VIRT_OFFSET
//!             │  kernel image + frame maps      │
//!             │  kernel heap, device windows    │
//! 0xFFC0_0000 ├─────────────────────────────────┤ PTE_WINDOW
//!             │  page tables (recursive slot)   │
//! 0xFFFF_F000 ├─────────────────────────────────┤ PDE_WINDOW
//!             │  page directory                 │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Boot Information ([`boot`])
//!
//! The multiboot information block, the memory size it reports, and the kernel
//! image description produced from linker symbols.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
