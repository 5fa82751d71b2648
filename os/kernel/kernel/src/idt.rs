//! # Interrupt Descriptor Table (IDT)
//!
//! 256 eight-byte gates, loaded once via `lidt`. Only the page-fault vector
//! is populated; every other vector stays not-present, so an unexpected
//! interrupt escalates to a triple fault instead of running garbage.
//!
//! The table is installed after paging is enabled: the handler addresses are
//! high-half addresses that only resolve with flat segments.

use crate::gdt::KERNEL_CS;
use bitfield_struct::bitfield;
use core::mem::MaybeUninit;
use core::ops::{Index, IndexMut};

pub const PAGE_FAULT_VECTOR: usize = 0x0E;

/// 32-bit interrupt gate (clears `IF` on entry).
pub const INTERRUPT_GATE_32: u8 = 0xE;

#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Gate {
    pub offset_lo: u16, // [15:0]
    pub selector: u16,  // [31:16]
    #[bits(8)]
    __: u8, // [39:32] reserved
    #[bits(4)]
    pub typ: u8, // [43:40]
    pub s: bool,        // [44] = 0 (system)
    #[bits(2)]
    pub dpl: u8, // [46:45]
    pub p: bool,        // [47]
    pub offset_hi: u16, // [63:48]
}

impl Gate {
    /// Point the gate at `handler` in the kernel code segment.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_handler_addr(&mut self, handler: usize) -> &mut Self {
        let addr = handler as u32;
        self.set_offset_lo(addr as u16);
        self.set_offset_hi((addr >> 16) as u16);
        self.set_selector(KERNEL_CS);
        self
    }

    pub fn gate_type(&mut self, typ: u8) -> &mut Self {
        self.set_typ(typ);
        self
    }

    pub fn present(&mut self, present: bool) -> &mut Self {
        self.set_p(present);
        self
    }

    #[must_use]
    pub const fn handler_addr(self) -> u32 {
        self.offset_lo() as u32 | (self.offset_hi() as u32) << 16
    }
}

#[repr(C, align(8))]
pub struct Idt {
    gates: [Gate; 256],
}

impl Idt {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            gates: [Gate::new(); 256],
        }
    }

    /// Install a ring-0 interrupt gate for `vector`.
    pub fn set_interrupt_gate(&mut self, vector: usize, handler: usize) -> &mut Self {
        self[vector]
            .set_handler_addr(handler)
            .gate_type(INTERRUPT_GATE_32)
            .present(true);
        self
    }

    /// Load the IDTR with this table.
    ///
    /// # Safety
    /// The table must stay at this address for as long as it is loaded.
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    pub unsafe fn load(&'static self) {
        use crate::gdt::DescTablePtr;
        use kernel_memory_addresses::VirtualAddress;

        #[allow(clippy::cast_possible_truncation)]
        let ptr = DescTablePtr {
            limit: (size_of::<Self>() - 1) as u16,
            base: VirtualAddress::from_ptr(self).as_u32(),
        };
        unsafe {
            core::arch::asm!("lidt [{}]", in(reg) &raw const ptr, options(readonly, nostack, preserves_flags));
        }
    }
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for Idt {
    type Output = Gate;

    fn index(&self, index: usize) -> &Self::Output {
        &self.gates[index]
    }
}

impl IndexMut<usize> for Idt {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.gates[index]
    }
}

/// The global interrupt descriptor table.
static mut IDT: MaybeUninit<Idt> = MaybeUninit::uninit();

/// Store `idt` in the global table and load it.
///
/// # Safety
/// Must be called once, with interrupts disabled, after flat segments are in
/// place.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub unsafe fn init_idt_once(idt: Idt) {
    #[allow(static_mut_refs)]
    unsafe {
        IDT.write(idt);
        IDT.assume_init_ref().load();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_fault_gate_encoding() {
        let mut idt = Idt::new();
        idt.set_interrupt_gate(PAGE_FAULT_VECTOR, 0xC010_2345);

        let gate = idt[PAGE_FAULT_VECTOR];
        assert_eq!(gate.into_bits(), 0xC010_8E00_0008_2345);
        assert_eq!(gate.handler_addr(), 0xC010_2345);
        assert!(!idt[PAGE_FAULT_VECTOR + 1].p());
    }

    #[test]
    fn layout() {
        assert_eq!(size_of::<Gate>(), 8);
        assert_eq!(size_of::<Idt>(), 256 * 8);
    }
}
