//! `#PF` entry stub.

use crate::idt::{Idt, PAGE_FAULT_VECTOR};
use core::arch::naked_asm;
use kernel_registers::LoadRegisterUnsafe;
use kernel_registers::cr2::Cr2;
use kernel_vmem::PageFaultError;

pub trait PageFaultInterrupt {
    /// Install the ring-0 page-fault gate.
    fn init_page_fault_gate(&mut self) -> &mut Self;
}

impl PageFaultInterrupt for Idt {
    fn init_page_fault_gate(&mut self) -> &mut Self {
        self.set_interrupt_gate(PAGE_FAULT_VECTOR, page_fault_entry as usize)
    }
}

/// Interrupt-gate handler: passes the pushed error code on and never returns.
#[unsafe(naked)]
pub extern "C" fn page_fault_entry() {
    naked_asm!(
        "cld",
        // [esp] is the error code; pass a copy as the only argument.
        "push dword ptr [esp]",
        "call {handler}",
        "2: hlt",
        "jmp 2b",
        handler = sym page_fault_handler,
    );
}

extern "C" fn page_fault_handler(code: u32) -> ! {
    // SAFETY: Read at CPL0 before anything could fault again.
    let cr2 = unsafe { Cr2::load_unsafe() };
    kernel_alloc::fault::page_fault(cr2.fault_address(), PageFaultError::from_bits(code))
}
