use bitfield_struct::bitfield;

/// Page-fault error code pushed by the CPU (32-bit protected mode).
///
/// Reference: Intel SDM Vol. 3A, §4.7 "Page-Fault Exceptions".
#[bitfield(u32)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32,
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if self.reserved_bit() {
            "Reserved bit set in a paging structure"
        } else if !self.present() {
            if self.user() {
                "User access to a non-present page"
            } else {
                "Kernel access to a non-present page"
            }
        } else if self.instruction_fetch() {
            "Instruction fetch from a protected page"
        } else if self.write() {
            if self.user() {
                "User write to a read-only or supervisor page"
            } else {
                "Kernel write to a read-only page"
            }
        } else {
            "Read access to a protected page"
        }
    }
}
