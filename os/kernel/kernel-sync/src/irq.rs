//! The interrupt flag (`EFLAGS.IF`) and the guard that brackets code
//! with it cleared.
//!
//! Hosted builds emulate the flag with a process-wide atomic so brackets can
//! be observed in tests.

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod arch {
    #[inline]
    pub fn interrupts_enabled() -> bool {
        let flags: u32;
        unsafe {
            core::arch::asm!("pushfd", "pop {}", out(reg) flags, options(nomem, preserves_flags));
        }
        flags & (1 << 9) != 0
    }

    #[inline]
    pub fn disable() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack)) }
    }

    #[inline]
    pub fn enable() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod arch {
    use core::sync::atomic::{AtomicBool, Ordering};

    static INTERRUPT_FLAG: AtomicBool = AtomicBool::new(true);

    #[inline]
    pub fn interrupts_enabled() -> bool {
        INTERRUPT_FLAG.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn disable() {
        INTERRUPT_FLAG.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn enable() {
        INTERRUPT_FLAG.store(true, Ordering::SeqCst);
    }
}

/// Whether maskable interrupts are currently enabled (`EFLAGS.IF`).
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    arch::interrupts_enabled()
}

/// Disables hardware interrupts (`cli`).
///
/// # Privilege
///
/// Must only be called in contexts where `cli` is permitted (ring 0).
#[inline]
pub fn cli_stop_interrupts() {
    arch::disable();
}

/// Enables hardware interrupts (`sti`).
///
/// # Privilege
///
/// Must only be called in contexts where `sti` is permitted. Typically used
/// to restore a previously disabled interrupt state.
#[inline]
pub fn sti_enable_interrupts() {
    arch::enable();
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the `IF` bit (bit 9 of `EFLAGS`). If interrupts
/// were enabled, it executes `cli`. On drop, it executes `sti` **only** if
/// they were previously enabled, so guards nest.
///
/// # Examples
///
/// ```no_run
/// use kernel_sync::irq::{IrqGuard, interrupts_enabled};
///
/// let before = interrupts_enabled();
/// {
///     let _g = IrqGuard::new(); // interrupts disabled here
///     assert!(!interrupts_enabled());
/// }
/// assert_eq!(interrupts_enabled(), before);
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            cli_stop_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Drop for IrqGuard {
    /// Restores interrupts (`sti`) only if they were previously enabled.
    fn drop(&mut self) {
        if self.were_enabled {
            sti_enable_interrupts();
        }
    }
}
