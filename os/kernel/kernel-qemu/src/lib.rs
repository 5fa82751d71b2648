//! # QEMU Debug Console Support
//!
//! Logging and raw tracing for a kernel running under QEMU, written to the
//! `debugcon` port `0x402`.
//!
//! ```text
//! log::info!() ── QemuLogger ──┐
//!                              ├── QemuSink (fmt::Write) ── out 0x402 ── host
//! qemu_trace!() ───────────────┘
//! ```
//!
//! Run QEMU with `-debugcon stdio` (or `-debugcon file:debug.log`) to see the
//! output. On real hardware the port is unused and writes are ignored.
//!
//! ## Features
//!
//! * `enabled` (default): port writes are compiled in. Without it every trace
//!   is a no-op.
//!
//! Port I/O is only emitted for bare-metal 32-bit x86 builds; hosted builds
//! (unit tests) discard the bytes.
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.init().expect("logger initialization");
//! info!("Kernel subsystem initialized");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// The port number for QEMU's debug port.
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single character to QEMU's debug port.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        unsafe {
            outb(QEMU_DEBUG_PORT, c);
        }
        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        let _ = c;
    }

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    #[allow(clippy::inline_always)]
    #[inline(always)]
    unsafe fn outb(port: u16, val: u8) {
        unsafe {
            core::arch::asm!(
            "out dx, al",
            in("dx") port,
            in("al") val,
            options(nomem, nostack, preserves_flags)
            );
        }
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best-effort debug output.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(_: fmt::Arguments) {}
}

/// Writes formatted text straight to the debug console, bypassing `log`.
///
/// Usable before the logger is installed and from the panic path.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
