//! # Kernel synchronization primitives
//!
//! The kernel runs on a single CPU; the only concurrency is interrupt
//! handlers preempting ordinary code. The exclusion primitive is therefore
//! the interrupt bracket ([`IrqGuard`]). [`SpinMutex`] adds a lock word on top
//! so that a handler reaching for data its victim holds is caught with
//! [`SpinMutex::try_lock`] instead of corrupting it.
//!
//! ```text
//! lock_irq():  save IF, cli ──► take lock ──► … ──► release lock ──► restore IF
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_mutex;

pub use irq::IrqGuard;
pub use spin_mutex::{IrqSpinMutexGuard, SpinMutex, SpinMutexGuard};
