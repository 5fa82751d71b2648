use crate::irq::IrqGuard;
use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A lock word plus the data it protects.
///
/// Ordinary kernel code goes through [`lock_irq`](Self::lock_irq) or
/// [`with_lock_irq`](Self::with_lock_irq). Interrupt handlers, which may have
/// preempted a holder, use [`try_lock`](Self::try_lock): spinning there would
/// never end on a single CPU.
pub struct SpinMutex<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: Access to `value` is serialized by `locked`.
unsafe impl<T: Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Whether someone holds the lock right now.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Take the lock, spinning while it is held.
    ///
    /// Interrupts are left as they are; see [`lock_irq`](Self::lock_irq).
    #[inline]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        while !self.acquire() {
            while self.is_locked() {
                spin_loop();
            }
        }
        SpinMutexGuard { mutex: self }
    }

    /// Take the lock only if it is free.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        self.acquire().then_some(SpinMutexGuard { mutex: self })
    }

    /// Runs `f` on the protected value while holding the lock.
    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Disable interrupts, then take the lock.
    ///
    /// Dropping the guard releases the lock first and then restores the
    /// interrupt flag to what it was on entry, so brackets nest.
    #[inline]
    pub fn lock_irq(&self) -> IrqSpinMutexGuard<'_, T> {
        let irq = IrqGuard::new();
        let guard = self.lock();
        IrqSpinMutexGuard { guard, _irq: irq }
    }

    /// Runs `f` on the protected value with interrupts disabled.
    #[inline]
    pub fn with_lock_irq<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut guard = self.lock_irq();
        f(&mut guard)
    }

    fn acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

pub struct SpinMutexGuard<'a, T> {
    mutex: &'a SpinMutex<T>,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard holds the lock.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The guard holds the lock.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
    }
}

/// Guard returned by [`SpinMutex::lock_irq`].
pub struct IrqSpinMutexGuard<'a, T> {
    // Field order is drop order: unlock first, then restore interrupts.
    guard: SpinMutexGuard<'a, T>,
    _irq: IrqGuard,
}

impl<T> Deref for IrqSpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
