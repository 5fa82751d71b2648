//! The emulated interrupt flag is process-global, so everything touching it
//! lives in a single test.

use kernel_sync::irq::{IrqGuard, interrupts_enabled};
use kernel_sync::SpinMutex;

#[test]
fn guards_disable_and_restore_interrupts() {
    assert!(interrupts_enabled());

    {
        let _outer = IrqGuard::new();
        assert!(!interrupts_enabled());
        {
            let _inner = IrqGuard::new();
            assert!(!interrupts_enabled());
        }
        // Inner guard saw IF=0 and must not re-enable.
        assert!(!interrupts_enabled());
    }
    assert!(interrupts_enabled());

    let m = SpinMutex::new(7u32);
    {
        let mut v = m.lock_irq();
        assert!(!interrupts_enabled());
        assert!(m.try_lock().is_none());
        *v += 1;
    }
    assert!(interrupts_enabled());
    assert!(!m.is_locked());
    assert_eq!(m.with_lock_irq(|v| *v), 8);
    assert!(interrupts_enabled());

    // A bracket opened inside another leaves IF clear when it closes.
    let outer = SpinMutex::new(());
    outer.with_lock_irq(|()| {
        m.with_lock_irq(|v| *v += 1);
        assert!(!interrupts_enabled());
        assert!(!m.is_locked());
    });
    assert!(interrupts_enabled());

    // Plain `lock` does not touch the flag.
    {
        let _g = m.lock();
        assert!(interrupts_enabled());
        assert!(m.is_locked());
    }
    assert_eq!(m.with_lock(|v| *v), 9);
}
