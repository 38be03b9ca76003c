//! The global atomic section.
//!
//! A nestable interrupts-disabled bracket serializing all mutation of
//! shared kernel structures on this single-CPU kernel. Interrupts are
//! masked through the platform service on the outermost enter and
//! restored on the outermost exit; before the platform is wired only
//! the nesting count is maintained.
//!
//! Must never be held across a scheduler yield.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::services::platform;

static DEPTH: AtomicU32 = AtomicU32::new(0);
static SAVED_FLAGS: AtomicU64 = AtomicU64::new(0);

/// RAII guard for the atomic section. Guards nest; interrupts are
/// restored only when the outermost guard drops.
#[must_use = "if unused, the atomic section ends immediately"]
pub struct AtomicSection {
    // Pinned to the current CPU context.
    _not_send: PhantomData<*mut ()>,
}

impl AtomicSection {
    #[inline]
    pub fn enter() -> Self {
        if DEPTH.fetch_add(1, Ordering::Acquire) == 0 {
            let flags = if platform::platform_services_wired() {
                platform::irq_save_disable()
            } else {
                0
            };
            SAVED_FLAGS.store(flags, Ordering::Relaxed);
        }
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for AtomicSection {
    #[inline]
    fn drop(&mut self) {
        let prev = DEPTH.fetch_sub(1, Ordering::Release);
        assert!(prev > 0, "atomic section underflow");
        if prev == 1 && platform::platform_services_wired() {
            platform::irq_restore(SAVED_FLAGS.load(Ordering::Relaxed));
        }
    }
}

/// Current nesting depth. Zero means interrupts are live.
#[inline]
pub fn atomic_depth() -> u32 {
    DEPTH.load(Ordering::Relaxed)
}

/// Asserts the caller runs inside the atomic section.
#[inline]
pub fn assert_atomic() {
    assert!(atomic_depth() > 0, "expected to run inside the atomic section");
}
