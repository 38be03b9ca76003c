#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod align;
pub mod atomic;
pub mod klog;
pub mod path;
pub mod service_macro;
pub mod services;
pub mod spinlock;

#[doc(hidden)]
pub use paste;
#[doc(hidden)]
pub use spin;

pub use align::{align_down, align_up};
pub use atomic::{AtomicSection, assert_atomic, atomic_depth};
pub use klog::{KlogLevel, klog_get_level, klog_init, klog_register_backend, klog_set_level};
pub use spinlock::{IrqMutex, IrqMutexGuard};

/// Serializes tests that touch the global atomic-section state.
#[cfg(test)]
pub(crate) fn test_guard() -> std::sync::MutexGuard<'static, ()> {
    static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
