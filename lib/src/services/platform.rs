//! Platform services: timer, interrupt masking, console.

crate::define_service! {
    platform => PlatformServices {
        /// Monotonic tick count incremented by the timer interrupt.
        timer_ticks() -> u64;
        /// Save the interrupt flag state and mask interrupts.
        irq_save_disable() -> u64;
        /// Restore a state previously returned by `irq_save_disable`.
        irq_restore(flags: u64);
        /// Raw console output, used by the klog fallback.
        console_puts(bytes: &[u8]);
        /// Idle until the next interrupt fires.
        wait_for_interrupt();
    }
}
