//! Architecture services consumed by the task core.

use vesper_abi::task::TaskContext;

crate::define_service! {
    arch => ArchServices {
        /// Snapshot the current register state into a task record.
        save_context(context: &mut TaskContext);
    }
}
