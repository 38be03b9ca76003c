//! Scheduler callbacks consumed by the task core.
//!
//! The scheduler owns dispatch and quantum accounting; the task core
//! only notifies it of creation and state changes, and yields through
//! it. State-change notifications arrive inside the atomic section.

use vesper_abi::task::TaskState;

crate::define_service! {
    scheduler => SchedulerServices {
        did_create_idle_task(task_id: u32);
        did_create_running_task(task_id: u32);
        did_change_task_state(task_id: u32, old: TaskState, new: TaskState);
        /// Deschedule the current task. Returns once it is picked again.
        yield_now();
        /// Id of the task executing on this CPU.
        running_task_id() -> u32;
    }
}
