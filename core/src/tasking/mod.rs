//! Task subsystem: lifecycle, blocking, shared memory, and reaping.

pub mod block;
pub mod cwd;
pub mod memory;
pub mod reaper;
pub mod task;

pub use block::{Blocker, BlockerKind, task_block, task_sleep, task_wait, tasking_timer_tick};
pub use cwd::{task_cwd_resolve, task_get_cwd, task_set_cwd};
pub use memory::{
    memory_object_by_id, memory_object_create, memory_object_deref, memory_object_refcount,
    shared_memory_init, task_shared_memory_alloc, task_shared_memory_free,
    task_shared_memory_get_handle, task_shared_memory_include,
};
pub use reaper::{reap_canceled_tasks, reaper_main};
pub use task::{
    FsHandle, TaskId, TaskInfo, register_task_cleanup_hook, task_by_id, task_cancel, task_count,
    task_create, task_destroy, task_dump, task_exit, task_go, task_iterate, task_memory_alloc,
    task_memory_free, task_memory_map, task_panic_dump, task_registry_init, task_set_entry,
    task_set_state, task_spawn, task_spawn_with_argv, task_stack_push, task_switch_pdir,
    task_with_handles,
};

use vesper_abi::task::TaskState;
use vesper_lib::klog_info;
use vesper_lib::services::{platform, scheduler};

/// Ids of the tasks created at boot.
#[derive(Clone, Copy, Debug)]
pub struct BootTasks {
    pub idle: TaskId,
    pub system: TaskId,
    pub reaper: TaskId,
}

fn idle_main(_arg: usize) {
    loop {
        platform::wait_for_interrupt();
    }
}

/// One-shot tasking bring-up. Requires the scheduler, platform, memory,
/// and architecture services to be wired.
///
/// Creates the idle task (parked in `Hang`, picked only when nothing
/// else runs), the first kernel task (the boot context adopts it; it
/// needs no entry point), and the reaper, and introduces them to the
/// scheduler.
pub fn tasking_initialize() -> BootTasks {
    task_registry_init();
    shared_memory_init();

    let idle = task_spawn(None, "Idle", idle_main, 0, false);
    task_go(idle);
    task_set_state(idle, TaskState::Hang);
    scheduler::did_create_idle_task(idle);

    let system = task_create(None, "System", false);
    task_go(system);
    scheduler::did_create_running_task(system);

    let reaper = task_spawn(None, "Reaper", reaper_main, 0, false);
    task_go(reaper);

    klog_info!(
        "tasking online: idle {}, system {}, reaper {}",
        idle,
        system,
        reaper
    );

    BootTasks {
        idle,
        system,
        reaper,
    }
}
