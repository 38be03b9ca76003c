//! The reaper: deferred destruction of canceled tasks.
//!
//! A task cannot free its own kernel stack while running on it, so
//! `exit` only marks the task `Canceled`. This dedicated kernel task
//! wakes every `REAPER_PERIOD_TICKS` and destroys whatever has reached
//! the terminal state since the last sweep. Canceled tasks are never
//! rescheduled and their waiters are woken by the tick handler before
//! any sweep can run, so destruction here cannot race a live reference.

use alloc::vec::Vec;

use vesper_abi::task::{REAPER_PERIOD_TICKS, TaskState};
use vesper_lib::services::scheduler;
use vesper_lib::{AtomicSection, klog_debug};

use super::block::task_sleep;
use super::task::{TaskId, task_destroy, with_task_table};

/// Entry point of the reaper task.
pub fn reaper_main(_arg: usize) {
    loop {
        let current = scheduler::running_task_id();
        task_sleep(current, REAPER_PERIOD_TICKS);
        reap_canceled_tasks();
    }
}

/// Destroy every canceled task. Returns how many were reclaimed.
///
/// The sweep snapshots ids under the atomic section and destroys
/// outside the registry lock. The reaper itself is `Running` while
/// sweeping and is skipped by construction as well as by state.
pub fn reap_canceled_tasks() -> usize {
    let canceled: Vec<TaskId> = {
        let _atomic = AtomicSection::enter();
        with_task_table(|table| {
            table
                .tasks
                .iter()
                .filter(|t| t.state == TaskState::Canceled)
                .map(|t| t.id)
                .collect()
        })
    };

    let me = scheduler::running_task_id();
    let mut reaped = 0;
    for task_id in canceled {
        if task_id == me {
            continue;
        }
        task_destroy(task_id);
        reaped += 1;
    }

    if reaped > 0 {
        klog_debug!("reaper reclaimed {} task(s)", reaped);
    }
    reaped
}
