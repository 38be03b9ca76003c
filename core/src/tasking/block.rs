//! The blocker protocol: parking a task until a condition holds.
//!
//! A blocker is a predicate plus an optional side-effect hook, carried
//! as a tagged variant. Installation and the first predicate check
//! happen under one atomic bracket, so a condition that is already true
//! resolves on the spot: the task never enters `Blocked` and no wakeup
//! can be lost. Otherwise the scheduler's timer tick drives
//! [`tasking_timer_tick`], which wakes every blocked task whose
//! predicate holds or whose deadline has passed.

use alloc::vec::Vec;

use vesper_abi::task::{BlockResult, TIMEOUT_NEVER, TaskState};
use vesper_lib::AtomicSection;
use vesper_lib::services::{platform, scheduler};

use super::task::{TaskId, TaskTable, with_task_table};
use crate::error::{TaskingError, TaskingResult};

/// What a blocked task is waiting for.
#[derive(Clone, Copy, Debug)]
pub enum BlockerKind {
    /// Wake once the tick counter reaches `wake_tick`.
    Time { wake_tick: u64 },
    /// Wake once `target` has been canceled; the hook captures its
    /// exit value for the waiter.
    Wait { target: TaskId },
}

#[derive(Clone, Copy, Debug)]
pub struct Blocker {
    pub kind: BlockerKind,
    /// Absolute tick at which the block resolves `Timeout`.
    pub deadline: u64,
}

impl Blocker {
    pub const fn time(wake_tick: u64) -> Self {
        Self {
            kind: BlockerKind::Time { wake_tick },
            deadline: TIMEOUT_NEVER,
        }
    }

    pub const fn wait(target: TaskId) -> Self {
        Self {
            kind: BlockerKind::Wait { target },
            deadline: TIMEOUT_NEVER,
        }
    }
}

/// Deadline comparison tolerant of tick-counter wraparound.
#[inline]
fn tick_reached(now: u64, deadline: u64) -> bool {
    now.wrapping_sub(deadline) < (1u64 << 63)
}

/// The blocker predicate. Pure: reads task states, mutates nothing.
fn can_unblock(table: &TaskTable, blocker: &Blocker, now: u64) -> bool {
    match blocker.kind {
        BlockerKind::Time { wake_tick } => tick_reached(now, wake_tick),
        // A target that is no longer registered has exited.
        BlockerKind::Wait { target } => table
            .get(target)
            .is_none_or(|t| t.state == TaskState::Canceled),
    }
}

/// Value the hook stages into the waiter before it resumes, if any.
fn hook_capture(table: &TaskTable, blocker: &Blocker) -> Option<i32> {
    match blocker.kind {
        BlockerKind::Time { .. } => None,
        BlockerKind::Wait { target } => Some(table.get(target).map_or(0, |t| t.exit_value)),
    }
}

/// Park `task_id` on `blocker` until its condition holds or
/// `timeout` ticks elapse (negative: no deadline).
///
/// The task must not already carry a blocker. If the condition is
/// already true the call returns `Unblocked` without yielding.
pub fn task_block(task_id: TaskId, mut blocker: Blocker, timeout: i64) -> BlockResult {
    let now = platform::timer_ticks();

    {
        let _atomic = AtomicSection::enter();
        let blocked = with_task_table(|table| {
            let idx = table.index_of(task_id).expect("block: no such task");
            assert!(
                table.tasks[idx].blocker.is_none(),
                "blocker already installed on task {task_id}"
            );

            if can_unblock(table, &blocker, now) {
                let captured = hook_capture(table, &blocker);
                let task = &mut table.tasks[idx];
                if let Some(exit) = captured {
                    task.wait_exit = exit;
                }
                false
            } else {
                blocker.deadline = if timeout < 0 {
                    TIMEOUT_NEVER
                } else {
                    now.wrapping_add(timeout as u64)
                };
                table.tasks[idx].blocker = Some(blocker);
                table.set_state(idx, TaskState::Blocked);
                true
            }
        });

        if !blocked {
            return BlockResult::Unblocked;
        }
    }

    // Descheduled here. Control returns once the timer tick has
    // resolved the blocker and transitioned the task back to Running.
    scheduler::yield_now();

    with_task_table(|table| {
        table
            .get(task_id)
            .expect("block: task vanished while blocked")
            .block_result
    })
}

/// Evaluate every blocked task's blocker against the current tick and
/// wake the ones that resolved. Called by the scheduler's tick handler.
pub fn tasking_timer_tick(now: u64) {
    struct Wake {
        idx: usize,
        result: BlockResult,
        captured: Option<i32>,
    }

    let _atomic = AtomicSection::enter();
    with_task_table(|table| {
        let mut wakes: Vec<Wake> = Vec::new();

        for idx in 0..table.tasks.len() {
            let task = &table.tasks[idx];
            if task.state != TaskState::Blocked {
                continue;
            }
            let blocker = task.blocker.as_ref().expect("blocked task without blocker");

            if can_unblock(table, blocker, now) {
                wakes.push(Wake {
                    idx,
                    result: BlockResult::Unblocked,
                    captured: hook_capture(table, blocker),
                });
            } else if blocker.deadline != TIMEOUT_NEVER && tick_reached(now, blocker.deadline) {
                wakes.push(Wake {
                    idx,
                    result: BlockResult::Timeout,
                    captured: None,
                });
            }
        }

        for wake in wakes {
            {
                // Hook runs before the blocker is cleared.
                let task = &mut table.tasks[wake.idx];
                if let Some(exit) = wake.captured {
                    task.wait_exit = exit;
                }
                task.blocker = None;
                task.block_result = wake.result;
            }
            table.set_state(wake.idx, TaskState::Running);
        }
    });
}

/// Park `task_id` until `now + ticks` (at least one tick, so a zero
/// sleep still waits for the next tick). Always reports `Timeout`.
pub fn task_sleep(task_id: TaskId, ticks: u64) -> BlockResult {
    let wake_tick = platform::timer_ticks().wrapping_add(ticks.max(1));
    let _ = task_block(task_id, Blocker::time(wake_tick), -1);

    BlockResult::Timeout
}

/// Block the current task until `task_id` has exited, then return its
/// exit value. Fails `NoSuchTask` if the target is not registered.
pub fn task_wait(task_id: TaskId) -> TaskingResult<i32> {
    {
        let _atomic = AtomicSection::enter();
        with_task_table(|table| {
            table
                .index_of(task_id)
                .map(|_| ())
                .ok_or(TaskingError::NoSuchTask)
        })?;
    }

    let current = scheduler::running_task_id();
    let _ = task_block(current, Blocker::wait(task_id), -1);

    Ok(with_task_table(|table| {
        table.get(current).expect("wait: no current task").wait_exit
    }))
}
