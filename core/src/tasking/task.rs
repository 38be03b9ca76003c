//! The task record, the task registry, and the lifecycle operations.
//!
//! All tasks live in a single registry guarded by an [`IrqMutex`];
//! state transitions happen under the global atomic section and are
//! reported to the scheduler service. Task ids are assigned from a
//! monotonic counter and never reused for the registry's lifetime.

use alloc::string::String;
use alloc::vec::Vec;

use spin::Once;

use vesper_abi::addr::{VirtAddr, VirtRange};
use vesper_abi::mem::{MemoryFlags, PageDir};
use vesper_abi::task::{
    BlockResult, INVALID_TASK_ID, InterruptStackFrame, TASK_HANDLE_COUNT, TASK_NAME_SIZE,
    TASK_STACK_SIZE, TaskContext, TaskEntry, TaskState,
};
use vesper_lib::services::{arch, filesystem, memory, scheduler};
use vesper_lib::{AtomicSection, IrqMutex, klog_debug, klog_info};

use super::block::Blocker;
use super::memory::MemoryMapping;
use crate::error::{TaskingError, TaskingResult};

pub type TaskId = u32;

/// An opaque open-file record owned by the filesystem layer. The task
/// core only stores and eventually closes it.
pub type FsHandle = u64;

// =============================================================================
// Task
// =============================================================================

pub(super) struct Task {
    pub(super) id: TaskId,
    name: [u8; TASK_NAME_SIZE],
    pub(super) state: TaskState,
    pub(super) pdir: PageDir,
    pub(super) stack_base: VirtAddr,
    pub(super) stack_pointer: VirtAddr,
    pub(super) entry: Option<TaskEntry>,
    pub(super) user: bool,
    /// Present iff `state == Blocked`.
    pub(super) blocker: Option<Blocker>,
    /// Written by the waker before the blocked task resumes.
    pub(super) block_result: BlockResult,
    /// Exit value captured by a Wait blocker's hook.
    pub(super) wait_exit: i32,
    pub(super) exit_value: i32,
    pub(super) context: TaskContext,
    pub(super) cwd: IrqMutex<String>,
    handles: IrqMutex<[Option<FsHandle>; TASK_HANDLE_COUNT]>,
    pub(super) memory_mappings: Vec<MemoryMapping>,
}

impl Task {
    pub(super) fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(TASK_NAME_SIZE);
        core::str::from_utf8(&self.name[..end]).unwrap_or("?")
    }

    fn stack_top(&self) -> VirtAddr {
        self.stack_base.offset(TASK_STACK_SIZE)
    }
}

/// A snapshot of a task's public state, taken under the registry lock.
#[derive(Clone, Copy, Debug)]
pub struct TaskInfo {
    pub id: TaskId,
    pub state: TaskState,
    pub user: bool,
    pub pdir: PageDir,
    pub stack_base: VirtAddr,
    pub stack_pointer: VirtAddr,
    pub exit_value: i32,
    pub has_blocker: bool,
    name: [u8; TASK_NAME_SIZE],
}

impl TaskInfo {
    fn of(task: &Task) -> Self {
        Self {
            id: task.id,
            state: task.state,
            user: task.user,
            pdir: task.pdir,
            stack_base: task.stack_base,
            stack_pointer: task.stack_pointer,
            exit_value: task.exit_value,
            has_blocker: task.blocker.is_some(),
            name: task.name,
        }
    }

    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(TASK_NAME_SIZE);
        core::str::from_utf8(&self.name[..end]).unwrap_or("?")
    }
}

// =============================================================================
// Registry
// =============================================================================

pub(super) struct TaskTable {
    pub(super) tasks: Vec<Task>,
    next_task_id: TaskId,
}

impl TaskTable {
    const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            next_task_id: 0,
        }
    }

    pub(super) fn index_of(&self, task_id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == task_id)
    }

    pub(super) fn get(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub(super) fn get_mut(&mut self, task_id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// Transition the task at `idx`, notifying the scheduler. Illegal
    /// transitions are programming bugs.
    pub(super) fn set_state(&mut self, idx: usize, new: TaskState) {
        vesper_lib::assert_atomic();
        let task = &mut self.tasks[idx];
        let old = task.state;
        assert!(
            old.can_transition_to(new),
            "illegal task state transition {} -> {} for task {}",
            old.as_str(),
            new.as_str(),
            task.id
        );
        scheduler::did_change_task_state(task.id, old, new);
        task.state = new;
    }
}

static TASK_TABLE: IrqMutex<TaskTable> = IrqMutex::new(TaskTable::new());

#[inline]
pub(super) fn with_task_table<R>(f: impl FnOnce(&mut TaskTable) -> R) -> R {
    f(&mut TASK_TABLE.lock())
}

/// Reset the registry. Called once from `tasking_initialize`.
pub fn task_registry_init() {
    let mut table = TASK_TABLE.lock();
    table.tasks.clear();
    table.next_task_id = 0;
}

// =============================================================================
// Teardown hook
// =============================================================================

static CLEANUP_HOOK: Once<fn(TaskId)> = Once::new();

/// Register a hook invoked with the task id during `task_destroy`, so
/// sibling subsystems can release per-task state.
pub fn register_task_cleanup_hook(hook: fn(TaskId)) {
    CLEANUP_HOOK.call_once(|| hook);
}

fn run_cleanup_hook(task_id: TaskId) {
    if let Some(hook) = CLEANUP_HOOK.get() {
        hook(task_id);
    }
}

// =============================================================================
// Creation
// =============================================================================

fn copy_name(name: &str) -> [u8; TASK_NAME_SIZE] {
    let mut out = [0u8; TASK_NAME_SIZE];
    let bytes = name.as_bytes();
    let len = bytes.len().min(TASK_NAME_SIZE - 1);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Allocate a task in state `None`: page directory (fresh for user
/// tasks, the shared kernel directory otherwise), kernel stack inside
/// it, cwd cloned from the parent, zeroed handle table, initial
/// context. The new task is registered but not yet schedulable.
pub fn task_create(parent: Option<TaskId>, name: &str, user: bool) -> TaskId {
    let _atomic = AtomicSection::enter();

    let pdir = if user {
        memory::pdir_create()
    } else {
        memory::kpdir()
    };

    let stack_base = memory::alloc(pdir, TASK_STACK_SIZE as usize, MemoryFlags::CLEAR);

    with_task_table(|table| {
        let id = table.next_task_id;
        table.next_task_id += 1;

        let cwd = parent
            .and_then(|p| table.get(p))
            .map(|p| p.cwd.lock().clone())
            .unwrap_or_else(|| String::from("/"));

        let mut task = Task {
            id,
            name: copy_name(name),
            state: TaskState::None,
            pdir,
            stack_base,
            stack_pointer: stack_base.offset(TASK_STACK_SIZE),
            entry: None,
            user,
            blocker: None,
            block_result: BlockResult::Unblocked,
            wait_exit: 0,
            exit_value: 0,
            context: TaskContext::zero(),
            cwd: IrqMutex::new(cwd),
            handles: IrqMutex::new([None; TASK_HANDLE_COUNT]),
            memory_mappings: Vec::new(),
        };

        arch::save_context(&mut task.context);

        table.tasks.push(task);

        klog_debug!("created task '{}' with id {}", name, id);

        id
    })
}

pub fn task_set_entry(task_id: TaskId, entry: TaskEntry, user: bool) {
    with_task_table(|table| {
        let task = table.get_mut(task_id).expect("set_entry: no such task");
        task.entry = Some(entry);
        task.user = user;
    });
}

/// Push raw bytes onto the task's kernel stack, descending. Returns the
/// new stack pointer, which is the base of the pushed value.
pub fn task_stack_push(task_id: TaskId, bytes: &[u8]) -> VirtAddr {
    with_task_table(|table| {
        let task = table.get_mut(task_id).expect("stack_push: no such task");
        task.stack_pointer = VirtAddr::new(task.stack_pointer.as_u64() - bytes.len() as u64);
        memory::write(task.pdir, task.stack_pointer, bytes);
        task.stack_pointer
    })
}

/// Create a task and arm it with an entry point and a single argument.
/// The result is ready for [`task_go`].
pub fn task_spawn(parent: Option<TaskId>, name: &str, entry: TaskEntry, arg: usize, user: bool) -> TaskId {
    let _atomic = AtomicSection::enter();

    let id = task_create(parent, name, user);
    task_set_entry(id, entry, user);
    task_stack_push(id, &(arg as u64).to_ne_bytes());

    id
}

/// Like [`task_spawn`], but marshals an argv array onto the stack:
/// each string is copied NUL-terminated, a pointer array of
/// `TASK_ARGV_MAX` slots follows, then the argv pointer and argc.
/// Arguments beyond the cap are truncated.
pub fn task_spawn_with_argv(
    parent: Option<TaskId>,
    name: &str,
    entry: TaskEntry,
    argv: &[&str],
    user: bool,
) -> TaskId {
    use vesper_abi::task::TASK_ARGV_MAX;

    let _atomic = AtomicSection::enter();

    let id = task_create(parent, name, user);
    task_set_entry(id, entry, true);

    let mut argv_list = [0u64; TASK_ARGV_MAX];
    let argc = argv.len().min(TASK_ARGV_MAX);

    for (i, arg) in argv.iter().take(argc).enumerate() {
        let mut bytes = Vec::with_capacity(arg.len() + 1);
        bytes.extend_from_slice(arg.as_bytes());
        bytes.push(0);
        argv_list[i] = task_stack_push(id, &bytes).as_u64();
    }

    let mut list_bytes = [0u8; TASK_ARGV_MAX * 8];
    for (i, ptr) in argv_list.iter().enumerate() {
        list_bytes[i * 8..i * 8 + 8].copy_from_slice(&ptr.to_ne_bytes());
    }
    let argv_ref = task_stack_push(id, &list_bytes);

    task_stack_push(id, &argv_ref.as_u64().to_ne_bytes());
    task_stack_push(id, &(argc as u64).to_ne_bytes());

    id
}

/// Make a `None`-state task schedulable: synthesize the interrupt
/// return frame on its stack and transition it to `Running`. The
/// scheduler may dispatch it on its next pick.
pub fn task_go(task_id: TaskId) {
    let _atomic = AtomicSection::enter();

    let frame = with_task_table(|table| {
        let task = table.get(task_id).expect("go: no such task");
        let entry = task.entry.map_or(0, |e| e as usize as u64);
        InterruptStackFrame::new(entry, task.stack_top().as_u64(), task.user)
    });

    task_stack_push(task_id, &frame.to_bytes());

    with_task_table(|table| {
        let idx = table.index_of(task_id).expect("go: no such task");
        table.set_state(idx, TaskState::Running);
    });
}

// =============================================================================
// State and lookup
// =============================================================================

pub fn task_set_state(task_id: TaskId, state: TaskState) {
    let _atomic = AtomicSection::enter();
    with_task_table(|table| {
        let idx = table.index_of(task_id).expect("set_state: no such task");
        table.set_state(idx, state);
    });
}

pub fn task_by_id(task_id: TaskId) -> Option<TaskInfo> {
    with_task_table(|table| table.get(task_id).map(TaskInfo::of))
}

pub fn task_count() -> usize {
    with_task_table(|table| table.tasks.len())
}

/// Invoke `callback` for every registered task, inside the atomic
/// section. The callback may destroy the task it is handed.
pub fn task_iterate(mut callback: impl FnMut(TaskInfo)) {
    let _atomic = AtomicSection::enter();
    let infos: Vec<TaskInfo> =
        with_task_table(|table| table.tasks.iter().map(TaskInfo::of).collect());
    for info in infos {
        callback(info);
    }
}

// =============================================================================
// Cancellation and destruction
// =============================================================================

/// Record `exit_value` and force the task to `Canceled`, whatever its
/// prior state. A blocker installed on the task resolves `Interrupted`.
/// Tasks waiting on this one are woken by the next scheduler tick.
pub fn task_cancel(task_id: TaskId, exit_value: i32) -> TaskingResult {
    let _atomic = AtomicSection::enter();
    with_task_table(|table| {
        let idx = table.index_of(task_id).ok_or(TaskingError::NoSuchTask)?;

        {
            let task = &mut table.tasks[idx];
            task.exit_value = exit_value;
            if task.blocker.take().is_some() {
                task.block_result = BlockResult::Interrupted;
            }
        }

        if table.tasks[idx].state != TaskState::Canceled {
            table.set_state(idx, TaskState::Canceled);
        }

        klog_info!("canceled task {} with exit value {}", task_id, exit_value);
        Ok(())
    })
}

/// Cancel the current task and yield away for good. The scheduler
/// never picks a `Canceled` task, so this does not return; the record
/// is reclaimed later by the reaper.
pub fn task_exit(exit_value: i32) -> ! {
    let current = scheduler::running_task_id();
    let _ = task_cancel(current, exit_value);

    loop {
        scheduler::yield_now();
    }
}

/// Tear a task down and release everything it owns. Only legal for
/// `Canceled` or `None` tasks on which nothing waits anymore, which is
/// what the reaper guarantees.
pub fn task_destroy(task_id: TaskId) {
    let mut task = {
        let _atomic = AtomicSection::enter();
        with_task_table(|table| {
            let idx = table.index_of(task_id).expect("destroy: no such task");
            let state = table.tasks[idx].state;
            assert!(
                matches!(state, TaskState::Canceled | TaskState::None),
                "destroy of live task {} in state {}",
                task_id,
                state.as_str()
            );
            if state != TaskState::None {
                table.set_state(idx, TaskState::None);
            }
            table.tasks.remove(idx)
        })
    };

    run_cleanup_hook(task_id);

    super::memory::destroy_all_mappings(&mut task);

    {
        let mut handles = task.handles.lock();
        for slot in handles.iter_mut() {
            if let Some(handle) = slot.take() {
                filesystem::handle_close(handle);
            }
        }
    }

    memory::free(
        task.pdir,
        VirtRange::new(task.stack_base, TASK_STACK_SIZE as usize),
    );

    if task.pdir != memory::kpdir() {
        memory::pdir_destroy(task.pdir);
    }

    klog_debug!("destroyed task {} '{}'", task_id, task.name());
}

// =============================================================================
// Task memory management
// =============================================================================

/// Swap the task's page directory, activating the new one. Returns the
/// previous directory.
pub fn task_switch_pdir(task_id: TaskId, pdir: PageDir) -> TaskingResult<PageDir> {
    let old = with_task_table(|table| {
        let task = table.get_mut(task_id).ok_or(TaskingError::NoSuchTask)?;
        Ok(core::mem::replace(&mut task.pdir, pdir))
    })?;
    memory::pdir_switch(pdir);
    Ok(old)
}

pub fn task_memory_map(task_id: TaskId, range: VirtRange) -> TaskingResult {
    let pdir = task_pdir(task_id)?;
    memory::map(pdir, range, MemoryFlags::USER | MemoryFlags::CLEAR);
    Ok(())
}

pub fn task_memory_alloc(task_id: TaskId, size: usize) -> TaskingResult<VirtAddr> {
    let pdir = task_pdir(task_id)?;
    Ok(memory::alloc(pdir, size, MemoryFlags::USER | MemoryFlags::CLEAR))
}

pub fn task_memory_free(task_id: TaskId, range: VirtRange) -> TaskingResult {
    let pdir = task_pdir(task_id)?;
    memory::free(pdir, range);
    Ok(())
}

fn task_pdir(task_id: TaskId) -> TaskingResult<PageDir> {
    with_task_table(|table| {
        table
            .get(task_id)
            .map(|t| t.pdir)
            .ok_or(TaskingError::NoSuchTask)
    })
}

// =============================================================================
// Handle table
// =============================================================================

/// Run `f` against the task's handle table under its lock. The table's
/// contents are owned by the filesystem layer; the core only guards
/// the slots and closes leftovers on teardown.
pub fn task_with_handles<R>(
    task_id: TaskId,
    f: impl FnOnce(&mut [Option<FsHandle>; TASK_HANDLE_COUNT]) -> R,
) -> TaskingResult<R> {
    with_task_table(|table| {
        let task = table.get(task_id).ok_or(TaskingError::NoSuchTask)?;
        let mut handles = task.handles.lock();
        Ok(f(&mut handles))
    })
}

// =============================================================================
// Diagnostics
// =============================================================================

pub fn task_dump(task_id: TaskId) {
    let Some(info) = task_by_id(task_id) else {
        return;
    };
    klog_info!("task {} '{}'", info.id, info.name());
    klog_info!("  state: {}", info.state.as_str());
    if memory::memory_services_wired() && info.pdir == memory::kpdir() {
        klog_info!("  page directory: {:#x} (kpdir)", info.pdir.0);
    } else {
        klog_info!("  page directory: {:#x}", info.pdir.0);
    }
    klog_info!("  stack: {} sp {}", info.stack_base, info.stack_pointer);
}

pub fn task_panic_dump() {
    if !scheduler::scheduler_services_wired() {
        return;
    }
    let current = scheduler::running_task_id();
    if current == INVALID_TASK_ID {
        return;
    }
    klog_info!("running task {}", current);
    task_dump(current);
}
