//! Current working directory operations.
//!
//! The cwd is a normalized absolute path guarded by a per-task lock.
//! Node lookup goes through the filesystem service; the reference taken
//! while validating a new cwd is held by an RAII guard so every exit
//! path releases it.

use alloc::string::String;

use vesper_lib::path;
use vesper_lib::services::filesystem::{self, FsNodeKind};

use super::task::{TaskId, with_task_table};
use crate::error::{TaskingError, TaskingResult};

/// A referenced filesystem node, released on drop.
struct FsNode {
    handle: u64,
    kind: FsNodeKind,
}

impl FsNode {
    fn find_and_ref(path: &str) -> Option<Self> {
        filesystem::find_and_ref(path).map(|info| Self {
            handle: info.handle,
            kind: info.kind,
        })
    }
}

impl Drop for FsNode {
    fn drop(&mut self) {
        filesystem::node_deref(self.handle);
    }
}

/// Resolve `buffer` against the task's cwd: relative paths are combined
/// with the cwd under its lock, then the result is normalized.
pub fn task_cwd_resolve(task_id: TaskId, buffer: &str) -> TaskingResult<String> {
    with_task_table(|table| {
        let task = table.get(task_id).ok_or(TaskingError::NoSuchTask)?;
        let combined = if path::is_relative(buffer) {
            let cwd = task.cwd.lock();
            path::combine(&cwd, buffer)
        } else {
            String::from(buffer)
        };
        Ok(path::normalize(&combined))
    })
}

/// Change the task's cwd. The target must resolve to a directory; on
/// failure the cwd is untouched and the node reference is released.
pub fn task_set_cwd(task_id: TaskId, buffer: &str) -> TaskingResult {
    let resolved = task_cwd_resolve(task_id, buffer)?;

    let node = FsNode::find_and_ref(&resolved).ok_or(TaskingError::NoSuchFileOrDirectory)?;
    if node.kind != FsNodeKind::Directory {
        return Err(TaskingError::NotADirectory);
    }

    with_task_table(|table| {
        let task = table.get(task_id).ok_or(TaskingError::NoSuchTask)?;
        *task.cwd.lock() = resolved;
        Ok(())
    })
    // `node` drops here, releasing the filesystem reference.
}

pub fn task_get_cwd(task_id: TaskId) -> TaskingResult<String> {
    with_task_table(|table| {
        let task = table.get(task_id).ok_or(TaskingError::NoSuchTask)?;
        let cwd = task.cwd.lock();
        Ok(cwd.clone())
    })
}
