//! Error type for task-core operations.
//!
//! Covers the recoverable lookup failures; precondition misuse asserts
//! instead of returning, and timeouts are ordinary [`BlockResult`]
//! values rather than errors.
//!
//! [`BlockResult`]: vesper_abi::task::BlockResult

use core::fmt;

use vesper_abi::status::Status;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskingError {
    NoSuchTask,
    NoSuchFileOrDirectory,
    NotADirectory,
    BadAddress,
}

impl TaskingError {
    #[inline]
    pub const fn status(self) -> Status {
        match self {
            Self::NoSuchTask => Status::NoSuchTask,
            Self::NoSuchFileOrDirectory => Status::NoSuchFileOrDirectory,
            Self::NotADirectory => Status::NotADirectory,
            Self::BadAddress => Status::BadAddress,
        }
    }
}

impl fmt::Display for TaskingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status())
    }
}

impl From<TaskingError> for Status {
    fn from(err: TaskingError) -> Status {
        err.status()
    }
}

pub type TaskingResult<T = ()> = Result<T, TaskingError>;

/// Collapse an operation's outcome to its syscall status code.
pub fn status_of<T>(result: &TaskingResult<T>) -> Status {
    match result {
        Ok(_) => Status::Success,
        Err(err) => err.status(),
    }
}
