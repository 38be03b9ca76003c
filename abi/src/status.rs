//! Status codes surfaced at the syscall boundary.
//!
//! Callers receive one of these integer values and must not inspect any
//! other channel for failure. `Timeout` is a normal result, not an
//! error.

use core::fmt;

#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Success = 0,
    Timeout = 1,
    NoSuchTask = 2,
    NoSuchFileOrDirectory = 3,
    NotADirectory = 4,
    BadAddress = 5,
}

impl Status {
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timed out"),
            Self::NoSuchTask => write!(f, "no such task"),
            Self::NoSuchFileOrDirectory => write!(f, "no such file or directory"),
            Self::NotADirectory => write!(f, "not a directory"),
            Self::BadAddress => write!(f, "bad address"),
        }
    }
}
