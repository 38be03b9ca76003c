//! Task ABI types: the state machine, block results, context layouts,
//! and tunable constants.
//!
//! # Layout contracts
//!
//! [`InterruptStackFrame`] is `#[repr(C)]` and pushed byte-for-byte onto
//! a new task's kernel stack; the interrupt-return path pops it in the
//! same order. A compile-time assertion pins its size.

// --- Task configuration ---

pub const TASK_STACK_SIZE: u64 = 0x4000; // 16 KiB
pub const TASK_NAME_SIZE: usize = 64;
pub const TASK_HANDLE_COUNT: usize = 64;
pub const TASK_ARGV_MAX: usize = 32;
pub const REAPER_PERIOD_TICKS: u64 = 100;
pub const INVALID_TASK_ID: u32 = u32::MAX;

/// Absolute-tick sentinel for "no deadline".
pub const TIMEOUT_NEVER: u64 = u64::MAX;

/// Entry point of a kernel or user task. The single argument is the
/// value pushed by `task_spawn`.
pub type TaskEntry = fn(usize);

// --- TaskState ---

/// Task lifecycle state with explicit state-machine semantics.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TaskState {
    /// Freshly created, or stripped for destruction. Never scheduled.
    #[default]
    None = 0,
    /// Eligible to run; the scheduler may dispatch it.
    Running = 1,
    /// Parked on a blocker until a condition holds or a deadline passes.
    Blocked = 2,
    /// Idle-task parking state; picked only when nothing else runs.
    Hang = 3,
    /// Terminal. Holds a valid exit value and awaits the reaper.
    Canceled = 4,
}

impl TaskState {
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Blocked,
            3 => Self::Hang,
            4 => Self::Canceled,
            _ => Self::None,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Legal transitions. Cancellation is allowed from any state; the
    /// only way out of `Canceled` is destruction (back to `None`).
    #[inline]
    pub const fn can_transition_to(self, target: Self) -> bool {
        match self {
            Self::None => matches!(target, Self::Running | Self::Canceled),
            Self::Running => matches!(target, Self::Blocked | Self::Hang | Self::Canceled),
            Self::Blocked => matches!(target, Self::Running | Self::Canceled),
            Self::Hang => matches!(target, Self::Canceled),
            Self::Canceled => matches!(target, Self::None | Self::Canceled),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Hang => "hang",
            Self::Canceled => "canceled",
        }
    }
}

// --- BlockResult ---

/// Outcome of a blocking operation, staged by the waker before the
/// blocked task resumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlockResult {
    /// The blocker's condition became true.
    #[default]
    Unblocked,
    /// The deadline elapsed before the condition held.
    Timeout,
    /// The blocked task was canceled while parked.
    Interrupted,
}

// --- Segment selectors ---

pub const KERNEL_CODE_SELECTOR: u64 = 0x08;
pub const KERNEL_DATA_SELECTOR: u64 = 0x10;
pub const USER_CODE_SELECTOR: u64 = 0x23;
pub const USER_DATA_SELECTOR: u64 = 0x1B;

/// RFLAGS with the interrupt flag set.
pub const RFLAGS_IF: u64 = 0x202;

// --- TaskContext ---

/// Architecture register snapshot saved into the task record. Filled by
/// the architecture service's `save_context`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TaskContext {
    pub rip: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rflags: u64,
    pub cs: u64,
    pub ss: u64,
}

impl TaskContext {
    pub const fn zero() -> Self {
        Self {
            rip: 0,
            rsp: 0,
            rbp: 0,
            rflags: 0,
            cs: 0,
            ss: 0,
        }
    }
}

// --- InterruptStackFrame ---

/// The synthetic frame pushed onto a fresh task's stack by `task_go`.
/// Popped by the interrupt-return path on first dispatch.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct InterruptStackFrame {
    pub rflags: u64,
    pub rip: u64,
    pub rbp: u64,
    pub cs: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
}

pub const INTERRUPT_STACK_FRAME_SIZE: usize = 64;

const _: () = assert!(core::mem::size_of::<InterruptStackFrame>() == INTERRUPT_STACK_FRAME_SIZE);

impl InterruptStackFrame {
    /// Frame for a task entered with interrupts enabled at `entry`,
    /// with the frame pointer at the stack top.
    pub const fn new(entry: u64, stack_top: u64, user: bool) -> Self {
        let (code, data) = if user {
            (USER_CODE_SELECTOR, USER_DATA_SELECTOR)
        } else {
            (KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR)
        };
        Self {
            rflags: RFLAGS_IF,
            rip: entry,
            rbp: stack_top,
            cs: code,
            ds: data,
            es: data,
            fs: data,
            gs: data,
        }
    }

    /// Serialize in field order for a stack push.
    pub fn to_bytes(&self) -> [u8; INTERRUPT_STACK_FRAME_SIZE] {
        let mut bytes = [0u8; INTERRUPT_STACK_FRAME_SIZE];
        let words = [
            self.rflags,
            self.rip,
            self.rbp,
            self.cs,
            self.ds,
            self.es,
            self.fs,
            self.gs,
        ];
        let mut i = 0;
        while i < words.len() {
            bytes[i * 8..i * 8 + 8].copy_from_slice(&words[i].to_ne_bytes());
            i += 1;
        }
        bytes
    }
}
