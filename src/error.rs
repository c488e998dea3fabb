//! # Kernel Errors
//!
//! Every fallible kernel operation reports a [`KernelError`]. Errors cross
//! the privilege boundary as a numeric status code in the syscall argument
//! block, so each variant carries a stable code. Status `0` means success
//! and is never a valid error code.
//!
//! Errors the kernel detects while servicing a syscall are also recorded in
//! the scheduler's [`ErrorLog`], alongside faults tasks report themselves
//! through `RegisterError`.

use core::fmt;

use crate::config::MAX_ERROR_RECORDS;
use crate::task::TaskId;

/// A recoverable error reported by a kernel service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Every TCB slot in the pool is in use.
    PoolExhausted,
    /// The requested priority is outside the discrete priority range.
    InvalidPriority,
    /// A syscall argument failed validation (null entry, bad name, ...).
    InvalidArgument,
    /// The wait queue id does not name one of the kernel's wait queues.
    InvalidWaitQueue,
    /// The trapped syscall number is not part of the syscall table.
    BadSyscall,
    /// `StartOS` was issued after the kernel had already started.
    AlreadyStarted,
    /// The operation needs a running task, but the kernel has not started.
    NotStarted,
    /// The idle task tried to block, sleep or terminate.
    IdleTask,
}

impl KernelError {
    /// Stable status code used on the syscall return path.
    pub const fn code(self) -> u32 {
        match self {
            Self::PoolExhausted => 1,
            Self::InvalidPriority => 2,
            Self::InvalidArgument => 3,
            Self::InvalidWaitQueue => 4,
            Self::BadSyscall => 5,
            Self::AlreadyStarted => 6,
            Self::NotStarted => 7,
            Self::IdleTask => 8,
        }
    }

    /// Decode a status code. Returns `None` for `0` (success) and for codes
    /// this kernel never produces.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::PoolExhausted),
            2 => Some(Self::InvalidPriority),
            3 => Some(Self::InvalidArgument),
            4 => Some(Self::InvalidWaitQueue),
            5 => Some(Self::BadSyscall),
            6 => Some(Self::AlreadyStarted),
            7 => Some(Self::NotStarted),
            8 => Some(Self::IdleTask),
            _ => None,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::PoolExhausted => "task pool exhausted",
            Self::InvalidPriority => "invalid priority",
            Self::InvalidArgument => "invalid syscall argument",
            Self::InvalidWaitQueue => "invalid wait queue",
            Self::BadSyscall => "bad syscall number",
            Self::AlreadyStarted => "kernel already started",
            Self::NotStarted => "kernel not started",
            Self::IdleTask => "operation not permitted on the idle task",
        };
        f.write_str(msg)
    }
}

/// What went wrong, as recorded in the error log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// An error the kernel detected while servicing a request.
    Kernel(KernelError),
    /// An application-defined code passed to `RegisterError`.
    User(u32),
}

/// One entry of the error log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRecord {
    pub fault: Fault,
    /// Task that was running when the fault was recorded, if any.
    pub task: Option<TaskId>,
    /// Scheduler tick at which the fault was recorded.
    pub tick: u64,
}

/// Bounded ring of fault records kept for later inspection (e.g. from a
/// debugger). Recording never fails; the oldest record is overwritten.
pub struct ErrorLog {
    records: [Option<ErrorRecord>; MAX_ERROR_RECORDS],
    next: usize,
    total: u32,
}

impl ErrorLog {
    pub const fn new() -> Self {
        Self {
            records: [None; MAX_ERROR_RECORDS],
            next: 0,
            total: 0,
        }
    }

    pub fn record(&mut self, record: ErrorRecord) {
        self.records[self.next] = Some(record);
        self.next = (self.next + 1) % MAX_ERROR_RECORDS;
        self.total = self.total.saturating_add(1);
    }

    /// Total number of faults recorded since boot, including overwritten ones.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Most recently recorded fault.
    pub fn last(&self) -> Option<&ErrorRecord> {
        let idx = (self.next + MAX_ERROR_RECORDS - 1) % MAX_ERROR_RECORDS;
        self.records[idx].as_ref()
    }

    /// Retained records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ErrorRecord> {
        let (newer, older) = self.records.split_at(self.next);
        older.iter().chain(newer.iter()).flatten()
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}
