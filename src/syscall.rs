//! # System Calls
//!
//! Unprivileged task code reaches the kernel through exactly one primitive:
//! [`Port::supervisor_call`], a trap carrying a [`SyscallIdx`] and a pointer
//! to a [`SyscallArgs`] block. [`Syscall`] is the typed façade over that
//! trap; every method issues exactly one supervisor call.
//!
//! ## Argument block
//!
//! | syscall         | `args[0]`  | `args[1]` | `args[2]` | `args[3]` | `args[4]` | value          |
//! |-----------------|------------|-----------|-----------|-----------|-----------|----------------|
//! | `StartOS`       |            |           |           |           |           |                |
//! | `CreateTask`    | entry      | argument  | priority  | name ptr  | name len  | packed task id |
//! | `DestroyTask`   |            |           |           |           |           |                |
//! | `Sleep`         | ticks      |           |           |           |           |                |
//! | `Yield`         |            |           |           |           |           |                |
//! | `RegisterError` | code       |           |           |           |           |                |
//! | `Wait`          | queue      |           |           |           |           |                |
//! | `Notify`        | queue      | mode      |           |           |           | tasks woken    |
//!
//! The kernel writes `status` (0 on success, a [`KernelError`] code
//! otherwise) and `value` before the trap returns.

use crate::arch::Port;
use crate::blockable::WaitQueueId;
use crate::error::KernelError;
use crate::task::{Priority, TaskEntry, TaskId};

/// Number identifying a kernel service. The discriminants are the values
/// carried in R0 across the trap and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallIdx {
    StartOS = 0,
    CreateTask = 1,
    DestroyTask = 2,
    Sleep = 3,
    Yield = 4,
    RegisterError = 5,
    Wait = 6,
    Notify = 7,
}

impl SyscallIdx {
    /// Size of the kernel's handler table.
    pub const COUNT: usize = 8;
}

/// We're using an explicit `TryFrom` impl for `SyscallIdx` instead of
/// pulling in `num-derive`; the table is small and changes rarely.
impl core::convert::TryFrom<u32> for SyscallIdx {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::StartOS),
            1 => Ok(Self::CreateTask),
            2 => Ok(Self::DestroyTask),
            3 => Ok(Self::Sleep),
            4 => Ok(Self::Yield),
            5 => Ok(Self::RegisterError),
            6 => Ok(Self::Wait),
            7 => Ok(Self::Notify),
            _ => Err(()),
        }
    }
}

/// How many waiters a [`Syscall::notify`] releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMode {
    /// The longest-waiting task only.
    One = 0,
    /// Every task on the queue.
    All = 1,
}

impl TryFrom<usize> for NotifyMode {
    type Error = ();

    fn try_from(raw: usize) -> Result<Self, ()> {
        match raw {
            0 => Ok(Self::One),
            1 => Ok(Self::All),
            _ => Err(()),
        }
    }
}

/// Argument and result block shared between the caller and the kernel's
/// dispatcher for the duration of one trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SyscallArgs {
    pub args: [usize; 5],
    pub status: u32,
    pub value: usize,
}

impl SyscallArgs {
    pub const fn new(args: [usize; 5]) -> Self {
        Self {
            args,
            status: 0,
            value: 0,
        }
    }

    #[inline]
    pub fn arg(&self, n: usize) -> usize {
        self.args[n]
    }

    /// Write the outcome of a handler.
    pub fn complete(&mut self, result: Result<usize, KernelError>) {
        match result {
            Ok(value) => {
                self.status = 0;
                self.value = value;
            }
            Err(e) => {
                self.status = e.code();
                self.value = 0;
            }
        }
    }

    /// Decode the outcome written by the kernel. An unknown status code
    /// means the trap never reached a handler.
    pub fn result(&self) -> Result<usize, KernelError> {
        match self.status {
            0 => Ok(self.value),
            code => Err(KernelError::from_code(code).unwrap_or(KernelError::BadSyscall)),
        }
    }
}

/// Typed syscall façade.
///
/// `Syscall` holds the [`Port`] it traps through; firmware builds one over
/// the Cortex-M port, tests build one over a loopback port that hands the
/// block straight to a hosted kernel.
pub struct Syscall<P: Port> {
    port: P,
}

impl<P: Port> Syscall<P> {
    pub const fn new(port: P) -> Self {
        Self { port }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    fn invoke(&self, idx: SyscallIdx, args: [usize; 5]) -> Result<usize, KernelError> {
        let mut block = SyscallArgs::new(args);
        self.port.supervisor_call(idx, &mut block);
        block.result()
    }

    /// Start scheduling. On hardware a successful call never returns to the
    /// caller: the first context switch abandons the boot stack.
    pub fn start_os(&self) -> Result<(), KernelError> {
        self.invoke(SyscallIdx::StartOS, [0; 5]).map(drop)
    }

    /// Create a task that will run `entry(argument)` at `priority`. The
    /// kernel keeps its own copy of `name`.
    pub fn create_task(
        &self,
        entry: TaskEntry,
        argument: usize,
        priority: Priority,
        name: &str,
    ) -> Result<TaskId, KernelError> {
        let args = [
            entry as usize,
            argument,
            priority.index(),
            name.as_ptr() as usize,
            name.len(),
        ];
        self.invoke(SyscallIdx::CreateTask, args).map(TaskId::from_raw)
    }

    /// Terminate the calling task.
    pub fn destroy_task(&self) -> Result<(), KernelError> {
        self.invoke(SyscallIdx::DestroyTask, [0; 5]).map(drop)
    }

    /// Suspend the calling task for `ticks` ticks. Zero yields.
    pub fn sleep(&self, ticks: u32) -> Result<(), KernelError> {
        self.invoke(SyscallIdx::Sleep, [ticks as usize, 0, 0, 0, 0]).map(drop)
    }

    /// Give the CPU to the next ready task of the same priority, if any.
    pub fn yield_now(&self) -> Result<(), KernelError> {
        self.invoke(SyscallIdx::Yield, [0; 5]).map(drop)
    }

    /// Record an application-defined fault code in the kernel error log.
    pub fn register_error(&self, code: u32) -> Result<(), KernelError> {
        self.invoke(SyscallIdx::RegisterError, [code as usize, 0, 0, 0, 0])
            .map(drop)
    }

    /// Block the calling task on `queue` until another context notifies it.
    pub fn wait(&self, queue: WaitQueueId) -> Result<(), KernelError> {
        self.invoke(SyscallIdx::Wait, [queue.index(), 0, 0, 0, 0]).map(drop)
    }

    /// Wake waiters on `queue`. Returns how many tasks were released.
    pub fn notify(&self, queue: WaitQueueId, mode: NotifyMode) -> Result<usize, KernelError> {
        self.invoke(SyscallIdx::Notify, [queue.index(), mode as usize, 0, 0, 0])
    }
}
