//! # Task Control Block
//!
//! Defines the task model for Popcorn. Each task has a fixed priority
//! level, a state in the scheduler's state machine, an inline stack, and
//! two embedded list links: one for the ready queue or sleep set, one (the
//! [`Blockable`]) for wait queues.
//!
//! TCBs live in a fixed array owned by the scheduler. Nothing here
//! allocates.

use core::fmt;

use crate::blockable::Blockable;
use crate::config::{MAX_TASK_NAME_LEN, STACK_SIZE};
use crate::error::KernelError;
use crate::list::{Adapter, Link};

// ---------------------------------------------------------------------------
// Priority levels
// ---------------------------------------------------------------------------

/// Discrete scheduling priority. `Level0` is the most important; a ready
/// task always preempts a running task of a strictly lower level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Level0 = 0,
    Level1 = 1,
    Level2 = 2,
    Level3 = 3,
}

impl Priority {
    /// Number of priority levels (and of ready queues).
    pub const COUNT: usize = 4;

    /// Levels from highest to lowest.
    pub const ALL: [Priority; Self::COUNT] =
        [Priority::Level0, Priority::Level1, Priority::Level2, Priority::Level3];

    pub const LOWEST: Priority = Priority::Level3;

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<usize> for Priority {
    type Error = ();

    fn try_from(raw: usize) -> Result<Self, ()> {
        Self::ALL.get(raw).copied().ok_or(())
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task in the scheduler's state machine.
///
/// ```text
///              schedule()
///   ┌───────┐ ───────────► ┌─────────┐  destroy   ┌────────────┐
///   │ Ready │              │ Running │ ─────────► │ Terminated │
///   └───────┘ ◄─────────── └─────────┘            └────────────┘
///     ▲  ▲    yield/preempt   │     │
///     │  │          wait()    │     │ sleep()
///     │  │     ┌─────────┐ ◄──┘     ▼
///     │  └──── │ Blocked │      ┌──────────┐
///     │  wake  └─────────┘      │ Sleeping │
///     └──────────────────────── └──────────┘
///                 expiry
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued in the ready queue of its priority.
    Ready,
    /// Currently executing on the CPU.
    Running,
    /// Queued on a wait queue until a waker releases it.
    Blocked,
    /// In the sleep set until its tick count reaches zero.
    Sleeping,
    /// Will never run again. Absorbing.
    Terminated,
}

// ---------------------------------------------------------------------------
// Task identity
// ---------------------------------------------------------------------------

/// Identity of a task: its slot in the TCB pool plus the slot's
/// generation. A slot's generation changes every time it is reclaimed, so
/// an id held after `DestroyTask` never names the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub index: u8,
    pub generation: u8,
}

impl TaskId {
    /// Pack into a single syscall return word.
    #[inline]
    pub const fn to_raw(self) -> usize {
        ((self.generation as usize) << 8) | self.index as usize
    }

    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self {
            index: raw as u8,
            generation: (raw >> 8) as u8,
        }
    }
}

/// Signature of a task entry point. The argument is passed in R0.
/// Returning from the entry function terminates the task.
pub type TaskEntry = extern "C" fn(usize);

// ---------------------------------------------------------------------------
// Stack
// ---------------------------------------------------------------------------

/// Number of 32-bit words in a task stack.
pub const STACK_WORDS: usize = STACK_SIZE / 4;

/// Words in the initial frame: 8 software-saved (R4–R11) + 8 hardware
/// stacked (R0–R3, R12, LR, PC, xPSR).
pub const FRAME_WORDS: usize = 16;

/// xPSR with only the Thumb bit set.
const INITIAL_XPSR: u32 = 0x0100_0000;

/// Per-task stack memory, aligned to 8 bytes as required by the AAPCS.
#[repr(C, align(8))]
pub struct Stack {
    words: [u32; STACK_WORDS],
}

impl Stack {
    pub const EMPTY: Self = Self { words: [0; STACK_WORDS] };

    /// Build the frame the first context switch into this task unstacks.
    ///
    /// ## Stack Layout (top = high address, growing down)
    ///
    /// ```text
    /// [Hardware stacked frame]
    ///   xPSR  (Thumb bit set)
    ///   PC    (entry, Thumb bit cleared)
    ///   LR    (task exit trampoline)
    ///   R12   (0)
    ///   R3    (0)
    ///   R2    (0)
    ///   R1    (0)
    ///   R0    (argument)
    /// [Software saved context]
    ///   R11   (0)
    ///   ...
    ///   R4    (0)              <- returned stack pointer
    /// ```
    ///
    /// Addresses are stored as 32-bit words; on the target every code
    /// address fits.
    pub fn init_frame(&mut self, entry: usize, argument: usize, exit: usize) -> *mut u32 {
        let base = STACK_WORDS - FRAME_WORDS;
        let frame = &mut self.words[base..];

        frame[..8].fill(0);
        frame[8] = argument as u32;
        frame[9] = 0;
        frame[10] = 0;
        frame[11] = 0;
        frame[12] = 0;
        frame[13] = exit as u32;
        frame[14] = (entry as u32) & !1;
        frame[15] = INITIAL_XPSR;

        frame.as_mut_ptr()
    }

    /// Word at `offset` from the initial frame base. Used to inspect a
    /// freshly built frame.
    pub fn frame_word(&self, offset: usize) -> u32 {
        self.words[STACK_WORDS - FRAME_WORDS + offset]
    }
}

// ---------------------------------------------------------------------------
// Task names
// ---------------------------------------------------------------------------

/// A task name owned by the kernel: up to `MAX_TASK_NAME_LEN` bytes of
/// UTF-8, copied into the TCB when the task is created.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TaskName {
    bytes: [u8; MAX_TASK_NAME_LEN],
    len: u8,
}

impl TaskName {
    pub const EMPTY: Self = Self {
        bytes: [0; MAX_TASK_NAME_LEN],
        len: 0,
    };

    /// Copy `raw` in. Fails with `InvalidArgument` if it is too long or
    /// not UTF-8.
    pub fn new(raw: &[u8]) -> Result<Self, KernelError> {
        if raw.len() > MAX_TASK_NAME_LEN || core::str::from_utf8(raw).is_err() {
            return Err(KernelError::InvalidArgument);
        }
        let mut name = Self::EMPTY;
        name.bytes[..raw.len()].copy_from_slice(raw);
        name.len = raw.len() as u8;
        Ok(name)
    }

    pub fn as_str(&self) -> &str {
        // Only `new` writes the bytes, and it validated them.
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl TryFrom<&str> for TaskName {
    type Error = KernelError;

    fn try_from(name: &str) -> Result<Self, KernelError> {
        Self::new(name.as_bytes())
    }
}

impl PartialEq<str> for TaskName {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for TaskName {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Debug for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB): the kernel's per-task record.
///
/// `stack_pointer` always points into `stack`. It is written by the
/// context switch when the task is switched out and read when it is
/// switched back in.
pub struct TaskControlBlock {
    pub id: TaskId,
    pub name: TaskName,
    pub priority: Priority,
    pub state: TaskState,

    /// Saved stack pointer (PSP).
    pub stack_pointer: *mut u32,

    /// Ticks left before a sleeping task becomes ready.
    pub sleep_ticks: u32,

    /// Ticks left in the current time slice.
    pub slice_remaining: u32,

    /// Whether this slot holds a task (true) or is free (false).
    pub active: bool,

    /// Wait-queue node.
    pub blockable: Blockable,

    /// Ready-queue / sleep-set node. A task is never in both.
    pub(crate) sched_link: Link,

    pub stack: Stack,
}

// Safety: the raw stack pointer only ever points into the TCB's own stack,
// and TCBs are only touched with interrupts masked.
unsafe impl Send for TaskControlBlock {}
unsafe impl Sync for TaskControlBlock {}

impl TaskControlBlock {
    /// An unallocated slot. Used to initialize the static pool.
    pub const EMPTY: Self = Self {
        id: TaskId { index: 0, generation: 0 },
        name: TaskName::EMPTY,
        priority: Priority::LOWEST,
        state: TaskState::Terminated,
        stack_pointer: core::ptr::null_mut(),
        sleep_ticks: 0,
        slice_remaining: 0,
        active: false,
        blockable: Blockable::new(),
        sched_link: Link::UNLINKED,
        stack: Stack::EMPTY,
    };

    /// Prepare this slot for a new task. The slot's generation is kept;
    /// the caller supplies the full id.
    ///
    /// The task starts in `Ready`; the caller queues it.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        id: TaskId,
        name: TaskName,
        priority: Priority,
        entry: usize,
        argument: usize,
        exit: usize,
        time_slice: u32,
    ) {
        self.id = id;
        self.name = name;
        self.priority = priority;
        self.state = TaskState::Ready;
        self.sleep_ticks = 0;
        self.slice_remaining = time_slice;
        self.blockable = Blockable::new();
        self.sched_link = Link::UNLINKED;
        self.stack_pointer = self.stack.init_frame(entry, argument, exit);
        self.active = true;
    }

    /// Check if this task is runnable (Ready and allocated).
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.active && self.state == TaskState::Ready
    }

    /// In the ready queue or the sleep set.
    #[inline]
    pub fn is_sched_linked(&self) -> bool {
        self.sched_link.is_linked()
    }
}

/// Threads ready queues and the sleep set through
/// `TaskControlBlock::sched_link`.
pub struct SchedLink;

impl Adapter for SchedLink {
    type Node = TaskControlBlock;

    #[inline]
    fn link(node: &TaskControlBlock) -> &Link {
        &node.sched_link
    }

    #[inline]
    fn link_mut(node: &mut TaskControlBlock) -> &mut Link {
        &mut node.sched_link
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcb_initialization() {
        let mut tcb = TaskControlBlock::EMPTY;
        assert!(!tcb.active);

        let id = TaskId { index: 3, generation: 7 };
        let name = TaskName::try_from("blinky").unwrap();
        tcb.init(id, name, Priority::Level1, 0x0800_1235, 42, 0x0800_2001, 10);

        assert!(tcb.active);
        assert!(tcb.is_runnable());
        assert_eq!(tcb.id, id);
        assert_eq!(tcb.name, "blinky");
        assert_eq!(tcb.priority, Priority::Level1);
        assert_eq!(tcb.slice_remaining, 10);
        assert!(!tcb.blockable.is_queued());
        assert!(!tcb.is_sched_linked());
    }

    #[test]
    fn test_initial_frame() {
        let mut tcb = TaskControlBlock::EMPTY;
        tcb.init(
            TaskId { index: 0, generation: 0 },
            TaskName::EMPTY,
            Priority::Level0,
            0x0800_1235,
            0xCAFE,
            0x0800_2001,
            10,
        );

        // R4-R11
        for i in 0..8 {
            assert_eq!(tcb.stack.frame_word(i), 0);
        }
        assert_eq!(tcb.stack.frame_word(8), 0xCAFE); // R0 = argument
        assert_eq!(tcb.stack.frame_word(13), 0x0800_2001); // LR
        assert_eq!(tcb.stack.frame_word(14), 0x0800_1234); // PC, Thumb bit cleared
        assert_eq!(tcb.stack.frame_word(15), INITIAL_XPSR);

        // The saved stack pointer is the frame base and 8-byte aligned.
        assert_eq!(tcb.stack_pointer as usize % 8, 0);
        let top = tcb.stack.words.as_ptr() as usize + STACK_SIZE;
        assert_eq!(tcb.stack_pointer as usize, top - FRAME_WORDS * 4);
    }

    #[test]
    fn test_priority_conversion() {
        assert_eq!(Priority::try_from(0usize), Ok(Priority::Level0));
        assert_eq!(Priority::try_from(3usize), Ok(Priority::Level3));
        assert_eq!(Priority::try_from(Priority::COUNT), Err(()));
        assert!(Priority::Level0 < Priority::Level1);
    }

    #[test]
    fn test_task_id_packing() {
        let id = TaskId { index: 5, generation: 200 };
        assert_eq!(TaskId::from_raw(id.to_raw()), id);
    }

    #[test]
    fn test_task_name_validation() {
        assert_eq!(TaskName::try_from("").unwrap(), "");
        assert_eq!(TaskName::try_from("sixteen-bytes-ok").unwrap(), "sixteen-bytes-ok");
        assert_eq!(
            TaskName::try_from("seventeen-bytes!!"),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(TaskName::new(&[b'a', 0xFF]), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_task_name_is_a_copy() {
        let mut buf = *b"abc";
        let name = TaskName::new(&buf).unwrap();
        buf[0] = b'X';
        assert_eq!(name, "abc");
        assert_eq!(buf, *b"Xbc");
    }
}
