//! # Popcorn Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time; nothing is allocated dynamically.

/// Maximum number of application tasks the kernel can manage at once.
/// This bounds the static TCB pool. The idle task lives in an extra slot
/// outside this pool. Each task consumes `STACK_SIZE` bytes of RAM.
pub const MAX_TASKS: usize = 8;

/// SysTick frequency in Hz. Determines scheduler tick granularity.
pub const TICK_HZ: u32 = 1000;

/// Time slice in ticks. A task that runs this long while another task of
/// the same priority is ready is rotated to the tail of its ready queue.
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// Per-task stack size in bytes. Must be large enough for the deepest call
/// chain plus the hardware exception frame (32 bytes) and the
/// software-saved context (32 bytes for R4–R11).
pub const STACK_SIZE: usize = 1024;

/// Number of kernel-owned wait queues tasks can block on.
pub const MAX_WAIT_QUEUES: usize = 8;

/// Number of fault records retained by the error log. Older records are
/// overwritten; the total count keeps growing.
pub const MAX_ERROR_RECORDS: usize = 8;

/// Longest task name accepted by `CreateTask`, in bytes.
pub const MAX_TASK_NAME_LEN: usize = 16;

/// System clock frequency in Hz (default for STM32F1 at 8 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 8_000_000;
