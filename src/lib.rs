//! # Popcorn
//!
//! A preemptive, priority-based Real-Time Operating System core for
//! single-core ARM Cortex-M microcontrollers.
//!
//! ## Overview
//!
//! Tasks run unprivileged on their own stacks and reach the kernel only
//! through a supervisor call. The kernel keeps a fixed pool of task control
//! blocks, one ready queue per priority level, a tick-driven sleep set and
//! a table of wait queues, and switches contexts from PendSV:
//!
//! - **Strict priorities**: a ready task always preempts a lower level
//! - **Round robin** inside a level, by yield or time-slice expiry
//! - **Sleep** for a tick count, **wait** on a queue until notified
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! ├────────────────────────────────────────────────────────┤
//! │             Syscall façade (syscall.rs)                │
//! │  start_os · create_task · sleep · yield_now · wait ... │
//! ├────────────────────── svc #0 ──────────────────────────┤
//! │        Kernel (kernel.rs): dispatch · tick · switch    │
//! ├──────────────┬────────────────────┬────────────────────┤
//! │  Scheduler   │   Wait queues      │  Sync Primitives   │
//! │  scheduler.rs│   blockable.rs     │  sync/             │
//! │  ─ tick()    │   ─ Blockable      │  ─ CriticalSection │
//! │  ─ schedule()│   ─ WaitQueueId    │  ─ SpinLock        │
//! ├──────────────┴────────────────────┴────────────────────┤
//! │   Task Model (task.rs) · Intrusive lists (list.rs)     │
//! ├────────────────────────────────────────────────────────┤
//! │   Arch Port (arch/): armv7m on target, fake on host    │
//! │      SVCall · PendSV · SysTick · PRIMASK               │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: every kernel object is statically sized
//! - **Fixed TCB pool**: `[TaskControlBlock; MAX_TASKS + 1]`, the extra
//!   slot holding the idle task
//! - **Per-task stack**: inline in the TCB
//! - **Intrusive queues**: list links live inside the TCBs and name their
//!   neighbours by pool index
//!
//! The scheduler and everything below it are plain Rust and run on the
//! build host; `cargo test` exercises them through the `fake` port.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod blockable;
pub mod config;
pub mod error;
pub mod kernel;
pub mod list;
pub mod scheduler;
pub mod sync;
pub mod syscall;
pub mod task;

pub use blockable::WaitQueueId;
pub use error::KernelError;
pub use kernel::Kernel;
pub use syscall::{NotifyMode, Syscall};
pub use task::{Priority, TaskId};
