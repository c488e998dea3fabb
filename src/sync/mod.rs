//! # Synchronization Primitives
//!
//! The two mechanisms the kernel uses for mutual exclusion:
//!
//! - [`CriticalSection`]: masks interrupts for its lifetime. All scheduler
//!   state is mutated under one, so neither the tick, the SVC trap nor a
//!   peripheral interrupt can observe a half-updated queue.
//! - [`SpinLock`]: an atomic test-and-set flag for state shared with
//!   contexts where masking interrupts is insufficient or undesirable.
//!
//! No piece of kernel data is protected by both.

mod critical_section;
mod spinlock;

pub use self::critical_section::{critical_section, CriticalSection};
pub use self::spinlock::SpinLock;
