//! # Architecture Abstraction Layer
//!
//! Provides a hardware abstraction boundary for the kernel. Everything the
//! core needs from the processor goes through [`Port`]: issuing a
//! supervisor call, masking interrupts, asking for a context switch, and
//! the addresses of the port's task trampolines.
//!
//! The Cortex-M port (`armv7m`) is compiled for bare-metal ARM targets;
//! hosted builds get the `fake` port, a test double that records what the
//! kernel asked of the hardware.

use crate::syscall::{SyscallArgs, SyscallIdx};

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        pub mod armv7m;
    } else {
        pub mod fake;
    }
}

/// Interrupt mask state saved by [`Port::disable_interrupts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqState {
    was_enabled: bool,
}

impl IrqState {
    #[inline]
    pub const fn new(was_enabled: bool) -> Self {
        Self { was_enabled }
    }

    /// Whether interrupts were enabled before they were disabled.
    #[inline]
    pub const fn was_enabled(self) -> bool {
        self.was_enabled
    }
}

/// Hardware-facing interface of the kernel.
///
/// Implementations must be cheap to call from any context. All methods take
/// `&self`: the hardware they drive is a process-wide singleton.
pub trait Port {
    /// Trap into privileged code with `idx` and the argument block. Returns
    /// once the privileged handler has written its result into `args`.
    fn supervisor_call(&self, idx: SyscallIdx, args: &mut SyscallArgs);

    /// Save the current interrupt mask, then disable interrupts.
    fn disable_interrupts(&self) -> IrqState;

    /// Restore a mask previously returned by `disable_interrupts`.
    fn restore_interrupts(&self, state: IrqState);

    /// Ask for a context switch as soon as no other handler is active.
    fn request_context_switch(&self);

    /// Address a task returns to when its entry function returns.
    fn task_exit_address(&self) -> usize;

    /// Entry point of the idle task.
    fn idle_entry_address(&self) -> usize;
}

impl<P: Port + ?Sized> Port for &P {
    #[inline]
    fn supervisor_call(&self, idx: SyscallIdx, args: &mut SyscallArgs) {
        (**self).supervisor_call(idx, args)
    }

    #[inline]
    fn disable_interrupts(&self) -> IrqState {
        (**self).disable_interrupts()
    }

    #[inline]
    fn restore_interrupts(&self, state: IrqState) {
        (**self).restore_interrupts(state)
    }

    #[inline]
    fn request_context_switch(&self) {
        (**self).request_context_switch()
    }

    #[inline]
    fn task_exit_address(&self) -> usize {
        (**self).task_exit_address()
    }

    #[inline]
    fn idle_entry_address(&self) -> usize {
        (**self).idle_entry_address()
    }
}
