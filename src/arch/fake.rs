//! Hosted stand-in for the Cortex-M port.
//!
//! [`FakePort`] records what the kernel asks of the hardware: interrupt
//! mask changes, context-switch requests (and whether interrupts were
//! masked when they were made), supervisor calls. A bare
//! `FakePort` answers every trap with a canned reply, which is enough to
//! test the syscall façade on its own. [`Loopback`] instead hands the
//! argument block to a hosted [`Kernel`], so tests run the whole
//! trap-dispatch-return path on the build machine.

use core::cell::Cell;

use super::{IrqState, Port};
use crate::kernel::Kernel;
use crate::syscall::{SyscallArgs, SyscallIdx};

pub struct FakePort {
    interrupts_enabled: Cell<bool>,
    switch_requests: Cell<u32>,
    unmasked_switch_requests: Cell<u32>,
    critical_sections: Cell<u32>,
    svc_count: Cell<u32>,
    last_svc: Cell<Option<SyscallIdx>>,
    last_args: Cell<[usize; 5]>,
    reply: Cell<(u32, usize)>,
}

impl FakePort {
    /// Address tasks "return" to. Only ever stored, never called.
    pub const TASK_EXIT: usize = 0x0000_1001;
    /// Entry address given to the idle task.
    pub const IDLE_ENTRY: usize = 0x0000_2001;

    pub const fn new() -> Self {
        Self {
            interrupts_enabled: Cell::new(true),
            switch_requests: Cell::new(0),
            unmasked_switch_requests: Cell::new(0),
            critical_sections: Cell::new(0),
            svc_count: Cell::new(0),
            last_svc: Cell::new(None),
            last_args: Cell::new([0; 5]),
            reply: Cell::new((0, 0)),
        }
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled.get()
    }

    pub fn set_interrupts_enabled(&self, enabled: bool) {
        self.interrupts_enabled.set(enabled);
    }

    /// Context switches requested since the last call. Clears the count.
    pub fn take_switch_requests(&self) -> u32 {
        self.switch_requests.replace(0)
    }

    /// Whether any context switch was requested since the last call.
    pub fn take_switch_request(&self) -> bool {
        self.take_switch_requests() > 0
    }

    /// Context switches requested while interrupts were enabled. The
    /// kernel only ever requests one from inside a critical section.
    pub fn unmasked_switch_requests(&self) -> u32 {
        self.unmasked_switch_requests.get()
    }

    /// Times interrupts have been disabled.
    pub fn critical_sections(&self) -> u32 {
        self.critical_sections.get()
    }

    pub fn svc_count(&self) -> u32 {
        self.svc_count.get()
    }

    pub fn last_svc(&self) -> Option<SyscallIdx> {
        self.last_svc.get()
    }

    pub fn last_args(&self) -> [usize; 5] {
        self.last_args.get()
    }

    /// Status and value written into the block by the next bare traps.
    pub fn set_reply(&self, status: u32, value: usize) {
        self.reply.set((status, value));
    }

    fn note_svc(&self, idx: SyscallIdx, args: &SyscallArgs) {
        self.svc_count.set(self.svc_count.get() + 1);
        self.last_svc.set(Some(idx));
        self.last_args.set(args.args);
    }
}

impl Default for FakePort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for FakePort {
    fn supervisor_call(&self, idx: SyscallIdx, args: &mut SyscallArgs) {
        self.note_svc(idx, args);
        let (status, value) = self.reply.get();
        args.status = status;
        args.value = value;
    }

    fn disable_interrupts(&self) -> IrqState {
        self.critical_sections.set(self.critical_sections.get() + 1);
        IrqState::new(self.interrupts_enabled.replace(false))
    }

    fn restore_interrupts(&self, state: IrqState) {
        if state.was_enabled() {
            self.interrupts_enabled.set(true);
        }
    }

    fn request_context_switch(&self) {
        if self.interrupts_enabled() {
            self.unmasked_switch_requests
                .set(self.unmasked_switch_requests.get() + 1);
        }
        self.switch_requests.set(self.switch_requests.get() + 1);
    }

    fn task_exit_address(&self) -> usize {
        Self::TASK_EXIT
    }

    fn idle_entry_address(&self) -> usize {
        Self::IDLE_ENTRY
    }
}

/// Port whose traps land directly in a hosted kernel. Syscalls are issued
/// on behalf of whichever task the kernel considers current.
pub struct Loopback<'k> {
    kernel: &'k Kernel<FakePort>,
}

impl<'k> Loopback<'k> {
    pub fn new(kernel: &'k Kernel<FakePort>) -> Self {
        Self { kernel }
    }
}

impl Port for Loopback<'_> {
    fn supervisor_call(&self, idx: SyscallIdx, args: &mut SyscallArgs) {
        self.kernel.port().note_svc(idx, args);
        self.kernel.dispatch(idx as u32, args);
    }

    fn disable_interrupts(&self) -> IrqState {
        self.kernel.port().disable_interrupts()
    }

    fn restore_interrupts(&self, state: IrqState) {
        self.kernel.port().restore_interrupts(state)
    }

    fn request_context_switch(&self) {
        self.kernel.port().request_context_switch()
    }

    fn task_exit_address(&self) -> usize {
        self.kernel.port().task_exit_address()
    }

    fn idle_entry_address(&self) -> usize {
        self.kernel.port().idle_entry_address()
    }
}
