//! # ARMv7-M Port Layer
//!
//! Hardware-specific code for Cortex-M3/M4 class processors (Thumb-2).
//! Implements the supervisor call trap, context switching via PendSV, the
//! SysTick scheduler tick, and interrupt masking.
//!
//! ## Context Switch Mechanism
//!
//! The processor uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by boot code and exception handlers
//! - **PSP** (Process Stack Pointer): used by tasks in unprivileged Thread mode
//!
//! On exception entry, the hardware stacks R0–R3, R12, LR, PC and xPSR onto
//! the active stack. PendSV saves and restores R4–R11 by hand, which
//! completes the context. PSP reads as zero until the first task has run;
//! PendSV skips the save in that case.
//!
//! ## Interrupt Priorities
//!
//! SVCall, PendSV and SysTick all sit at 0xFF (lowest). None of them can
//! preempt another, so the kernel is never re-entered, and a pended switch
//! only runs once every other handler has returned.
//!
//! ## Supervisor calls
//!
//! `svc #0` with the syscall number in R0 and a pointer to the
//! [`SyscallArgs`] block in R1. `SVCall` recovers both from the stacked
//! frame of whichever stack the caller was on.

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use cortex_m::register::{primask, psp};
use cortex_m_rt::exception;

use super::{IrqState, Port};
use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::kernel::Kernel;
use crate::syscall::{Syscall, SyscallArgs, SyscallIdx};

/// The Cortex-M port. Zero-sized: the hardware it drives is global.
#[derive(Debug, Clone, Copy)]
pub struct CortexM;

/// The kernel instance the exception handlers below enter.
pub static KERNEL: Kernel<CortexM> = Kernel::new(CortexM);

/// Syscall façade for task code.
pub static SYSCALLS: Syscall<CortexM> = Syscall::new(CortexM);

impl Port for CortexM {
    #[inline]
    fn supervisor_call(&self, idx: SyscallIdx, args: &mut SyscallArgs) {
        // Safety: SVCall only reads the block through r1 and writes its
        // result before the trap returns.
        unsafe {
            asm!(
                "svc #0",
                in("r0") idx as u32,
                in("r1") args as *mut SyscallArgs,
                options(nostack),
            );
        }
    }

    #[inline]
    fn disable_interrupts(&self) -> IrqState {
        let was_enabled = primask::read().is_inactive();
        cortex_m::interrupt::disable();
        IrqState::new(was_enabled)
    }

    #[inline]
    fn restore_interrupts(&self, state: IrqState) {
        if state.was_enabled() {
            // Safety: only restores a mask that was active on entry.
            unsafe { cortex_m::interrupt::enable() };
        }
    }

    #[inline]
    fn request_context_switch(&self) {
        SCB::set_pendsv();
    }

    fn task_exit_address(&self) -> usize {
        task_exit as extern "C" fn() -> ! as usize
    }

    fn idle_entry_address(&self) -> usize {
        idle as extern "C" fn(usize) -> ! as usize
    }
}

// ---------------------------------------------------------------------------
// Boot-time configuration
// ---------------------------------------------------------------------------

/// Prepare the core for `StartOS`: exception priorities, tick timer, and a
/// zero PSP so the first PendSV knows there is nothing to save.
///
/// Must run in privileged Thread mode before any task exists.
pub fn init(scb: &mut SCB, syst: &mut SYST) {
    set_interrupt_priorities(scb);
    configure_systick(syst);
    // Safety: nothing runs on the process stack yet.
    unsafe { psp::write(0) };
}

/// Configure SysTick to fire at `TICK_HZ` from the processor clock.
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Put the three kernel entry exceptions at the lowest priority.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // Safety: changing priorities can break priority-based critical
    // sections; the kernel uses PRIMASK instead.
    unsafe {
        scb.set_priority(SystemHandler::SVCall, 0xFF);
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

// ---------------------------------------------------------------------------
// Task trampolines
// ---------------------------------------------------------------------------

/// Link register of every new task: returning from the entry function
/// lands here and destroys the task.
extern "C" fn task_exit() -> ! {
    let _ = SYSCALLS.destroy_task();
    loop {
        cortex_m::asm::wfi();
    }
}

/// Idle task body.
extern "C" fn idle(_: usize) -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// Exception handlers
// ---------------------------------------------------------------------------

/// Supervisor call trap. Picks the stack the caller was on from EXC_RETURN
/// bit 2 and tail-calls into `svc_entry` with a pointer to its stacked
/// frame; `svc_entry` returns straight through the exception return.
///
/// # Safety
/// Entered by hardware only.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn SVCall() {
    naked_asm!(
        "tst lr, #4",
        "ite eq",
        "mrseq r0, msp",
        "mrsne r0, psp",
        "b {entry}",
        entry = sym svc_entry,
    )
}

/// # Safety
/// `frame` points at the hardware-stacked R0–R3 of the trapping context,
/// and stacked R1 is the `SyscallArgs` pointer `supervisor_call` passed.
unsafe extern "C" fn svc_entry(frame: *const usize) {
    let idx = *frame as u32;
    let args = &mut *(*frame.add(1) as *mut SyscallArgs);
    KERNEL.dispatch(idx, args);
}

/// PendSV exception handler: the context switch.
///
/// ## Sequence
/// 1. If PSP is non-zero, push R4–R11 onto the outgoing task's stack
/// 2. Call `pendsv_switch` with the outgoing PSP (or null); it returns the
///    incoming task's saved PSP
/// 3. Pop R4–R11 from the incoming stack and install it as PSP
/// 4. Drop Thread mode privileges and return to Thread mode on PSP
///    (EXC_RETURN = 0xFFFFFFFD) so the hardware unstacks the rest
///
/// # Safety
/// Entered by hardware only.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "cbz r0, 1f",
        "stmdb r0!, {{r4-r11}}",
        "1:",
        "bl {switch}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "mrs r1, control",
        "orr r1, r1, #1",
        "msr control, r1",
        "isb",
        "mvn lr, #2", // EXC_RETURN 0xFFFFFFFD: Thread mode, PSP
        "bx lr",
        switch = sym pendsv_switch,
    )
}

extern "C" fn pendsv_switch(saved_sp: *mut u32) -> *mut u32 {
    KERNEL.switch_context(saved_sp)
}

#[exception]
fn SysTick() {
    KERNEL.tick();
}

// ---------------------------------------------------------------------------
// Semihosting log sink
// ---------------------------------------------------------------------------

#[cfg(feature = "semihosting")]
pub use self::semihosting::init_logging;

#[cfg(feature = "semihosting")]
mod semihosting {
    use log::{LevelFilter, Metadata, Record};

    use crate::sync::SpinLock;

    /// Writes log records to the debugger console. A record that arrives
    /// while another one is being written (an interrupt logging over a task)
    /// is dropped rather than spun on.
    struct SemihostingLogger {
        lock: SpinLock,
    }

    static LOGGER: SemihostingLogger = SemihostingLogger {
        lock: SpinLock::new(),
    };

    impl log::Log for SemihostingLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= log::max_level()
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) || !self.lock.try_lock() {
                return;
            }
            cortex_m_semihosting::hprintln!("[{}] {}", record.level(), record.args());
            self.lock.unlock();
        }

        fn flush(&self) {}
    }

    /// Route `log` output to semihosting. A second call is ignored.
    pub fn init_logging(max_level: LevelFilter) {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(max_level);
        }
    }
}
