//! # Kernel
//!
//! Privileged entry points of Popcorn. The [`Kernel`] owns the port and the
//! scheduler; every way into scheduler state goes through it and runs
//! inside a [`CriticalSection`]:
//!
//! ```text
//! SVCall ──► Kernel::dispatch ──► HANDLERS[idx] ──┐
//! SysTick ─► Kernel::tick ────────────────────────┼─► Scheduler
//! ISR ─────► Kernel::wake_one / wake_all ─────────┘      │
//!                                                        ▼ needs_reschedule
//! PendSV ──► Kernel::switch_context ◄──────── Port::request_context_switch
//! ```
//!
//! Handlers compute a `Result`; `dispatch` writes it back into the
//! argument block and records every kernel error in the error log.

use core::cell::{RefCell, RefMut};

use crate::arch::Port;
use crate::blockable::WaitQueueId;
use crate::config::MAX_TASK_NAME_LEN;
use crate::error::{Fault, KernelError};
use crate::scheduler::Scheduler;
use crate::sync::CriticalSection;
use crate::syscall::{NotifyMode, SyscallArgs, SyscallIdx};
use crate::task::{Priority, TaskId, TaskName};

type Handler<P> = fn(&Kernel<P>, &mut Scheduler, &SyscallArgs) -> Result<usize, KernelError>;

pub struct Kernel<P: Port> {
    port: P,
    scheduler: RefCell<Scheduler>,
}

// Safety: the scheduler is only borrowed with interrupts masked, and the
// kernel targets a single core.
unsafe impl<P: Port + Sync> Sync for Kernel<P> {}

impl<P: Port> Kernel<P> {
    /// Indexed by `SyscallIdx`.
    const HANDLERS: [Handler<P>; SyscallIdx::COUNT] = [
        Self::sys_start_os,
        Self::sys_create_task,
        Self::sys_destroy_task,
        Self::sys_sleep,
        Self::sys_yield,
        Self::sys_register_error,
        Self::sys_wait,
        Self::sys_notify,
    ];

    pub const fn new(port: P) -> Self {
        Self {
            port,
            scheduler: RefCell::new(Scheduler::new()),
        }
    }

    #[inline]
    pub fn port(&self) -> &P {
        &self.port
    }

    /// The only way to the scheduler state: a borrow that cannot outlive
    /// the critical section it was taken under.
    fn scheduler<'cs>(&'cs self, _cs: &'cs CriticalSection<'_, P>) -> RefMut<'cs, Scheduler> {
        self.scheduler.borrow_mut()
    }

    /// Run `f` on the scheduler with interrupts masked, then pend a context
    /// switch if `f` left one due. Nothing is pended before `StartOS`: there
    /// is no task to switch to.
    fn enter<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        let cs = CriticalSection::new(&self.port);
        let mut sched = self.scheduler(&cs);
        let r = f(&mut sched);
        if sched.is_started() && sched.needs_reschedule() {
            self.port.request_context_switch();
        }
        r
    }

    /// Read-only view of the scheduler, for diagnostics and tests.
    pub fn inspect<R>(&self, f: impl FnOnce(&Scheduler) -> R) -> R {
        let cs = CriticalSection::new(&self.port);
        let r = f(&self.scheduler(&cs));
        r
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.inspect(Scheduler::current_id)
    }

    // -----------------------------------------------------------------------
    // Exception entry points
    // -----------------------------------------------------------------------

    /// Service a supervisor call. `idx` is the raw number from the trap.
    pub fn dispatch(&self, idx: u32, args: &mut SyscallArgs) {
        let result = self.enter(|sched| {
            let result = match SyscallIdx::try_from(idx) {
                Ok(n) => Self::HANDLERS[n as usize](self, sched, args),
                Err(()) => Err(KernelError::BadSyscall),
            };
            if let Err(e) = result {
                sched.record_fault(Fault::Kernel(e));
            }
            result
        });
        args.complete(result);
    }

    /// Tick interrupt body.
    pub fn tick(&self) {
        self.enter(Scheduler::tick);
    }

    /// Context switch body: park the outgoing stack pointer and return the
    /// one to resume. Before `StartOS` nothing is switched.
    pub fn switch_context(&self, saved_sp: *mut u32) -> *mut u32 {
        let cs = CriticalSection::new(&self.port);
        let mut sched = self.scheduler(&cs);
        if !sched.is_started() {
            return saved_sp;
        }
        sched.switch_context(saved_sp)
    }

    // -----------------------------------------------------------------------
    // Privileged services for interrupt handlers
    // -----------------------------------------------------------------------

    /// Release the longest waiter on `queue`.
    pub fn wake_one(&self, queue: WaitQueueId) -> Result<Option<TaskId>, KernelError> {
        self.enter(|sched| sched.wake_one(queue))
    }

    /// Release every waiter on `queue`.
    pub fn wake_all(&self, queue: WaitQueueId) -> Result<usize, KernelError> {
        self.enter(|sched| sched.wake_all(queue))
    }

    /// Terminate any task by id.
    pub fn terminate(&self, id: TaskId) -> Result<(), KernelError> {
        self.enter(|sched| sched.terminate(id))
    }

    // -----------------------------------------------------------------------
    // Syscall handlers
    // -----------------------------------------------------------------------

    fn sys_start_os(&self, sched: &mut Scheduler, _: &SyscallArgs) -> Result<usize, KernelError> {
        sched.start(self.port.idle_entry_address())?;
        Ok(0)
    }

    fn sys_create_task(
        &self,
        sched: &mut Scheduler,
        args: &SyscallArgs,
    ) -> Result<usize, KernelError> {
        let priority =
            Priority::try_from(args.arg(2)).map_err(|()| KernelError::InvalidPriority)?;
        // Safety: tasks share the kernel's address space; the bytes are
        // copied out before the handler returns.
        let name = unsafe { copy_task_name(args.arg(3), args.arg(4)) }?;
        let id = sched.create_task(
            args.arg(0),
            args.arg(1),
            priority,
            name,
            self.port.task_exit_address(),
        )?;
        Ok(id.to_raw())
    }

    fn sys_destroy_task(&self, sched: &mut Scheduler, _: &SyscallArgs) -> Result<usize, KernelError> {
        sched.destroy_current()?;
        Ok(0)
    }

    fn sys_sleep(&self, sched: &mut Scheduler, args: &SyscallArgs) -> Result<usize, KernelError> {
        let ticks = u32::try_from(args.arg(0)).map_err(|_| KernelError::InvalidArgument)?;
        sched.sleep_current(ticks)?;
        Ok(0)
    }

    fn sys_yield(&self, sched: &mut Scheduler, _: &SyscallArgs) -> Result<usize, KernelError> {
        sched.yield_current()?;
        Ok(0)
    }

    fn sys_register_error(
        &self,
        sched: &mut Scheduler,
        args: &SyscallArgs,
    ) -> Result<usize, KernelError> {
        let code = u32::try_from(args.arg(0)).map_err(|_| KernelError::InvalidArgument)?;
        sched.record_fault(Fault::User(code));
        Ok(0)
    }

    fn sys_wait(&self, sched: &mut Scheduler, args: &SyscallArgs) -> Result<usize, KernelError> {
        let queue = WaitQueueId::from_raw(args.arg(0)).ok_or(KernelError::InvalidWaitQueue)?;
        sched.wait_current(queue)?;
        Ok(0)
    }

    fn sys_notify(&self, sched: &mut Scheduler, args: &SyscallArgs) -> Result<usize, KernelError> {
        let queue = WaitQueueId::from_raw(args.arg(0)).ok_or(KernelError::InvalidWaitQueue)?;
        match NotifyMode::try_from(args.arg(1)) {
            Ok(NotifyMode::One) => Ok(sched.wake_one(queue)?.is_some() as usize),
            Ok(NotifyMode::All) => sched.wake_all(queue),
            Err(()) => Err(KernelError::InvalidArgument),
        }
    }
}

/// Copy a task name out of caller memory into a kernel-owned [`TaskName`].
///
/// # Safety
/// A non-empty `ptr..ptr + len` must be readable for the duration of the
/// call.
unsafe fn copy_task_name(ptr: usize, len: usize) -> Result<TaskName, KernelError> {
    if len == 0 {
        return Ok(TaskName::EMPTY);
    }
    if ptr == 0 || len > MAX_TASK_NAME_LEN || ptr.checked_add(len).is_none() {
        return Err(KernelError::InvalidArgument);
    }
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };
    TaskName::new(bytes)
}
