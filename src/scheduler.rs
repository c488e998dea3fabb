//! # Scheduler
//!
//! Core scheduling logic for Popcorn: a preemptive, fixed-priority
//! scheduler with round robin inside each priority level.
//!
//! ## Queues
//!
//! - one FIFO ready queue per [`Priority`] level
//! - a sleep set of tick-counted sleepers
//! - a fixed table of [`WaitQueue`]s for blocked tasks
//!
//! Outside of a pending context switch, every live task is in exactly one
//! of those places or is the running task, never more than one. The
//! running task is not queued.
//!
//! ## Scheduling Algorithm
//!
//! Scan levels from `Level0` down and run the head of the first non-empty
//! ready queue; run the idle task when all are empty. At each tick:
//! 1. **Sleepers**: decrement every sleeping task; expired ones join their
//!    ready queue in sleep-set order
//! 2. **Time slice**: charge the running task; on expiry it rotates to the
//!    tail of its level if a peer is ready
//! 3. **Preemption**: flag a reschedule if a strictly higher level is ready
//!
//! A preempted task goes back to the *head* of its level so it keeps its
//! turn. A task that yields or exhausts its slice goes to the tail.
//!
//! Every method expects the caller to hold the kernel's critical section.

use crate::blockable::{WaitQueue, WaitQueueId};
use crate::config::{DEFAULT_TIME_SLICE, MAX_TASKS, MAX_WAIT_QUEUES};
use crate::error::{ErrorLog, ErrorRecord, Fault, KernelError};
use crate::list::List;
use crate::task::{Priority, SchedLink, TaskControlBlock, TaskId, TaskName, TaskState};

/// Slot of the idle task, just past the application pool.
pub const IDLE: usize = MAX_TASKS;

/// Level the idle task runs at: below every real priority.
const IDLE_LEVEL: usize = Priority::COUNT;

type TaskList = List<SchedLink>;

const EMPTY_LIST: TaskList = List::new();
const EMPTY_WAIT_QUEUE: WaitQueue = WaitQueue::new();

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state. One instance lives inside the kernel.
pub struct Scheduler {
    /// TCB pool. Slots `0..MAX_TASKS` hold application tasks; slot `IDLE`
    /// holds the idle task.
    tasks: [TaskControlBlock; MAX_TASKS + 1],

    ready: [TaskList; Priority::COUNT],
    sleeping: TaskList,
    wait_queues: [WaitQueue; MAX_WAIT_QUEUES],

    /// Task whose context is on the CPU. `None` until the first dispatch.
    current: Option<usize>,

    started: bool,

    /// Allocated application tasks that have not terminated.
    live: usize,

    /// Monotonic tick counter.
    tick_count: u64,

    /// Set when the next `schedule()` may pick a different task.
    needs_reschedule: bool,

    errors: ErrorLog,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS + 1],
            ready: [EMPTY_LIST; Priority::COUNT],
            sleeping: EMPTY_LIST,
            wait_queues: [EMPTY_WAIT_QUEUE; MAX_WAIT_QUEUES],
            current: None,
            started: false,
            live: 0,
            tick_count: 0,
            needs_reschedule: false,
            errors: ErrorLog::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started
    }

    #[inline]
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn current_id(&self) -> Option<TaskId> {
        self.current.map(|i| self.tasks[i].id)
    }

    /// TCB in slot `idx` (`IDLE` for the idle task).
    #[inline]
    pub fn task(&self, idx: usize) -> &TaskControlBlock {
        &self.tasks[idx]
    }

    /// Resolve an id to its slot, if that exact task is still allocated.
    pub fn lookup(&self, id: TaskId) -> Option<usize> {
        let idx = id.index as usize;
        let tcb = self.tasks[..MAX_TASKS].get(idx)?;
        (tcb.active && tcb.id == id).then_some(idx)
    }

    #[inline]
    pub fn live_tasks(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    #[inline]
    pub fn needs_reschedule(&self) -> bool {
        self.needs_reschedule
    }

    #[inline]
    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    /// Slots queued at `priority`, head first.
    pub fn ready_tasks(&self, priority: Priority) -> impl Iterator<Item = usize> + '_ {
        self.ready[priority.index()].iter(&self.tasks)
    }

    /// Slots blocked on `queue`, in wake order. Empty for an unknown queue.
    pub fn waiters(&self, queue: WaitQueueId) -> impl Iterator<Item = usize> + '_ {
        self.wait_queues
            .get(queue.index())
            .into_iter()
            .flat_map(move |q| q.iter(&self.tasks))
    }

    /// Number of places slot `idx` currently occupies: ready queues, the
    /// sleep set, wait queues and the running slot. A live task is always
    /// at exactly one; anything else is kernel corruption.
    pub fn membership_count(&self, idx: usize) -> usize {
        let in_ready = self
            .ready
            .iter()
            .filter(|q| q.contains(&self.tasks, idx))
            .count();
        let in_sleep = self.sleeping.contains(&self.tasks, idx) as usize;
        let in_wait = self
            .wait_queues
            .iter()
            .filter(|q| q.contains(&self.tasks, idx))
            .count();
        let running = (self.current == Some(idx)
            && self.tasks[idx].state == TaskState::Running) as usize;
        in_ready + in_sleep + in_wait + running
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Allocate a TCB from the pool and queue it as Ready.
    ///
    /// `entry` and `exit` are code addresses: the first dispatch runs
    /// `entry(argument)`, and returning from it lands on `exit`.
    pub fn create_task(
        &mut self,
        entry: usize,
        argument: usize,
        priority: Priority,
        name: TaskName,
        exit: usize,
    ) -> Result<TaskId, KernelError> {
        if entry == 0 {
            return Err(KernelError::InvalidArgument);
        }

        let slot = self.tasks[..MAX_TASKS]
            .iter()
            .position(|t| !t.active)
            .ok_or(KernelError::PoolExhausted)?;

        let id = TaskId {
            index: slot as u8,
            generation: self.tasks[slot].id.generation,
        };
        self.tasks[slot].init(id, name, priority, entry, argument, exit, DEFAULT_TIME_SLICE);
        self.live += 1;
        self.make_ready(slot);

        log::debug!("created task {} '{}' at {:?}", slot, name, priority);
        Ok(id)
    }

    /// Prepare the idle task and arm the first dispatch.
    pub fn start(&mut self, idle_entry: usize) -> Result<(), KernelError> {
        if self.started {
            return Err(KernelError::AlreadyStarted);
        }

        let idle_id = TaskId { index: IDLE as u8, generation: 0 };
        let idle_name = TaskName::try_from("idle")?;
        self.tasks[IDLE].init(idle_id, idle_name, Priority::LOWEST, idle_entry, 0, 0, 0);
        self.started = true;
        self.needs_reschedule = true;

        log::info!("kernel started with {} task(s)", self.live);
        Ok(())
    }

    /// Terminate the running task. It is reclaimed once switched out.
    pub fn destroy_current(&mut self) -> Result<(), KernelError> {
        let idx = self.running_task()?;
        self.terminate_slot(idx);
        Ok(())
    }

    /// Terminate any application task, whatever queue holds it.
    ///
    /// This is a privileged operation; the `DestroyTask` syscall only ever
    /// terminates its caller.
    pub fn terminate(&mut self, id: TaskId) -> Result<(), KernelError> {
        if id.index as usize == IDLE {
            return Err(KernelError::IdleTask);
        }
        let idx = self.lookup(id).ok_or(KernelError::InvalidArgument)?;
        self.terminate_slot(idx);
        Ok(())
    }

    fn terminate_slot(&mut self, idx: usize) {
        let state = self.tasks[idx].state;
        if state == TaskState::Terminated {
            return;
        }

        let level = self.tasks[idx].priority.index();
        match state {
            TaskState::Ready => {
                self.ready[level].remove(&mut self.tasks, idx);
            }
            TaskState::Sleeping => {
                self.sleeping.remove(&mut self.tasks, idx);
            }
            TaskState::Blocked => {
                if let Some(q) = self.tasks[idx].blockable.queue.take() {
                    self.wait_queues[q.index()].remove(&mut self.tasks, idx);
                }
            }
            TaskState::Running | TaskState::Terminated => {}
        }

        self.tasks[idx].state = TaskState::Terminated;
        self.live -= 1;
        log::debug!("task {} '{}' terminated", idx, self.tasks[idx].name);

        if self.current == Some(idx) {
            // Still on the CPU; its slot is freed after the switch.
            self.needs_reschedule = true;
        } else {
            self.reclaim(idx);
        }
    }

    fn reclaim(&mut self, idx: usize) {
        let tcb = &mut self.tasks[idx];
        tcb.active = false;
        tcb.id.generation = tcb.id.generation.wrapping_add(1);
    }

    // -----------------------------------------------------------------------
    // Running-task operations
    // -----------------------------------------------------------------------

    /// Slot of the task the current syscall was issued from.
    fn running(&self) -> Result<usize, KernelError> {
        match self.current {
            Some(idx) if self.tasks[idx].state == TaskState::Running => Ok(idx),
            _ => Err(KernelError::NotStarted),
        }
    }

    /// Like `running`, but refuses the idle task.
    fn running_task(&self) -> Result<usize, KernelError> {
        let idx = self.running()?;
        if idx == IDLE {
            return Err(KernelError::IdleTask);
        }
        Ok(idx)
    }

    /// Give up the rest of the time slice. The task goes to the tail of its
    /// ready queue.
    pub fn yield_current(&mut self) -> Result<(), KernelError> {
        let idx = self.running()?;
        if idx != IDLE {
            let tcb = &mut self.tasks[idx];
            tcb.state = TaskState::Ready;
            tcb.slice_remaining = DEFAULT_TIME_SLICE;
            let level = tcb.priority.index();
            self.ready[level].push_back(&mut self.tasks, idx);
        }
        self.needs_reschedule = true;
        Ok(())
    }

    /// Move the running task into the sleep set for `ticks` ticks.
    /// Sleeping for zero ticks is a yield.
    pub fn sleep_current(&mut self, ticks: u32) -> Result<(), KernelError> {
        if ticks == 0 {
            return self.yield_current();
        }
        let idx = self.running_task()?;
        let tcb = &mut self.tasks[idx];
        tcb.state = TaskState::Sleeping;
        tcb.sleep_ticks = ticks;
        self.sleeping.push_back(&mut self.tasks, idx);
        self.needs_reschedule = true;
        Ok(())
    }

    /// Block the running task on `queue` until it is woken.
    pub fn wait_current(&mut self, queue: WaitQueueId) -> Result<(), KernelError> {
        let q = Self::check_queue(queue)?;
        let idx = self.running_task()?;

        let blockable = &mut self.tasks[idx].blockable;
        debug_assert!(!blockable.is_queued(), "task {} already waiting", idx);
        blockable.woken = false;
        blockable.queue = Some(queue);
        self.tasks[idx].state = TaskState::Blocked;
        self.wait_queues[q].push_back(&mut self.tasks, idx);
        self.needs_reschedule = true;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Waking
    // -----------------------------------------------------------------------

    /// Release the longest-waiting task on `queue`, if any.
    pub fn wake_one(&mut self, queue: WaitQueueId) -> Result<Option<TaskId>, KernelError> {
        let q = Self::check_queue(queue)?;
        Ok(self.wait_queues[q].pop_front(&mut self.tasks).map(|idx| {
            self.release(idx);
            self.tasks[idx].id
        }))
    }

    /// Release every task waiting on `queue`, in wait order. Returns how
    /// many were woken.
    pub fn wake_all(&mut self, queue: WaitQueueId) -> Result<usize, KernelError> {
        let q = Self::check_queue(queue)?;
        let mut woken = 0;
        while let Some(idx) = self.wait_queues[q].pop_front(&mut self.tasks) {
            self.release(idx);
            woken += 1;
        }
        Ok(woken)
    }

    fn check_queue(queue: WaitQueueId) -> Result<usize, KernelError> {
        let q = queue.index();
        if q < MAX_WAIT_QUEUES {
            Ok(q)
        } else {
            Err(KernelError::InvalidWaitQueue)
        }
    }

    /// Blocked → Ready for a task just unlinked from its wait queue.
    fn release(&mut self, idx: usize) {
        let blockable = &mut self.tasks[idx].blockable;
        blockable.woken = true;
        blockable.queue = None;
        log::debug!("task {} woken", idx);
        self.make_ready(idx);
    }

    fn make_ready(&mut self, idx: usize) {
        let tcb = &mut self.tasks[idx];
        tcb.state = TaskState::Ready;
        let level = tcb.priority.index();
        self.ready[level].push_back(&mut self.tasks, idx);
        if level < self.running_level() {
            self.needs_reschedule = true;
        }
    }

    // -----------------------------------------------------------------------
    // Tick and dispatch
    // -----------------------------------------------------------------------

    /// Called from the tick interrupt.
    pub fn tick(&mut self) {
        self.tick_count += 1;

        let mut cursor = self.sleeping.front();
        while let Some(idx) = cursor {
            cursor = self.sleeping.next_of(&self.tasks, idx);
            let tcb = &mut self.tasks[idx];
            tcb.sleep_ticks = tcb.sleep_ticks.saturating_sub(1);
            if tcb.sleep_ticks == 0 {
                self.sleeping.remove(&mut self.tasks, idx);
                self.make_ready(idx);
            }
        }

        if let Some(idx) = self.current {
            let tcb = &mut self.tasks[idx];
            if idx != IDLE && tcb.state == TaskState::Running {
                tcb.slice_remaining = tcb.slice_remaining.saturating_sub(1);
                if tcb.slice_remaining == 0 {
                    tcb.slice_remaining = DEFAULT_TIME_SLICE;
                    let level = tcb.priority.index();
                    if !self.ready[level].is_empty() {
                        self.tasks[idx].state = TaskState::Ready;
                        self.ready[level].push_back(&mut self.tasks, idx);
                        self.needs_reschedule = true;
                    }
                }
            }
        }

        if let Some(level) = self.highest_ready() {
            if level.index() < self.running_level() {
                self.needs_reschedule = true;
            }
        }
    }

    /// Level of the task on the CPU, or `IDLE_LEVEL` when nothing real is
    /// running.
    fn running_level(&self) -> usize {
        match self.current {
            Some(idx) if idx != IDLE && self.tasks[idx].state == TaskState::Running => {
                self.tasks[idx].priority.index()
            }
            _ => IDLE_LEVEL,
        }
    }

    fn highest_ready(&self) -> Option<Priority> {
        Priority::ALL
            .iter()
            .copied()
            .find(|p| !self.ready[p.index()].is_empty())
    }

    fn pop_highest_ready(&mut self) -> Option<usize> {
        let level = self.highest_ready()?;
        let idx = self.ready[level.index()].pop_front(&mut self.tasks)?;
        debug_assert!(self.tasks[idx].is_runnable(), "task {} queued but not ready", idx);
        Some(idx)
    }

    /// Select the next task to run and make it current.
    ///
    /// If the current task is still Running it keeps the CPU unless a
    /// strictly higher level is ready, in which case it is requeued at the
    /// head of its level. A terminated current task is reclaimed here.
    ///
    /// # Returns
    /// Slot of the task to run (`IDLE` if nothing is ready).
    pub fn schedule(&mut self) -> usize {
        if let Some(cur) = self.current {
            match self.tasks[cur].state {
                TaskState::Running => {
                    let level = self.running_level();
                    match self.highest_ready() {
                        Some(p) if p.index() < level => {
                            self.tasks[cur].state = TaskState::Ready;
                            if cur != IDLE {
                                self.ready[level].push_front(&mut self.tasks, cur);
                            }
                        }
                        _ => {
                            debug_assert!(!self.tasks[cur].is_sched_linked());
                            self.needs_reschedule = false;
                            return cur;
                        }
                    }
                }
                TaskState::Terminated => self.reclaim(cur),
                _ => {}
            }
        }

        let next = self.pop_highest_ready().unwrap_or(IDLE);
        self.tasks[next].state = TaskState::Running;
        self.current = Some(next);
        self.needs_reschedule = false;
        next
    }

    /// Store the outgoing task's stack pointer, pick the next task, and
    /// return its saved stack pointer. A null `saved_sp` means there is no
    /// outgoing context (first dispatch).
    pub fn switch_context(&mut self, saved_sp: *mut u32) -> *mut u32 {
        if let Some(cur) = self.current {
            if !saved_sp.is_null() {
                self.tasks[cur].stack_pointer = saved_sp;
            }
        }
        let next = self.schedule();
        self.tasks[next].stack_pointer
    }

    // -----------------------------------------------------------------------
    // Error log
    // -----------------------------------------------------------------------

    /// Record a fault against the running task (if any).
    pub fn record_fault(&mut self, fault: Fault) {
        let task = self.current_id();
        log::warn!("fault {:?} (task {:?}, tick {})", fault, task, self.tick_count);
        self.errors.record(ErrorRecord {
            fault,
            task,
            tick: self.tick_count,
        });
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY: usize = 0x0800_0101;
    const EXIT: usize = 0x0800_0201;
    const IDLE_ENTRY: usize = 0x0800_0301;

    fn name(s: &str) -> TaskName {
        TaskName::try_from(s).unwrap()
    }

    fn spawn(s: &mut Scheduler, priority: Priority, label: &str) -> usize {
        let id = s.create_task(ENTRY, 0, priority, name(label), EXIT).unwrap();
        id.index as usize
    }

    fn started() -> Box<Scheduler> {
        let mut s = Box::new(Scheduler::new());
        s.start(IDLE_ENTRY).unwrap();
        s
    }

    fn assert_consistent(s: &Scheduler) {
        for idx in 0..MAX_TASKS {
            let t = s.task(idx);
            let expected = if t.active && t.state != TaskState::Terminated { 1 } else { 0 };
            assert_eq!(s.membership_count(idx), expected, "slot {} in {:?}", idx, t.state);
        }
    }

    #[test]
    fn test_create_queues_in_order() {
        let mut s = Box::new(Scheduler::new());
        let a = spawn(&mut s, Priority::Level1, "a");
        let b = spawn(&mut s, Priority::Level1, "b");
        let c = spawn(&mut s, Priority::Level0, "c");

        assert_eq!(s.live_tasks(), 3);
        assert!(s.ready_tasks(Priority::Level1).eq([a, b]));
        assert!(s.ready_tasks(Priority::Level0).eq([c]));
        assert_eq!(s.task(a).state, TaskState::Ready);
        assert_consistent(&s);
    }

    #[test]
    fn test_pool_exhaustion_leaves_tasks_intact() {
        let mut s = Box::new(Scheduler::new());
        for _ in 0..MAX_TASKS {
            spawn(&mut s, Priority::Level2, "w");
        }
        assert_eq!(
            s.create_task(ENTRY, 0, Priority::Level0, name("extra"), EXIT),
            Err(KernelError::PoolExhausted)
        );
        assert_eq!(s.live_tasks(), MAX_TASKS);
        assert!(s.ready_tasks(Priority::Level2).eq(0..MAX_TASKS));
        assert_eq!(s.ready_tasks(Priority::Level0).count(), 0);
        for idx in 0..MAX_TASKS {
            assert_eq!(s.task(idx).name, "w");
        }
    }

    #[test]
    fn test_rejects_null_entry() {
        let mut s = Box::new(Scheduler::new());
        assert_eq!(
            s.create_task(0, 0, Priority::Level0, name("null"), EXIT),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(s.live_tasks(), 0);
    }

    #[test]
    fn test_start_twice() {
        let mut s = started();
        assert_eq!(s.start(IDLE_ENTRY), Err(KernelError::AlreadyStarted));
    }

    #[test]
    fn test_syscalls_before_first_dispatch() {
        let mut s = Box::new(Scheduler::new());
        spawn(&mut s, Priority::Level0, "a");
        assert_eq!(s.yield_current(), Err(KernelError::NotStarted));
        assert_eq!(s.sleep_current(3), Err(KernelError::NotStarted));
        assert_eq!(s.destroy_current(), Err(KernelError::NotStarted));
    }

    #[test]
    fn test_idle_when_nothing_ready() {
        let mut s = started();
        assert_eq!(s.schedule(), IDLE);
        assert_eq!(s.task(IDLE).state, TaskState::Running);
        assert_eq!(s.task(IDLE).name, "idle");

        // Idle may yield but not block.
        assert_eq!(s.yield_current(), Ok(()));
        assert_eq!(s.schedule(), IDLE);
        assert_eq!(s.wait_current(WaitQueueId(0)), Err(KernelError::IdleTask));
        assert_eq!(s.sleep_current(5), Err(KernelError::IdleTask));
        assert_eq!(s.destroy_current(), Err(KernelError::IdleTask));
    }

    #[test]
    fn test_highest_priority_first() {
        let mut s = started();
        let low = spawn(&mut s, Priority::Level3, "low");
        let high = spawn(&mut s, Priority::Level0, "high");
        let mid = spawn(&mut s, Priority::Level1, "mid");

        assert_eq!(s.schedule(), high);
        s.destroy_current().unwrap();
        assert_eq!(s.schedule(), mid);
        s.destroy_current().unwrap();
        assert_eq!(s.schedule(), low);
    }

    #[test]
    fn test_yield_round_robin() {
        let mut s = started();
        let a = spawn(&mut s, Priority::Level0, "0a");
        let b = spawn(&mut s, Priority::Level0, "0b");
        let low = spawn(&mut s, Priority::Level1, "1");

        let mut order = [usize::MAX; 6];
        for slot in order.iter_mut() {
            *slot = s.schedule();
            s.yield_current().unwrap();
        }
        assert_eq!(order, [a, b, a, b, a, b]);
        assert_eq!(s.task(low).state, TaskState::Ready);
        assert_consistent(&s);
    }

    #[test]
    fn test_lone_yield_keeps_running() {
        let mut s = started();
        let a = spawn(&mut s, Priority::Level2, "a");
        assert_eq!(s.schedule(), a);
        s.yield_current().unwrap();
        assert!(s.needs_reschedule());
        assert_eq!(s.schedule(), a);
        assert!(!s.needs_reschedule());
    }

    #[test]
    fn test_wake_of_higher_priority_preempts() {
        let mut s = started();
        let high = spawn(&mut s, Priority::Level0, "high");
        let low = spawn(&mut s, Priority::Level2, "low");
        let peer = spawn(&mut s, Priority::Level2, "peer");
        let q = WaitQueueId(1);

        assert_eq!(s.schedule(), high);
        s.wait_current(q).unwrap();
        assert_eq!(s.schedule(), low);
        assert!(!s.needs_reschedule());

        // An interrupt wakes the high-priority task.
        assert_eq!(s.wake_one(q), Ok(Some(s.task(high).id)));
        assert!(s.needs_reschedule());
        assert_eq!(s.schedule(), high);

        // The preempted task kept its turn ahead of its peer.
        assert!(s.ready_tasks(Priority::Level2).eq([low, peer]));
        assert_consistent(&s);
    }

    #[test]
    fn test_tick_flags_pending_higher_priority() {
        let mut s = started();
        let low = spawn(&mut s, Priority::Level3, "low");
        assert_eq!(s.schedule(), low);

        // Ready but not yet selected: the next tick must preempt.
        let high = spawn(&mut s, Priority::Level1, "high");
        s.needs_reschedule = false;
        s.tick();
        assert!(s.needs_reschedule());
        assert_eq!(s.schedule(), high);
    }

    #[test]
    fn test_lower_priority_never_preempts() {
        let mut s = started();
        let high = spawn(&mut s, Priority::Level0, "high");
        spawn(&mut s, Priority::Level1, "low");
        assert_eq!(s.schedule(), high);
        for _ in 0..(DEFAULT_TIME_SLICE * 3) {
            s.tick();
            assert!(!s.needs_reschedule());
            assert_eq!(s.schedule(), high);
        }
    }

    #[test]
    fn test_time_slice_rotates_peers() {
        let mut s = started();
        let a = spawn(&mut s, Priority::Level1, "a");
        let b = spawn(&mut s, Priority::Level1, "b");

        assert_eq!(s.schedule(), a);
        for _ in 0..DEFAULT_TIME_SLICE - 1 {
            s.tick();
            assert!(!s.needs_reschedule());
        }
        s.tick();
        assert!(s.needs_reschedule());
        assert_eq!(s.schedule(), b);
        assert!(s.ready_tasks(Priority::Level1).eq([a]));
    }

    #[test]
    fn test_sleep_boundary() {
        let mut s = started();
        let sleeper = spawn(&mut s, Priority::Level0, "sleeper");
        spawn(&mut s, Priority::Level3, "bg");

        assert_eq!(s.schedule(), sleeper);
        s.sleep_current(3).unwrap();
        assert_eq!(s.task(sleeper).state, TaskState::Sleeping);
        assert_ne!(s.schedule(), sleeper);

        s.tick();
        s.tick();
        assert_eq!(s.task(sleeper).state, TaskState::Sleeping);
        assert_consistent(&s);

        s.tick();
        assert_eq!(s.task(sleeper).state, TaskState::Ready);
        assert!(s.needs_reschedule());
        assert_eq!(s.schedule(), sleeper);
    }

    #[test]
    fn test_sleep_zero_is_yield() {
        let mut s = started();
        let a = spawn(&mut s, Priority::Level0, "a");
        let b = spawn(&mut s, Priority::Level0, "b");
        assert_eq!(s.schedule(), a);
        s.sleep_current(0).unwrap();
        assert_eq!(s.task(a).state, TaskState::Ready);
        assert_eq!(s.schedule(), b);
    }

    #[test]
    fn test_sleepers_expire_in_order() {
        let mut s = started();
        let a = spawn(&mut s, Priority::Level2, "a");
        let b = spawn(&mut s, Priority::Level2, "b");

        assert_eq!(s.schedule(), a);
        s.sleep_current(2).unwrap();
        assert_eq!(s.schedule(), b);
        s.sleep_current(2).unwrap();
        assert_eq!(s.schedule(), IDLE);

        s.tick();
        s.tick();
        assert!(s.ready_tasks(Priority::Level2).eq([a, b]));
        assert_eq!(s.schedule(), a);
    }

    #[test]
    fn test_wait_and_wake_fifo() {
        let mut s = started();
        let a = spawn(&mut s, Priority::Level2, "a");
        let b = spawn(&mut s, Priority::Level1, "b");
        let q = WaitQueueId(3);

        assert_eq!(s.schedule(), b);
        s.wait_current(q).unwrap();
        assert_eq!(s.schedule(), a);
        s.wait_current(q).unwrap();
        assert_eq!(s.schedule(), IDLE);

        assert!(s.waiters(q).eq([b, a]));
        assert_eq!(s.task(a).blockable.queue(), Some(q));

        // Never selected while blocked.
        for _ in 0..5 {
            s.tick();
            assert_eq!(s.schedule(), IDLE);
        }

        assert_eq!(s.wake_all(q), Ok(2));
        assert!(s.task(a).blockable.was_woken());
        assert!(s.task(b).blockable.was_woken());
        assert_eq!(s.waiters(q).count(), 0);
        assert_consistent(&s);

        // Wake order was b, a, but priority decides who runs.
        assert_eq!(s.schedule(), b);
        assert!(s.ready_tasks(Priority::Level2).eq([a]));
    }

    #[test]
    fn test_wake_empty_and_invalid_queue() {
        let mut s = started();
        assert_eq!(s.wake_one(WaitQueueId(0)), Ok(None));
        assert_eq!(s.wake_all(WaitQueueId(0)), Ok(0));
        let bad = WaitQueueId(MAX_WAIT_QUEUES as u8);
        assert_eq!(s.wake_one(bad), Err(KernelError::InvalidWaitQueue));
        assert_eq!(s.wait_current(bad), Err(KernelError::InvalidWaitQueue));
    }

    #[test]
    fn test_destroy_current_reclaims_after_switch() {
        let mut s = started();
        let a = spawn(&mut s, Priority::Level0, "a");
        let old_id = s.task(a).id;

        assert_eq!(s.schedule(), a);
        s.destroy_current().unwrap();
        assert_eq!(s.task(a).state, TaskState::Terminated);
        // Still on the CPU, so the slot is not free yet.
        assert!(s.task(a).active);
        assert_eq!(s.live_tasks(), 0);
        assert!(s.needs_reschedule());

        assert_eq!(s.schedule(), IDLE);
        assert!(!s.task(a).active);
        assert_eq!(s.lookup(old_id), None);

        // The slot is reused under a new generation.
        let new_id = s.create_task(ENTRY, 0, Priority::Level0, name("a2"), EXIT).unwrap();
        assert_eq!(new_id.index, old_id.index);
        assert_ne!(new_id, old_id);
        assert_eq!(s.terminate(old_id), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_terminate_blocked_and_sleeping() {
        let mut s = started();
        let blocked = spawn(&mut s, Priority::Level0, "blocked");
        let sleeper = spawn(&mut s, Priority::Level0, "sleeper");
        let ready = spawn(&mut s, Priority::Level1, "ready");
        let q = WaitQueueId(2);

        assert_eq!(s.schedule(), blocked);
        s.wait_current(q).unwrap();
        assert_eq!(s.schedule(), sleeper);
        s.sleep_current(100).unwrap();
        assert_eq!(s.schedule(), ready);

        let blocked_id = s.task(blocked).id;
        let sleeper_id = s.task(sleeper).id;
        let ready_id = s.create_task(ENTRY, 0, Priority::Level2, name("r2"), EXIT).unwrap();

        s.terminate(blocked_id).unwrap();
        s.terminate(sleeper_id).unwrap();
        s.terminate(ready_id).unwrap();

        assert_eq!(s.waiters(q).count(), 0);
        assert_eq!(s.ready_tasks(Priority::Level2).count(), 0);
        assert!(!s.task(blocked).active);
        assert!(!s.task(sleeper).active);
        assert_eq!(s.live_tasks(), 1);
        assert_consistent(&s);

        // Nothing leaks back from the emptied queues.
        for _ in 0..200 {
            s.tick();
        }
        assert_eq!(s.wake_all(q), Ok(0));
        assert_eq!(s.schedule(), ready);
        assert_eq!(s.terminate(TaskId { index: IDLE as u8, generation: 0 }), Err(KernelError::IdleTask));
    }

    #[test]
    fn test_switch_context_saves_outgoing_sp() {
        let mut s = started();
        let a = spawn(&mut s, Priority::Level0, "a");
        let b = spawn(&mut s, Priority::Level0, "b");
        let b_sp = s.task(b).stack_pointer;

        let a_sp = s.switch_context(core::ptr::null_mut());
        assert_eq!(s.current(), Some(a));
        assert_eq!(a_sp, s.task(a).stack_pointer);

        // Pretend the task pushed some words before yielding.
        let moved = a_sp.wrapping_sub(4);
        s.yield_current().unwrap();
        assert_eq!(s.switch_context(moved), b_sp);
        assert_eq!(s.task(a).stack_pointer, moved);
    }

    #[test]
    fn test_record_fault_tags_running_task() {
        let mut s = started();
        let a = spawn(&mut s, Priority::Level0, "a");
        s.schedule();
        s.tick();
        s.record_fault(Fault::User(0x42));

        let last = s.errors().last().copied().unwrap();
        assert_eq!(last.fault, Fault::User(0x42));
        assert_eq!(last.task, Some(s.task(a).id));
        assert_eq!(last.tick, 1);
    }
}
