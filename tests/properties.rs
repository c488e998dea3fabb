//! Randomized operation sequences against the scheduler, checking the
//! queue-membership and task-pool invariants after every step.

use std::collections::HashSet;

use popcorn::config::{MAX_TASKS, MAX_WAIT_QUEUES};
use popcorn::scheduler::{Scheduler, IDLE};
use popcorn::task::{Priority, TaskId, TaskName, TaskState};
use popcorn::{KernelError, WaitQueueId};
use proptest::prelude::*;

const ENTRY: usize = 0x0800_0101;
const EXIT: usize = 0x0800_0201;

#[derive(Debug, Clone)]
enum Op {
    Create(Priority),
    DestroyCurrent,
    Terminate(usize),
    Yield,
    Sleep(u32),
    Wait(u8),
    WakeOne(u8),
    WakeAll(u8),
    Tick,
    Schedule,
}

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Level0),
        Just(Priority::Level1),
        Just(Priority::Level2),
        Just(Priority::Level3),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    let queue = 0..MAX_WAIT_QUEUES as u8;
    prop_oneof![
        3 => priority().prop_map(Op::Create),
        1 => Just(Op::DestroyCurrent),
        1 => (0..MAX_TASKS).prop_map(Op::Terminate),
        2 => Just(Op::Yield),
        2 => (0..6u32).prop_map(Op::Sleep),
        2 => queue.clone().prop_map(Op::Wait),
        2 => queue.clone().prop_map(Op::WakeOne),
        1 => queue.prop_map(Op::WakeAll),
        3 => Just(Op::Tick),
        3 => Just(Op::Schedule),
    ]
}

fn check(s: &Scheduler) -> Result<(), TestCaseError> {
    prop_assert!(s.live_tasks() <= MAX_TASKS);

    let mut live = 0;
    for idx in 0..MAX_TASKS {
        let t = s.task(idx);
        let alive = t.active && t.state != TaskState::Terminated;
        live += alive as usize;
        let expected = if alive { 1 } else { 0 };
        prop_assert_eq!(s.membership_count(idx), expected, "slot {} in {:?}", idx, t.state);
        if t.state == TaskState::Blocked {
            prop_assert!(t.blockable.queue().is_some());
        }
    }
    prop_assert_eq!(live, s.live_tasks());

    if let Some(cur) = s.current() {
        let t = s.task(cur);
        if t.state == TaskState::Running {
            // The running task never sits below a ready level.
            if !s.needs_reschedule() {
                let level = if cur == IDLE { Priority::COUNT } else { t.priority.index() };
                for p in &Priority::ALL[..level] {
                    prop_assert_eq!(s.ready_tasks(*p).count(), 0);
                }
            }
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn scheduler_invariants_hold(ops in proptest::collection::vec(op(), 1..200)) {
        let mut s = Box::new(Scheduler::new());
        s.start(0x0800_0301).unwrap();
        s.schedule();

        let mut issued: HashSet<TaskId> = HashSet::new();
        let mut destroyed: Vec<TaskId> = Vec::new();

        for op in ops {
            match op {
                Op::Create(p) => {
                    let occupied = (0..MAX_TASKS).filter(|&i| s.task(i).active).count();
                    let name = TaskName::try_from("p").unwrap();
                    match s.create_task(ENTRY, 0, p, name, EXIT) {
                        Ok(id) => {
                            prop_assert!(issued.insert(id), "id {:?} handed out twice", id);
                        }
                        Err(e) => {
                            prop_assert_eq!(e, KernelError::PoolExhausted);
                            prop_assert_eq!(occupied, MAX_TASKS);
                        }
                    }
                }
                Op::DestroyCurrent => {
                    let id = s.current_id();
                    if s.destroy_current().is_ok() {
                        destroyed.extend(id);
                    }
                }
                Op::Terminate(slot) => {
                    let id = s.task(slot).id;
                    if s.terminate(id).is_ok() {
                        destroyed.push(id);
                    }
                }
                Op::Yield => { let _ = s.yield_current(); }
                Op::Sleep(n) => { let _ = s.sleep_current(n); }
                Op::Wait(q) => { let _ = s.wait_current(WaitQueueId(q)); }
                Op::WakeOne(q) => { s.wake_one(WaitQueueId(q)).unwrap(); }
                Op::WakeAll(q) => { s.wake_all(WaitQueueId(q)).unwrap(); }
                Op::Tick => s.tick(),
                Op::Schedule => { s.schedule(); }
            }
            // The pended context switch runs before anything else.
            if s.needs_reschedule() {
                s.schedule();
            }
            check(&s)?;
            for id in &destroyed {
                prop_assert_eq!(s.lookup(*id), None);
            }
        }
    }
}
