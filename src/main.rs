//! # Popcorn Example Firmware
//!
//! Runs on an STM32F103 ("Blue Pill") and exercises every kernel service
//! with five tasks:
//!
//! | Task       | Priority | Behavior                                        |
//! |------------|----------|-------------------------------------------------|
//! | `consumer` | Level0   | Waits on `DATA_READY`, counts deliveries        |
//! | `producer` | Level1   | Produces, notifies, then sleeps for its period  |
//! | `worker_a` | Level2   | Busy work, yields to its peer, exits after 100  |
//! | `worker_b` | Level2   | Same as `worker_a`; the two alternate           |
//! | `watchdog` | Level3   | Checks delivery once a second, logs a fault     |
//!
//! Build with `--features firmware` (and `semihosting` for log output under
//! a debugger).

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use panic_halt as _;

use popcorn::arch::armv7m::{self, SYSCALLS};
use popcorn::{NotifyMode, Priority, WaitQueueId};

/// Signalled by the producer once per item.
const DATA_READY: WaitQueueId = WaitQueueId(0);

/// Fault code the watchdog reports when deliveries fall behind.
const ERR_BACKLOG: u32 = 0x0B10;
/// Fault code for a task that could not be created at boot.
const ERR_CREATE: u32 = 0x0C01;

static PRODUCED: AtomicU32 = AtomicU32::new(0);
static CONSUMED: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

extern "C" fn consumer(_: usize) {
    loop {
        if SYSCALLS.wait(DATA_READY).is_ok() {
            CONSUMED.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// `period` is in ticks.
extern "C" fn producer(period: usize) {
    loop {
        PRODUCED.fetch_add(1, Ordering::Relaxed);
        let _ = SYSCALLS.notify(DATA_READY, NotifyMode::One);
        let _ = SYSCALLS.sleep(period as u32);
    }
}

/// Returns after a bounded amount of work; the exit trampoline destroys
/// the task.
extern "C" fn worker(rounds: usize) {
    for _ in 0..rounds {
        let mut work: u32 = 0;
        for _ in 0..2000 {
            work = work.wrapping_add(1);
        }
        core::hint::black_box(work);
        let _ = SYSCALLS.yield_now();
    }
}

extern "C" fn watchdog(_: usize) {
    loop {
        let _ = SYSCALLS.sleep(1000);
        let backlog = PRODUCED
            .load(Ordering::Relaxed)
            .wrapping_sub(CONSUMED.load(Ordering::Relaxed));
        if backlog > 1 {
            let _ = SYSCALLS.register_error(ERR_BACKLOG);
        }
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Creates the tasks and starts the kernel. Does not
/// return.
#[entry]
fn main() -> ! {
    let mut cp = cortex_m::Peripherals::take().expect("core peripherals taken twice");

    #[cfg(feature = "semihosting")]
    armv7m::init_logging(log::LevelFilter::Debug);

    armv7m::init(&mut cp.SCB, &mut cp.SYST);

    let tasks: [(popcorn::task::TaskEntry, usize, Priority, &'static str); 5] = [
        (consumer, 0, Priority::Level0, "consumer"),
        (producer, 250, Priority::Level1, "producer"),
        (worker, 100, Priority::Level2, "worker_a"),
        (worker, 100, Priority::Level2, "worker_b"),
        (watchdog, 0, Priority::Level3, "watchdog"),
    ];
    for (entry, argument, priority, name) in tasks {
        if SYSCALLS.create_task(entry, argument, priority, name).is_err() {
            let _ = SYSCALLS.register_error(ERR_CREATE);
        }
    }

    // On success the first context switch abandons this stack.
    let _ = SYSCALLS.start_os();
    loop {
        cortex_m::asm::wfi();
    }
}
