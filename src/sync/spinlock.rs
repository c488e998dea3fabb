//! Test-and-set spinlock.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Busy-waiting lock over a single-byte availability flag.
///
/// There is no owner tracking and no recursion: a context that calls
/// [`lock`](Self::lock) twice without unlocking spins forever. Unlocking a
/// lock that is not held is a contract violation the caller must avoid.
///
/// On a single core, spinning on a lock held by the context you preempted
/// never terminates; interrupt handlers should use
/// [`try_lock`](Self::try_lock) or [`lock_bounded`](Self::lock_bounded).
pub struct SpinLock {
    available: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self { available: AtomicBool::new(true) }
    }

    /// Spin until the flag is swapped from free to held.
    #[inline]
    pub fn lock(&self) {
        while !self.try_lock() {
            spin_loop();
        }
    }

    /// One acquisition attempt.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.available.swap(false, Ordering::Acquire)
    }

    /// Spin for at most `max_spins` attempts. Returns whether the lock was
    /// acquired.
    pub fn lock_bounded(&self, max_spins: u32) -> bool {
        for _ in 0..max_spins {
            if self.try_lock() {
                return true;
            }
            spin_loop();
        }
        false
    }

    #[inline]
    pub fn unlock(&self) {
        self.available.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        !self.available.load(Ordering::Relaxed)
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}
