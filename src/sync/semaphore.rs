//! Counting semaphore

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Counting semaphore built on a mutex and condition variable
pub struct Semaphore {
    count: Mutex<u32>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Block until the count is positive, then take one
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    /// Returns true if a count was taken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count == 0 {
            if self.cond.wait_until(&mut count, deadline).timed_out() {
                break;
            }
        }
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Take one without blocking
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Release one waiter. Never blocks, safe from callback context.
    pub fn signal(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_add(1);
        self.cond.notify_one();
    }

    pub fn count(&self) -> u32 {
        *self.count.lock()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}
