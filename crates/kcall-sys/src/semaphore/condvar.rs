//! Portable counting semaphore on `Mutex` + `Condvar`.
//!
//! Default on platforms without futex; always built so it can be tested
//! everywhere.

use kcall_core::wake::SubmitSignal;

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub struct CondvarSemaphore {
    count: Mutex<u32>,
    cond: Condvar,
}

impl CondvarSemaphore {
    pub fn new(initial: u32) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    // The count stays consistent even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, u32> {
        self.count.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CondvarSemaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SubmitSignal for CondvarSemaphore {
    fn post(&self) {
        *self.lock() += 1;
        self.cond.notify_one();
    }

    fn wait(&self) {
        let mut count = self.lock();
        while *count == 0 {
            count = self.cond.wait(count).unwrap_or_else(|e| e.into_inner());
        }
        *count -= 1;
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.lock();
        while *count == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = match self.cond.wait_timeout(count, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        *count -= 1;
        true
    }

    fn try_wait(&self) -> bool {
        let mut count = self.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }
}
