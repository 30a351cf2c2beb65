//! Linux futex-based counting semaphore.
//!
//! The futex word is the count itself. A waiter sleeps with
//! `FUTEX_WAIT(count, 0)`, so a post that lands between the waiter's
//! failed decrement and its sleep makes the kernel return EAGAIN instead
//! of sleeping.
//!
//! `waiters` lets `post()` skip the wake syscall when nobody sleeps. The
//! count increment and the waiters check are both SeqCst, mirrored on the
//! waiter side, so either the poster sees the waiter or the waiter sees
//! the new count.

use kcall_core::wake::SubmitSignal;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

pub struct FutexSemaphore {
    count: AtomicU32,
    waiters: AtomicU32,
}

impl FutexSemaphore {
    pub fn new(initial: u32) -> Self {
        Self {
            count: AtomicU32::new(initial),
            waiters: AtomicU32::new(0),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut cur = self.count.load(Ordering::SeqCst);
        while cur > 0 {
            match self.count.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
        false
    }

    /// FUTEX_WAIT while the count is 0. Spurious returns are fine: the
    /// caller loops.
    fn futex_wait(&self, timeout: Option<Duration>) {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as _,
        });
        let ts_ptr = match &ts {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.count.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                0u32,
                ts_ptr,
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn futex_wake_one(&self) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.count.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn acquire(&self, deadline: Option<Instant>) -> bool {
        if self.try_acquire() {
            return true;
        }
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let acquired = loop {
            if self.try_acquire() {
                break true;
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        break false;
                    }
                    Some(d - now)
                }
                None => None,
            };
            self.futex_wait(remaining);
        };
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        acquired
    }
}

impl Default for FutexSemaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SubmitSignal for FutexSemaphore {
    fn post(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            self.futex_wake_one();
        }
    }

    fn wait(&self) {
        self.acquire(None);
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        self.acquire(Some(Instant::now() + timeout))
    }

    fn try_wait(&self) -> bool {
        self.try_acquire()
    }
}
