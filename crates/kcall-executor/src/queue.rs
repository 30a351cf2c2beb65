//! `KcallQueue` — the submission/completion queue pair.
//!
//! ```text
//!  call sites ──push──▶ SQ ──pop──▶ worker(s) ──push──▶ CQ ──pop──▶ consumer
//!       │                               ▲                 │            │
//!       └── SubmitSignal::post ─────────┘                 └─ WakeEvent::post (empty → non-empty)
//! ```
//!
//! Both queues are fixed-capacity `ArrayQueue`s allocated once. Pushes
//! never block: a full SQ rejects the submission with `QueueFull`.
//!
//! The CQ can never overflow. Every submission reserves one unit of the
//! outstanding budget (= CQ capacity) and the consumer releases it when it
//! pops the completion, so at most `cq_capacity` descriptors are between
//! submission and hand-back at any time. A CQ push failure therefore means
//! the invariant is broken and the process aborts rather than lose a
//! completion.
//!
//! Wake dedup: `wake_pending` is set by the worker that posts the wake
//! event and cleared by the consumer before it drains. Completions that
//! land while the flag is set do not post again, so a burst of K
//! completions during a drain produces at most one extra wake.
//!
//! Both sides touch the flag with an AcqRel swap, never a plain store.
//! All swaps sit in one modification order. A worker does `push; swap(true)`
//! and the consumer does `swap(false); pop..`. If the worker's swap reads
//! `true` it either follows a later worker's post (the consumer will be
//! woken again) or precedes the consumer's swap, in which case the
//! consumer's swap reads it and synchronizes with it, so the consumer's
//! pops see the pushed completion. No completion is left in the CQ with
//! the flag set and no wake outstanding.
//!
//! A handler that panics mid-drain leaves the rest of the CQ behind; the
//! drain guard re-posts the wake during the unwind.

use kcall_core::error::{KcallError, KcallResult};
use kcall_core::state::KcallState;
use kcall_core::syscall::SyscallTable;
use kcall_core::wake::{SubmitSignal, WakeEvent};
use kcall_core::{kdebug, kerror, ktrace, kwarn};

use kcall_sys::{PlatformWake, Semaphore, SysCalls};

use crossbeam_queue::ArrayQueue;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::KcallConfig;
use crate::dispatch;
use crate::kcall::{KcallSlot, Payload};

/// Counters for diagnostics. All Relaxed; values are hints.
#[derive(Debug, Default)]
pub struct QueueStats {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub executed: AtomicU64,
    pub skipped: AtomicU64,
    pub delivered: AtomicU64,
    pub discarded: AtomicU64,
    pub wakes: AtomicU64,
}

pub struct KcallQueue {
    sq: ArrayQueue<Arc<KcallSlot>>,
    cq: ArrayQueue<Arc<KcallSlot>>,
    /// Wakes SQ readers on submit (optional).
    signal: Option<Arc<dyn SubmitSignal>>,
    /// Wakes the CQ reader on empty → non-empty (optional).
    wake: Option<Arc<dyn WakeEvent>>,
    wake_pending: AtomicBool,
    /// Descriptors between submission and consumer hand-back.
    outstanding: AtomicUsize,
    syscalls: Arc<dyn SyscallTable>,
    stats: QueueStats,
}

impl KcallQueue {
    pub fn builder(sq_capacity: usize, cq_capacity: usize) -> KcallQueueBuilder {
        KcallQueueBuilder {
            sq_capacity,
            cq_capacity,
            signal: None,
            wake: None,
            syscalls: None,
        }
    }

    /// Queue pair sized from `config`, with the platform semaphore and
    /// wake event and the default syscall table.
    pub fn from_config(config: &KcallConfig) -> KcallResult<Arc<Self>> {
        config.validate()?;
        Self::builder(config.sq_capacity, config.cq_capacity)
            .signal(Arc::new(Semaphore::new(0)))
            .wake(Arc::new(PlatformWake::create()?))
            .build()
    }

    pub fn sq_capacity(&self) -> usize {
        self.sq.capacity()
    }

    pub fn cq_capacity(&self) -> usize {
        self.cq.capacity()
    }

    pub fn sq_len(&self) -> usize {
        self.sq.len()
    }

    pub fn cq_len(&self) -> usize {
        self.cq.len()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn has_signal(&self) -> bool {
        self.signal.is_some()
    }

    /// The consumer-side wake event, for registration with an event loop.
    pub fn wake_event(&self) -> Option<&Arc<dyn WakeEvent>> {
        self.wake.as_ref()
    }

    pub(crate) fn syscalls(&self) -> &dyn SyscallTable {
        &*self.syscalls
    }

    /// Enqueue a slot the call site has already marked Queued.
    pub(crate) fn submit(&self, slot: Arc<KcallSlot>) -> KcallResult<()> {
        let cap = self.cq.capacity();
        let reserved = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < cap).then_some(n + 1));
        if reserved.is_err() {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            kdebug!("kcall rejected: {} outstanding", cap);
            return Err(KcallError::QueueFull);
        }

        if self.sq.push(slot).is_err() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            kdebug!("kcall rejected: SQ full ({})", self.sq.capacity());
            return Err(KcallError::QueueFull);
        }

        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        if let Some(signal) = &self.signal {
            signal.post();
        }
        Ok(())
    }

    /// Drain the SQ: execute every pending descriptor and move it to the CQ.
    ///
    /// Worker side; never blocks except inside the syscalls themselves.
    /// Returns the number of descriptors moved.
    pub fn process_sq(&self) -> usize {
        let mut n = 0;
        while let Some(slot) = self.sq.pop() {
            self.execute(&slot);
            slot.set_state(KcallState::Completed);
            self.complete(slot);
            n += 1;
        }
        n
    }

    fn execute(&self, slot: &KcallSlot) {
        // Safety: popped from the SQ; this worker owns the payload until
        // it stores Completed.
        let payload = unsafe { slot.payload_mut() };
        let op = slot.op();
        if op.is_none() {
            // Cancelled before pickup: skip the call, still hand back.
            *payload = Payload::Empty;
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            ktrace!("kcall skipped: cancelled before execution");
            return;
        }
        let args = std::mem::replace(payload, Payload::Empty);
        debug_assert_eq!(args.op_code(), op);
        *payload = dispatch::execute(args, self.syscalls());
        self.stats.executed.fetch_add(1, Ordering::Relaxed);
    }

    fn complete(&self, slot: Arc<KcallSlot>) {
        if self.cq.push(slot).is_err() {
            kerror!(
                "kcall CQ overflow: capacity {} outstanding {}",
                self.cq.capacity(),
                self.outstanding()
            );
            std::process::abort();
        }
        self.post_wake();
    }

    /// Drain the CQ: return descriptors to Idle and run their handlers.
    ///
    /// Single consumer (the event loop thread). Cancelled descriptors are
    /// returned to Idle without running the handler. Returns the number
    /// of completions delivered (not discarded).
    pub fn process_cq(&self) -> usize {
        self.wake_pending.swap(false, Ordering::AcqRel);
        let _guard = DrainGuard(self);
        let mut delivered = 0;
        while let Some(slot) = self.cq.pop() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            if slot.op().is_none() {
                // Safety: popped from the CQ and not yet Idle, the
                // consumer owns the payload. Drops any stale outcome
                // (e.g. closes a descriptor opened for a cancelled call).
                unsafe {
                    *slot.payload_mut() = Payload::Empty;
                }
                slot.set_state(KcallState::Idle);
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                ktrace!("kcall completion discarded: cancelled");
                continue;
            }
            slot.set_state(KcallState::Idle);
            if let Some(handler) = slot.handler() {
                handler();
            }
            delivered += 1;
        }
        self.stats.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    fn post_wake(&self) {
        if let Some(wake) = &self.wake {
            if !self.wake_pending.swap(true, Ordering::AcqRel) {
                self.stats.wakes.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = wake.post() {
                    kwarn!("kcall wake event post failed: {}", e);
                }
            }
        }
    }

    /// Block until a submission is signalled. Worker side.
    ///
    /// Without a `SubmitSignal` this sleeps briefly instead.
    pub fn wait_submission(&self) {
        match &self.signal {
            Some(signal) => signal.wait(),
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }

    /// Like `wait_submission` with an upper bound. Returns false on timeout.
    pub fn wait_submission_timeout(&self, timeout: Duration) -> bool {
        match &self.signal {
            Some(signal) => signal.wait_timeout(timeout),
            None => {
                std::thread::sleep(timeout);
                false
            }
        }
    }

    /// Post the submit signal `n` times without submitting anything.
    /// Used to release blocked workers on shutdown.
    pub(crate) fn kick_workers(&self, n: usize) {
        if let Some(signal) = &self.signal {
            for _ in 0..n {
                signal.post();
            }
        }
    }
}

/// Re-posts the wake if a handler unwinds out of `process_cq` with
/// completions still queued.
struct DrainGuard<'a>(&'a KcallQueue);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() && !self.0.cq.is_empty() {
            kwarn!("kcall handler panicked, {} completions left", self.0.cq.len());
            self.0.post_wake();
        }
    }
}

impl std::fmt::Debug for KcallQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KcallQueue")
            .field("sq", &format_args!("{}/{}", self.sq.len(), self.sq.capacity()))
            .field("cq", &format_args!("{}/{}", self.cq.len(), self.cq.capacity()))
            .field("outstanding", &self.outstanding())
            .field("signal", &self.signal.is_some())
            .field("wake", &self.wake.is_some())
            .finish()
    }
}

pub struct KcallQueueBuilder {
    sq_capacity: usize,
    cq_capacity: usize,
    signal: Option<Arc<dyn SubmitSignal>>,
    wake: Option<Arc<dyn WakeEvent>>,
    syscalls: Option<Arc<dyn SyscallTable>>,
}

impl KcallQueueBuilder {
    pub fn signal(mut self, signal: Arc<dyn SubmitSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn wake(mut self, wake: Arc<dyn WakeEvent>) -> Self {
        self.wake = Some(wake);
        self
    }

    /// Replace the default `SysCalls` table.
    pub fn syscalls(mut self, syscalls: Arc<dyn SyscallTable>) -> Self {
        self.syscalls = Some(syscalls);
        self
    }

    pub fn build(self) -> KcallResult<Arc<KcallQueue>> {
        if self.sq_capacity == 0 {
            return Err(KcallError::Config("sq_capacity must be > 0"));
        }
        if self.cq_capacity == 0 {
            return Err(KcallError::Config("cq_capacity must be > 0"));
        }
        Ok(Arc::new(KcallQueue {
            sq: ArrayQueue::new(self.sq_capacity),
            cq: ArrayQueue::new(self.cq_capacity),
            signal: self.signal,
            wake: self.wake,
            wake_pending: AtomicBool::new(false),
            outstanding: AtomicUsize::new(0),
            syscalls: self.syscalls.unwrap_or_else(|| Arc::new(SysCalls::new())),
            stats: QueueStats::default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kcall::Kcall;
    use crate::ops::file_write_async;
    use crate::pool::WorkerPool;

    use std::os::fd::{AsRawFd, OwnedFd};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[derive(Default)]
    struct CountingWake {
        posts: AtomicUsize,
    }

    impl WakeEvent for CountingWake {
        fn post(&self) -> KcallResult<()> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dev_null() -> OwnedFd {
        std::fs::OpenOptions::new().write(true).open("/dev/null").unwrap().into()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(KcallQueue::builder(0, 1).build(), Err(KcallError::Config(_))));
        assert!(matches!(KcallQueue::builder(1, 0).build(), Err(KcallError::Config(_))));
    }

    #[test]
    fn test_wait_submission_timeout() {
        let q = KcallQueue::builder(2, 2).signal(Arc::new(Semaphore::new(0))).build().unwrap();
        assert!(!q.wait_submission_timeout(Duration::from_millis(10)));

        let null = dev_null();
        let mut kc = Kcall::new(q.clone());
        assert_eq!(file_write_async(null.as_raw_fd(), b"s", &mut kc), Err(KcallError::InProgress));
        assert!(q.wait_submission_timeout(Duration::from_millis(10)));
        assert!(!q.wait_submission_timeout(Duration::from_millis(1)));

        let unsignalled = KcallQueue::builder(2, 2).build().unwrap();
        assert!(!unsignalled.wait_submission_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_handler_panic_reposts_wake() {
        let wake = Arc::new(CountingWake::default());
        let q = KcallQueue::builder(4, 4).wake(wake.clone()).build().unwrap();
        let null = dev_null();
        let fd = null.as_raw_fd();

        let mut bad = Kcall::with_handler(q.clone(), || panic!("handler failure"));
        let mut good = Kcall::new(q.clone());
        file_write_async(fd, b"1", &mut bad).unwrap_err();
        file_write_async(fd, b"2", &mut good).unwrap_err();
        assert_eq!(q.process_sq(), 2);
        assert_eq!(wake.posts.load(Ordering::SeqCst), 1);

        assert!(catch_unwind(AssertUnwindSafe(|| q.process_cq())).is_err());
        assert_eq!(q.cq_len(), 1);
        assert_eq!(wake.posts.load(Ordering::SeqCst), 2);

        assert_eq!(q.process_cq(), 1);
        assert_eq!(file_write_async(fd, b"2", &mut good), Ok(1));
        assert_eq!(q.outstanding(), 0);
    }

    /// The consumer only drains when the wake fd fires. A completion left
    /// in the CQ with no wake posted shows up as a poll timeout.
    #[test]
    fn test_wake_driven_consumer_never_stranded() {
        const CALLS: usize = 8;
        const ROUNDS: usize = 200;

        let config = KcallConfig::new().sq_capacity(CALLS).cq_capacity(CALLS).workers(2);
        let q = KcallQueue::from_config(&config).unwrap();
        let _pool = WorkerPool::start(q.clone(), &config).unwrap();
        let wake = q.wake_event().unwrap().clone();
        let wake_fd = wake.raw_fd().unwrap();
        let null = dev_null();
        let fd = null.as_raw_fd();

        let mut calls: Vec<Kcall> = (0..CALLS).map(|_| Kcall::new(q.clone())).collect();
        for _ in 0..ROUNDS {
            for kc in calls.iter_mut() {
                assert_eq!(file_write_async(fd, b"w", kc), Err(KcallError::InProgress));
            }
            let mut delivered = 0;
            while delivered < CALLS {
                let mut pfd = libc::pollfd { fd: wake_fd, events: libc::POLLIN, revents: 0 };
                let n = unsafe { libc::poll(&mut pfd, 1, 2000) };
                assert_eq!(n, 1, "stranded: {:?}", q);
                wake.drain();
                delivered += q.process_cq();
            }
            for kc in calls.iter_mut() {
                assert_eq!(file_write_async(fd, b"w", kc), Ok(1));
            }
        }
        assert_eq!(q.outstanding(), 0);
    }
}
