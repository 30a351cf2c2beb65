//! `WorkerPool` — threads that drain the submission queue.
//!
//! N named threads, each looping: drain SQ, check shutdown, block on the
//! submit signal. The pool owns nothing but the threads; all work state
//! lives in the `KcallQueue`.

use kcall_core::error::{KcallError, KcallResult};
use kcall_core::{kdebug, kinfo};

use kcall_sys::thread::spawn_worker;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::KcallConfig;
use crate::queue::KcallQueue;

/// Shared state between the pool handle and its workers.
struct PoolInner {
    queue: Arc<KcallQueue>,
    /// Workers currently draining the SQ.
    active: AtomicUsize,
    /// Descriptors moved SQ → CQ by this pool.
    executed: AtomicU64,
    shutdown: AtomicBool,
}

pub struct WorkerPool {
    inner: Arc<PoolInner>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `config.effective_workers()` workers on `queue`.
    ///
    /// The queue must have a submit signal; workers would otherwise have
    /// nothing to block on. If a spawn fails, the workers already started
    /// are stopped before the error is returned.
    pub fn start(queue: Arc<KcallQueue>, config: &KcallConfig) -> KcallResult<Self> {
        if !queue.has_signal() {
            return Err(KcallError::Config("worker pool requires a submit signal"));
        }
        let n = config.effective_workers();
        let inner = Arc::new(PoolInner {
            queue,
            active: AtomicUsize::new(0),
            executed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let mut pool = WorkerPool {
            inner,
            handles: Vec::with_capacity(n),
        };
        for worker_id in 0..n {
            let inner = Arc::clone(&pool.inner);
            let handle = spawn_worker(
                format!("kcall-worker-{}", worker_id),
                config.worker_stack_size,
                config.cpu_for(worker_id),
                move || worker_loop(inner, worker_id),
            )?;
            pool.handles.push(handle);
        }
        kdebug!("kcall worker pool started: {} workers", n);
        Ok(pool)
    }

    pub fn queue(&self) -> &Arc<KcallQueue> {
        &self.inner.queue
    }

    pub fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    pub fn total_workers(&self) -> usize {
        self.handles.len()
    }

    pub fn executed(&self) -> u64 {
        self.inner.executed.load(Ordering::Relaxed)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stop and join all workers. Descriptors still in the SQ stay there.
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.queue.kick_workers(self.handles.len());
        for handle in self.handles.drain(..) {
            // Worker panics are not propagated.
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .field("active", &self.active_workers())
            .field("executed", &self.executed())
            .finish()
    }
}

/// Worker thread main loop.
fn worker_loop(inner: Arc<PoolInner>, worker_id: usize) {
    kinfo!("kcall worker {} started", worker_id);
    loop {
        inner.active.fetch_add(1, Ordering::Relaxed);
        let n = inner.queue.process_sq();
        inner.active.fetch_sub(1, Ordering::Relaxed);
        if n > 0 {
            inner.executed.fetch_add(n as u64, Ordering::Relaxed);
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        inner.queue.wait_submission();
    }
    kinfo!("kcall worker {} exiting", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kcall::Kcall;
    use crate::ops::file_write_async;
    use std::time::{Duration, Instant};

    fn pipe() -> (std::os::fd::OwnedFd, std::os::fd::OwnedFd) {
        nix::unistd::pipe().unwrap()
    }

    fn wait_until<F: FnMut() -> bool>(mut f: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_requires_signal() {
        let queue = KcallQueue::builder(4, 4).build().unwrap();
        let err = WorkerPool::start(queue, &KcallConfig::new().workers(1)).unwrap_err();
        assert!(matches!(err, KcallError::Config(_)));
    }

    #[test]
    fn test_start_and_shutdown() {
        let queue = KcallQueue::from_config(&KcallConfig::new().sq_capacity(8).cq_capacity(8)).unwrap();
        let mut pool = WorkerPool::start(queue, &KcallConfig::new().workers(3)).unwrap();
        assert_eq!(pool.total_workers(), 3);
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert_eq!(pool.total_workers(), 0);
        // Second shutdown is a no-op.
        pool.shutdown();
    }

    #[test]
    fn test_workers_execute_submissions() {
        let queue = KcallQueue::from_config(&KcallConfig::new().sq_capacity(16).cq_capacity(16)).unwrap();
        let pool = WorkerPool::start(Arc::clone(&queue), &KcallConfig::new().workers(2)).unwrap();
        let (_r, w) = pipe();
        use std::os::fd::AsRawFd;

        let mut calls: Vec<Kcall> = (0..4).map(|_| Kcall::new(Arc::clone(&queue))).collect();
        for kc in calls.iter_mut() {
            assert_eq!(file_write_async(w.as_raw_fd(), b"x", kc), Err(KcallError::InProgress));
        }
        assert!(wait_until(|| queue.cq_len() == 4));
        assert_eq!(queue.process_cq(), 4);
        for kc in calls.iter_mut() {
            assert_eq!(file_write_async(w.as_raw_fd(), b"x", kc), Ok(1));
        }
        assert!(wait_until(|| pool.executed() == 4));
    }
}
