//! Engine configuration.
//!
//! Compile-time defaults (`defaults`) with runtime environment overrides.
//!
//! ```rust,ignore
//! use kcall_executor::config::KcallConfig;
//!
//! let config = KcallConfig::from_env().workers(2).sq_capacity(64);
//! ```

pub mod defaults;

use kcall_core::env::{env_get, env_get_bool};
use kcall_core::error::{KcallError, KcallResult};

/// Queue sizing and worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KcallConfig {
    pub sq_capacity: usize,
    pub cq_capacity: usize,
    /// Number of worker threads (clamped to `1..=MAX_WORKERS` on start)
    pub workers: usize,
    /// Worker stack size in bytes
    pub worker_stack_size: usize,
    pub pin_workers: bool,
    /// First CPU used when pinning
    pub first_cpu: usize,
}

impl Default for KcallConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl KcallConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `KCALL_SQ_CAPACITY` - Submission queue capacity
    /// - `KCALL_CQ_CAPACITY` - Completion queue capacity
    /// - `KCALL_WORKERS` - Number of worker threads
    /// - `KCALL_WORKER_STACK_KB` - Worker stack size in KiB
    /// - `KCALL_PIN_WORKERS` - Pin workers to CPUs (0/1)
    /// - `KCALL_FIRST_CPU` - First CPU for pinning
    pub fn from_env() -> Self {
        Self {
            sq_capacity: env_get("KCALL_SQ_CAPACITY", defaults::SQ_CAPACITY),
            cq_capacity: env_get("KCALL_CQ_CAPACITY", defaults::CQ_CAPACITY),
            workers: env_get("KCALL_WORKERS", defaults::WORKERS),
            worker_stack_size: env_get("KCALL_WORKER_STACK_KB", defaults::WORKER_STACK_KB)
                .saturating_mul(1024),
            pin_workers: env_get_bool("KCALL_PIN_WORKERS", defaults::PIN_WORKERS),
            first_cpu: env_get("KCALL_FIRST_CPU", defaults::FIRST_CPU),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            sq_capacity: defaults::SQ_CAPACITY,
            cq_capacity: defaults::CQ_CAPACITY,
            workers: defaults::WORKERS,
            worker_stack_size: defaults::WORKER_STACK_KB * 1024,
            pin_workers: defaults::PIN_WORKERS,
            first_cpu: defaults::FIRST_CPU,
        }
    }

    // Builder methods

    pub fn sq_capacity(mut self, cap: usize) -> Self {
        self.sq_capacity = cap;
        self
    }

    pub fn cq_capacity(mut self, cap: usize) -> Self {
        self.cq_capacity = cap;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = bytes;
        self
    }

    pub fn pin_workers(mut self, first_cpu: usize) -> Self {
        self.pin_workers = true;
        self.first_cpu = first_cpu;
        self
    }

    /// Worker count actually started.
    pub fn effective_workers(&self) -> usize {
        self.workers.clamp(1, defaults::MAX_WORKERS)
    }

    /// CPU for worker `index`, if pinning is enabled. `None` when the CPU
    /// number would overflow.
    pub fn cpu_for(&self, index: usize) -> Option<usize> {
        if !self.pin_workers {
            return None;
        }
        self.first_cpu.checked_add(index)
    }

    pub fn validate(&self) -> KcallResult<()> {
        if self.sq_capacity == 0 {
            return Err(KcallError::Config("sq_capacity must be > 0"));
        }
        if self.cq_capacity == 0 {
            return Err(KcallError::Config("cq_capacity must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("kcall configuration:");
        eprintln!("  sq_capacity:        {}", self.sq_capacity);
        eprintln!("  cq_capacity:        {}", self.cq_capacity);
        eprintln!("  workers:            {}", self.effective_workers());
        eprintln!("  worker_stack_size:  {}", self.worker_stack_size);
        eprintln!("  pin_workers:        {}", self.pin_workers);
        eprintln!("  first_cpu:          {}", self.first_cpu);
    }
}
