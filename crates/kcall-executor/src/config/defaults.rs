//! Compile-time defaults for `KcallConfig`.

/// Submission queue capacity.
pub const SQ_CAPACITY: usize = 256;

/// Completion queue capacity. Also the outstanding-call budget.
pub const CQ_CAPACITY: usize = 256;

/// Worker threads.
pub const WORKERS: usize = 4;

/// Upper bound on worker threads.
pub const MAX_WORKERS: usize = 64;

/// Worker stack size in KiB. Workers only run blocking syscalls.
pub const WORKER_STACK_KB: usize = 256;

/// Pin worker `i` to CPU `FIRST_CPU + i`.
pub const PIN_WORKERS: bool = false;

pub const FIRST_CPU: usize = 0;
