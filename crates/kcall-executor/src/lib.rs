//! # kcall-executor — The engine
//!
//! Turns blocking kernel calls into pollable operations:
//!
//! ```text
//! call site                 worker(s)                 event loop
//! ─────────                 ─────────                 ──────────
//! file_read_async(kc) ─SQ─▶ process_sq():             wake fd readable
//!   → InProgress              run the syscall   ─CQ─▶ process_cq():
//!                             state = Completed         state = Idle
//!                             post wake (once)          handler()
//! file_read_async(kc)  ◀──────────────────────────────── (re-schedule)
//!   → Ok(bytes)
//! ```
//!
//! Nothing here owns a thread except `WorkerPool`. An application may
//! instead call `KcallQueue::process_sq` from its own threads, and must
//! call `KcallQueue::process_cq` from exactly one consumer thread,
//! typically when `KcallQueue::wake_event` becomes readable.
//!
//! A `Kcall` created with `Kcall::blocking` has no queue pair and every
//! call runs synchronously in place.

pub mod config;
pub mod kcall;
pub mod queue;
pub mod ops;
pub mod pool;

mod dispatch;

pub use config::KcallConfig;
pub use kcall::{kcall_cancel, Completion, Kcall, KcallHandler};
pub use ops::{
    file_info_async, file_open_async, file_read_async, file_read_at_async, file_write_async,
    file_write_at_async, resolve_async,
};
pub use pool::WorkerPool;
pub use queue::{KcallQueue, KcallQueueBuilder, QueueStats};

pub use kcall_core::{AddrHint, KcallError, KcallResult, KcallState, OpCode};
