//! # kcall-core — Trait definitions for kcall
//!
//! kcall turns blocking kernel calls (open, fstat, read, pread, write,
//! pwrite, getaddrinfo) into pollable operations. A caller fills a
//! descriptor, the descriptor travels through a bounded submission queue
//! to a worker thread, the worker runs the call synchronously and hands
//! the descriptor back through a bounded completion queue.
//!
//! This crate holds the vocabulary shared by every other kcall crate:
//!
//! - `op` - operation codes carried by a descriptor
//! - `state` - descriptor states (Idle / Queued / Completed)
//! - `error` - the `KcallError` taxonomy
//! - `syscall` - `SyscallTable`, the registry of synchronous calls
//! - `wake` - `SubmitSignal` (wakes workers) and `WakeEvent` (wakes the
//!   completion consumer)
//! - `kprint` - leveled stderr logging macros
//! - `env` - environment variable helpers used by configuration
//!
//! Default implementations of the traits live in `kcall-sys`; the engine
//! itself lives in `kcall-executor`.

pub mod op;
pub mod state;
pub mod error;
pub mod syscall;
pub mod wake;
pub mod kprint;
pub mod env;

pub use error::{KcallError, KcallResult};
pub use op::OpCode;
pub use state::KcallState;
pub use syscall::{AddrHint, SyscallTable};
pub use wake::{SubmitSignal, WakeEvent};
pub use env::{env_get, env_get_bool, env_get_opt};
