//! # kcall-sys — Default (safe) implementations
//!
//! This crate provides the default implementation for every kcall trait,
//! plus the thread helpers the worker pool is built on.
//!
//! ## Default stack
//!
//! | Trait          | Default Impl                 | Notes                          |
//! |----------------|------------------------------|--------------------------------|
//! | SyscallTable   | SysCalls                     | nix/libc wrappers              |
//! | SubmitSignal   | Semaphore                    | futex (Linux/Android), condvar |
//! | WakeEvent      | PlatformWake                 | EventFdWake (Linux/Android), PipeWake |

pub mod syscalls;
pub mod resolve;
pub mod semaphore;
pub mod wake;
pub mod thread;

pub use semaphore::Semaphore;
pub use syscalls::SysCalls;
pub use wake::{PipeWake, PlatformWake};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use wake::EventFdWake;
