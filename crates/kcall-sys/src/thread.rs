//! Worker thread helpers: spawn with an explicit stack size, pin to a
//! CPU, report the OS thread id.
//!
//! Pinning is supported on Linux/Android (`sched_setaffinity`). Elsewhere
//! `pin_current` reports `ENOSYS` and the worker keeps running unpinned.

use nix::errno::Errno;

use std::thread::{self, JoinHandle};

/// Minimum stack accepted for a worker. `getaddrinfo` alone can use tens
/// of KiB.
pub const MIN_STACK_SIZE: usize = 64 * 1024;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        /// Pin the calling thread to `cpu`.
        pub fn pin_current(cpu: usize) -> Result<(), Errno> {
            use nix::sched::{sched_setaffinity, CpuSet};
            use nix::unistd::Pid;

            let mut set = CpuSet::new();
            set.set(cpu)?;
            sched_setaffinity(Pid::from_raw(0), &set)
        }

        /// Kernel thread id of the calling thread.
        pub fn current_tid() -> u64 {
            (unsafe { libc::syscall(libc::SYS_gettid) }) as u64
        }
    } else {
        pub fn pin_current(_cpu: usize) -> Result<(), Errno> {
            Err(Errno::ENOSYS)
        }

        pub fn current_tid() -> u64 {
            (unsafe { libc::pthread_self() }) as usize as u64
        }
    }
}

/// Spawn a named thread with `stack_size` bytes of stack (at least
/// `MIN_STACK_SIZE`), optionally pinned to `cpu` before `f` runs.
///
/// A pinning failure is logged and ignored; a spawn failure is returned
/// as the errno the OS reported.
pub fn spawn_worker<F, T>(
    name: String,
    stack_size: usize,
    cpu: Option<usize>,
    f: F,
) -> Result<JoinHandle<T>, Errno>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .stack_size(stack_size.max(MIN_STACK_SIZE))
        .spawn(move || {
            if let Some(cpu) = cpu {
                if let Err(e) = pin_current(cpu) {
                    kcall_core::kwarn!("cannot pin to cpu {}: {}", cpu, e);
                }
            }
            f()
        })
        .map_err(|e| Errno::from_raw(e.raw_os_error().unwrap_or(libc::EAGAIN)))
}
