//! Counting semaphore used as the submission-queue `SubmitSignal`.
//!
//! Every successful submission posts once; each idle worker blocks in
//! `wait()` until a post is available. Counting (rather than a wake flag)
//! means no submission can be lost between a worker's last empty dequeue
//! and its wait.

pub mod condvar;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        pub mod futex;
        pub use futex::FutexSemaphore as Semaphore;
    } else {
        pub use condvar::CondvarSemaphore as Semaphore;
    }
}
