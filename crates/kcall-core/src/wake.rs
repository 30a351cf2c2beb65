//! Wake channel abstraction.
//!
//! Two independent primitives keep both sides of the queue pair from
//! busy-polling:
//!
//! - `SubmitSignal` is a counting semaphore. Every successful submission
//!   posts it once; idle workers block in `wait()`.
//! - `WakeEvent` is a postable event for the completion consumer (usually
//!   an event loop). The engine posts it only when the completion queue
//!   goes from empty to non-empty, and not again until the consumer has
//!   started draining.
//!
//! Both are optional. Without a `SubmitSignal` somebody must call
//! `process_sq()` by hand; without a `WakeEvent` the consumer must poll
//! `process_cq()`.

use crate::error::KcallResult;

use std::os::fd::RawFd;
use std::time::Duration;

/// Counting semaphore that wakes submission-queue readers.
///
/// **Contract:**
/// - `post()` must NEVER block.
/// - Posts are counted, not coalesced: N posts release N waits.
pub trait SubmitSignal: Send + Sync {
    /// Increment the count and wake one waiter.
    fn post(&self);

    /// Block until the count is positive, then decrement it.
    fn wait(&self);

    /// Like `wait()` with an upper bound. Returns false on timeout.
    fn wait_timeout(&self, timeout: Duration) -> bool;

    /// Decrement without blocking. Returns false if the count was zero.
    fn try_wait(&self) -> bool;
}

/// Postable event that wakes the completion-queue reader.
///
/// **Contract:**
/// - `post()` must NEVER block.
/// - Multiple posts before the consumer drains may coalesce.
pub trait WakeEvent: Send + Sync {
    /// Signal that completions are available.
    fn post(&self) -> KcallResult<()>;

    /// Descriptor an event loop can register for readability, if any.
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }

    /// Consume pending posts. Returns how many were pending; 0 when the
    /// primitive cannot tell.
    fn drain(&self) -> u64 {
        0
    }
}
