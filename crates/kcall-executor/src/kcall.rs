//! The operation descriptor.
//!
//! A descriptor is split in two:
//!
//! - `KcallSlot`, reference counted, is what travels through the queues.
//!   It holds the atomic `op` and `state`, the payload and the handler.
//! - `Kcall`, the call-site handle. Not `Clone`; every async function
//!   takes `&mut Kcall`, so one call site at a time touches the payload
//!   while the slot is Idle.
//!
//! # Who may touch what
//!
//! | Field     | Idle          | Queued               | Completed            |
//! |-----------|---------------|----------------------|----------------------|
//! | `payload` | call site     | worker (after pop)   | consumer (after pop) |
//! | `op`      | call site     | anyone (cancel = 0)  | anyone (cancel = 0)  |
//! | `state`   | call site     | worker writes        | consumer writes      |
//! | `handler` | read-only     | read-only            | read-only            |
//!
//! Payload visibility rides on the queue hand-offs: the call site stores
//! `state = Queued` (Release) before the SQ push, the worker stores
//! `state = Completed` (Release) before the CQ push, the consumer stores
//! `state = Idle` (Release) after its pop. The call site loads `state`
//! with Acquire before reading or writing the payload.

use kcall_core::error::{KcallError, KcallResult};
use kcall_core::op::OpCode;
use kcall_core::state::KcallState;
use kcall_core::syscall::AddrHint;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::{FileStat, Mode};

use std::cell::UnsafeCell;
use std::fmt;
use std::net::SocketAddr;
use std::os::fd::{OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;

use crate::queue::KcallQueue;

/// Invoked by the completion consumer once a descriptor is Idle again
/// with a result buffered. Typically re-schedules the call site.
pub type KcallHandler = Box<dyn Fn() + Send + Sync>;

/// Result of a finished operation, keyed by operation kind.
pub enum Completion {
    Opened(OwnedFd),
    Info(FileStat),
    Read(Vec<u8>),
    Written(usize),
    Resolved(Vec<SocketAddr>),
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Opened(fd) => f.debug_tuple("Opened").field(fd).finish(),
            Completion::Info(st) => f.debug_struct("Info").field("st_size", &st.st_size).finish(),
            Completion::Read(buf) => f.debug_tuple("Read").field(&buf.len()).finish(),
            Completion::Written(n) => f.debug_tuple("Written").field(n).finish(),
            Completion::Resolved(addrs) => f.debug_tuple("Resolved").field(addrs).finish(),
        }
    }
}

/// Per-operation arguments, and the outcome once executed.
pub(crate) enum Payload {
    Empty,
    FileOpen { path: PathBuf, flags: OFlag, mode: Mode },
    FileInfo { fd: RawFd },
    FileRead { fd: RawFd, buf: Vec<u8> },
    FileReadAt { fd: RawFd, buf: Vec<u8>, offset: u64 },
    FileWrite { fd: RawFd, data: Vec<u8> },
    FileWriteAt { fd: RawFd, data: Vec<u8>, offset: u64 },
    NetResolve { host: String, port: u16, hint: AddrHint },
    Done(Result<Completion, Errno>),
}

impl Payload {
    /// Operation code matching the argument variant.
    pub(crate) fn op_code(&self) -> OpCode {
        match self {
            Payload::FileOpen { .. } => OpCode::FileOpen,
            Payload::FileInfo { .. } => OpCode::FileInfo,
            Payload::FileRead { .. } => OpCode::FileRead,
            Payload::FileReadAt { .. } => OpCode::FileReadAt,
            Payload::FileWrite { .. } => OpCode::FileWrite,
            Payload::FileWriteAt { .. } => OpCode::FileWriteAt,
            Payload::NetResolve { .. } => OpCode::NetResolve,
            Payload::Empty | Payload::Done(_) => OpCode::None,
        }
    }
}

pub(crate) struct KcallSlot {
    op: AtomicU16,
    state: AtomicU8,
    payload: UnsafeCell<Payload>,
    handler: Option<KcallHandler>,
}

// Safety: `payload` is only accessed by the current owner as defined by
// `state` (see module docs); ownership moves through the SQ/CQ whose
// push/pop pairs synchronize. `op`/`state` are atomics, `handler` is
// immutable and Sync.
unsafe impl Sync for KcallSlot {}

impl KcallSlot {
    fn new(handler: Option<KcallHandler>) -> Self {
        Self {
            op: AtomicU16::new(OpCode::None.as_raw()),
            state: AtomicU8::new(KcallState::Idle as u8),
            payload: UnsafeCell::new(Payload::Empty),
            handler,
        }
    }

    #[inline]
    pub(crate) fn op(&self) -> OpCode {
        OpCode::from(self.op.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_op(&self, op: OpCode) {
        self.op.store(op.as_raw(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn take_op(&self) -> OpCode {
        OpCode::from(self.op.swap(OpCode::None.as_raw(), Ordering::AcqRel))
    }

    #[inline]
    pub(crate) fn state(&self) -> KcallState {
        KcallState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: KcallState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Mutable access to the payload.
    ///
    /// # Safety
    /// The caller must be the current owner of the slot: the call site
    /// while Idle, the worker that popped it from the SQ, or the consumer
    /// that popped it from the CQ (before it stores Idle).
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn payload_mut(&self) -> &mut Payload {
        &mut *self.payload.get()
    }

    #[inline]
    pub(crate) fn handler(&self) -> Option<&KcallHandler> {
        self.handler.as_ref()
    }
}

/// Call-site handle of an operation descriptor.
///
/// Represents at most one outstanding call. Reuse it for the next call
/// once the previous result has been consumed.
pub struct Kcall {
    slot: Arc<KcallSlot>,
    queue: Option<Arc<KcallQueue>>,
}

impl Kcall {
    /// Descriptor bound to `queue`, without a completion handler (the
    /// call site polls).
    pub fn new(queue: Arc<KcallQueue>) -> Self {
        Self {
            slot: Arc::new(KcallSlot::new(None)),
            queue: Some(queue),
        }
    }

    /// Descriptor bound to `queue`; `handler` runs on the completion
    /// consumer after every delivered (not cancelled) completion.
    pub fn with_handler<F>(queue: Arc<KcallQueue>, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            slot: Arc::new(KcallSlot::new(Some(Box::new(handler)))),
            queue: Some(queue),
        }
    }

    /// Degenerate descriptor: every call runs synchronously in place.
    pub fn blocking() -> Self {
        Self {
            slot: Arc::new(KcallSlot::new(None)),
            queue: None,
        }
    }

    pub fn state(&self) -> KcallState {
        self.slot.state()
    }

    /// Operation currently submitted or buffered; `None` when idle,
    /// consumed or cancelled.
    pub fn op(&self) -> OpCode {
        self.slot.op()
    }

    pub fn queue(&self) -> Option<&Arc<KcallQueue>> {
        self.queue.as_ref()
    }

    /// Best-effort cancel. A syscall already running is not interrupted;
    /// its completion is discarded by the consumer and the handler does
    /// not run. `state` is left alone.
    ///
    /// A result already back but not yet consumed is dropped here (an
    /// opened descriptor is closed).
    pub fn cancel(&self) {
        if self.slot.take_op().is_none() {
            return;
        }
        let state = self.slot.state();
        if state.is_idle() {
            // Safety: Idle means the call site owns the payload. Only the
            // caller that won the `op` swap gets here, and every `&mut`
            // path is excluded while `&self` is borrowed.
            unsafe {
                *self.slot.payload_mut() = Payload::Empty;
            }
        }
        kcall_core::ktrace!("kcall cancelled in state {}", state);
    }

    /// Consume path of the reentrant convention.
    ///
    /// `Err(Busy)` while a call is outstanding; `Ok(Some(outcome))` when a
    /// finished call is buffered; `Ok(None)` when the descriptor is free
    /// for a new submission.
    pub(crate) fn take_completion(&mut self) -> KcallResult<Option<Result<Completion, Errno>>> {
        if self.slot.state().is_in_flight() {
            return Err(KcallError::Busy);
        }
        if self.slot.take_op().is_none() {
            return Ok(None);
        }
        // Safety: state is Idle, so the call site owns the payload.
        let payload = unsafe { std::mem::replace(self.slot.payload_mut(), Payload::Empty) };
        match payload {
            Payload::Done(outcome) => Ok(Some(outcome)),
            _ => Err(KcallError::Busy),
        }
    }

    /// Submit path of the reentrant convention. Always returns an error
    /// value: `InProgress` on success, `QueueFull` when rejected.
    pub(crate) fn submit(&mut self, queue: &KcallQueue, payload: Payload) -> KcallError {
        let op = payload.op_code();
        debug_assert!(!op.is_none());
        // Safety: state is Idle (checked by take_completion), the call
        // site owns the payload. Any stale outcome is dropped here.
        unsafe {
            *self.slot.payload_mut() = payload;
        }
        self.slot.set_op(op);
        self.slot.set_state(KcallState::Queued);

        match queue.submit(Arc::clone(&self.slot)) {
            Ok(()) => KcallError::InProgress,
            Err(e) => {
                // Rejected: nothing else holds the slot, undo.
                self.slot.set_op(OpCode::None);
                unsafe {
                    *self.slot.payload_mut() = Payload::Empty;
                }
                self.slot.set_state(KcallState::Idle);
                e
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn slot(&self) -> &Arc<KcallSlot> {
        &self.slot
    }
}

impl Drop for Kcall {
    fn drop(&mut self) {
        // An in-flight slot outlives the handle through the queues; make
        // sure its handler never fires for a call site that is gone.
        self.cancel();
    }
}

impl fmt::Debug for Kcall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kcall")
            .field("op", &self.op())
            .field("state", &self.state())
            .field("queued", &self.queue.is_some())
            .finish()
    }
}

/// Cancel the outstanding call on `kc`. See `Kcall::cancel`.
pub fn kcall_cancel(kc: &Kcall) {
    kc.cancel();
}
