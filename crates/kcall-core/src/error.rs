//! kcall error types.

use nix::errno::Errno;
use std::fmt;

/// Outcome of an asynchronous kcall function other than a real result.
///
/// `InProgress` is a sentinel, not a failure: the call was accepted and
/// the call site must invoke the same function again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KcallError {
    /// Accepted and queued; poll again with the same descriptor.
    InProgress,
    /// The descriptor already has an outstanding call, or the buffered
    /// result belongs to a different operation.
    Busy,
    /// Submission queue at capacity (or the completion budget is used up).
    QueueFull,
    /// Error returned by the wrapped system call, verbatim.
    Os(Errno),
    /// Invalid configuration detected at construction time.
    Config(&'static str),
}

impl KcallError {
    #[inline]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, KcallError::InProgress)
    }

    /// True for conditions the caller resolves by retrying later.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, KcallError::Busy | KcallError::QueueFull)
    }

    /// The errno equivalent of this condition.
    pub fn errno(&self) -> Errno {
        match self {
            KcallError::InProgress => Errno::EINPROGRESS,
            KcallError::Busy => Errno::EBUSY,
            KcallError::QueueFull => Errno::EAGAIN,
            KcallError::Os(e) => *e,
            KcallError::Config(_) => Errno::EINVAL,
        }
    }
}

impl fmt::Display for KcallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "operation in progress"),
            Self::Busy => write!(f, "descriptor busy"),
            Self::QueueFull => write!(f, "submission queue full"),
            Self::Os(e) => write!(f, "OS error: {}", e),
            Self::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for KcallError {}

impl From<Errno> for KcallError {
    fn from(e: Errno) -> Self {
        KcallError::Os(e)
    }
}

impl From<KcallError> for std::io::Error {
    fn from(e: KcallError) -> Self {
        match e {
            KcallError::Config(msg) => std::io::Error::new(std::io::ErrorKind::InvalidInput, msg),
            other => std::io::Error::from_raw_os_error(other.errno() as i32),
        }
    }
}

pub type KcallResult<T> = std::result::Result<T, KcallError>;
