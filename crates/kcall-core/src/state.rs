//! Descriptor state.
//!
//! A descriptor cycles Idle → Queued → Completed → Idle. The state also
//! names the owner of the descriptor payload:
//!
//! | State     | Payload owner                          |
//! |-----------|----------------------------------------|
//! | Idle      | call site                              |
//! | Queued    | submission queue, then one worker      |
//! | Completed | completion queue, then the consumer    |

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KcallState {
    /// No outstanding call. The call site may submit or consume.
    Idle = 0,
    /// Sitting in the submission queue or executing on a worker.
    Queued = 1,
    /// Executed, sitting in the completion queue.
    Completed = 2,
}

impl KcallState {
    #[inline]
    pub const fn is_idle(&self) -> bool {
        matches!(self, KcallState::Idle)
    }

    /// True while the engine owns the descriptor.
    #[inline]
    pub const fn is_in_flight(&self) -> bool {
        !self.is_idle()
    }
}

impl From<u8> for KcallState {
    fn from(v: u8) -> Self {
        match v {
            1 => KcallState::Queued,
            2 => KcallState::Completed,
            _ => KcallState::Idle,
        }
    }
}

impl From<KcallState> for u8 {
    fn from(state: KcallState) -> u8 {
        state as u8
    }
}

impl fmt::Display for KcallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KcallState::Idle => write!(f, "IDLE"),
            KcallState::Queued => write!(f, "QUEUED"),
            KcallState::Completed => write!(f, "COMPLETED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight() {
        assert!(!KcallState::Idle.is_in_flight());
        assert!(KcallState::Queued.is_in_flight());
        assert!(KcallState::Completed.is_in_flight());
    }

    #[test]
    fn test_from_u8() {
        assert_eq!(KcallState::from(0), KcallState::Idle);
        assert_eq!(KcallState::from(1), KcallState::Queued);
        assert_eq!(KcallState::from(2), KcallState::Completed);
        assert_eq!(KcallState::from(7), KcallState::Idle);
        assert_eq!(u8::from(KcallState::Completed), 2);
    }
}
