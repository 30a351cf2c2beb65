//! Operation codes.
//!
//! The code is stored in an atomic next to the descriptor payload so it
//! can be cleared (cancelled) from the call site while the payload is
//! owned by a worker. `OpCode::None` (0) means idle, consumed or cancelled.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OpCode {
    /// No operation: idle, already consumed, or cancelled.
    None = 0,
    FileOpen = 1,
    FileInfo = 2,
    FileRead = 3,
    FileReadAt = 4,
    FileWrite = 5,
    FileWriteAt = 6,
    NetResolve = 7,
}

impl OpCode {
    /// Raw value as stored in the descriptor's atomic.
    #[inline]
    pub const fn as_raw(self) -> u16 {
        self as u16
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        matches!(self, OpCode::None)
    }

    pub const fn name(self) -> &'static str {
        match self {
            OpCode::None => "none",
            OpCode::FileOpen => "file_open",
            OpCode::FileInfo => "file_info",
            OpCode::FileRead => "file_read",
            OpCode::FileReadAt => "file_read_at",
            OpCode::FileWrite => "file_write",
            OpCode::FileWriteAt => "file_write_at",
            OpCode::NetResolve => "net_resolve",
        }
    }
}

impl From<u16> for OpCode {
    fn from(v: u16) -> Self {
        match v {
            1 => OpCode::FileOpen,
            2 => OpCode::FileInfo,
            3 => OpCode::FileRead,
            4 => OpCode::FileReadAt,
            5 => OpCode::FileWrite,
            6 => OpCode::FileWriteAt,
            7 => OpCode::NetResolve,
            _ => OpCode::None, // unknown codes are never dispatched
        }
    }
}

impl From<OpCode> for u16 {
    fn from(op: OpCode) -> u16 {
        op as u16
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
