//! Synchronous syscall table.
//!
//! A `SyscallTable` is the fixed registry of blocking operations the
//! engine can offload. Every entry has the shape
//! `(typed input) -> Result<output, Errno>`: the error is captured on the
//! thread that made the call, together with the result, so it can travel
//! back to the call site unchanged.
//!
//! # Implementors
//!
//! - `SysCalls` (kcall-sys, default): thin wrappers over nix/libc.
//! - Test tables that gate or count calls to make worker timing
//!   deterministic.

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::{FileStat, Mode};

use std::net::SocketAddr;
use std::os::fd::{OwnedFd, RawFd};
use std::path::Path;

/// Address family filter for name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrHint {
    #[default]
    Any,
    Ipv4,
    Ipv6,
}

/// Blocking operations dispatched by workers.
///
/// **Contract:** every method may block; none of them is ever called on
/// the completion consumer's thread when a queue pair is configured.
pub trait SyscallTable: Send + Sync {
    /// `open(2)`. The returned descriptor is owned by the caller.
    fn file_open(&self, path: &Path, flags: OFlag, mode: Mode) -> Result<OwnedFd, Errno>;

    /// `fstat(2)`.
    fn file_info(&self, fd: RawFd) -> Result<FileStat, Errno>;

    /// `read(2)` at the current file position.
    fn file_read(&self, fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno>;

    /// `pread(2)`. Does not move the file position.
    fn file_read_at(&self, fd: RawFd, buf: &mut [u8], offset: u64) -> Result<usize, Errno>;

    /// `write(2)` at the current file position.
    fn file_write(&self, fd: RawFd, buf: &[u8]) -> Result<usize, Errno>;

    /// `pwrite(2)`. Does not move the file position.
    fn file_write_at(&self, fd: RawFd, buf: &[u8], offset: u64) -> Result<usize, Errno>;

    /// `getaddrinfo(3)`: resolve `host` into socket addresses carrying `port`.
    fn resolve(&self, host: &str, port: u16, hint: AddrHint) -> Result<Vec<SocketAddr>, Errno>;
}
