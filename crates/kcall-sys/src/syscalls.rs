//! `SysCalls` — default `SyscallTable` implementation.
//!
//! Each entry is one blocking system call. The errno is captured right
//! after the call on the same thread, so a worker can store result and
//! error together and ship them back to the call site.
//!
//! Descriptors opened here always carry `O_CLOEXEC`.

use kcall_core::syscall::{AddrHint, SyscallTable};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::{FileStat, Mode};
use nix::NixPath;

use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct SysCalls;

impl SysCalls {
    pub const fn new() -> Self {
        SysCalls
    }
}

#[inline]
fn to_off(offset: u64) -> Result<libc::off_t, Errno> {
    libc::off_t::try_from(offset).map_err(|_| Errno::EINVAL)
}

#[inline]
fn to_len(ret: libc::ssize_t) -> Result<usize, Errno> {
    Errno::result(ret).map(|n| n as usize)
}

impl SyscallTable for SysCalls {
    fn file_open(&self, path: &Path, flags: OFlag, mode: Mode) -> Result<OwnedFd, Errno> {
        let flags = flags | OFlag::O_CLOEXEC;
        let fd = path.with_nix_path(|p| unsafe {
            libc::open(p.as_ptr(), flags.bits(), mode.bits() as libc::c_uint)
        })?;
        let fd = Errno::result(fd)?;
        // Safety: open(2) just returned this descriptor and nobody else owns it.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn file_info(&self, fd: RawFd) -> Result<FileStat, Errno> {
        let mut st = MaybeUninit::<libc::stat>::uninit();
        let ret = unsafe { libc::fstat(fd, st.as_mut_ptr()) };
        Errno::result(ret)?;
        // Safety: fstat(2) filled the struct on success.
        Ok(unsafe { st.assume_init() })
    }

    fn file_read(&self, fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno> {
        to_len(unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) })
    }

    fn file_read_at(&self, fd: RawFd, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
        let off = to_off(offset)?;
        to_len(unsafe { libc::pread(fd, buf.as_mut_ptr().cast(), buf.len(), off) })
    }

    fn file_write(&self, fd: RawFd, buf: &[u8]) -> Result<usize, Errno> {
        to_len(unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) })
    }

    fn file_write_at(&self, fd: RawFd, buf: &[u8], offset: u64) -> Result<usize, Errno> {
        let off = to_off(offset)?;
        to_len(unsafe { libc::pwrite(fd, buf.as_ptr().cast(), buf.len(), off) })
    }

    fn resolve(&self, host: &str, port: u16, hint: AddrHint) -> Result<Vec<SocketAddr>, Errno> {
        crate::resolve::resolve(host, port, hint)
    }
}
