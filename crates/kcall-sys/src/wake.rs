//! Postable wake events for the completion-queue consumer.
//!
//! - `EventFdWake` (Linux/Android): one eventfd. `post()` adds 1 to the
//!   counter, `drain()` reads and resets it. Posts coalesce in the
//!   counter, so a reader waking once sees all of them.
//! - `PipeWake` (all unix): self-pipe. `post()` writes one byte, `drain()`
//!   reads until empty. A full pipe already means "wake pending".
//!
//! Both descriptors are non-blocking and close-on-exec, and both expose
//! the readable end via `raw_fd()` for registration with epoll/kqueue/poll.

use kcall_core::error::{KcallError, KcallResult};
use kcall_core::wake::WakeEvent;

use nix::errno::Errno;

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        pub type PlatformWake = EventFdWake;
    } else {
        pub type PlatformWake = PipeWake;
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub struct EventFdWake {
    fd: OwnedFd,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl EventFdWake {
    pub fn create() -> KcallResult<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        let fd = Errno::result(fd)?;
        // Safety: freshly created, not shared.
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl WakeEvent for EventFdWake {
    fn post(&self) -> KcallResult<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        match Errno::result(ret) {
            Ok(_) => Ok(()),
            // Counter saturated: a wake is already pending.
            Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(KcallError::Os(e)),
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.fd.as_raw_fd())
    }

    fn drain(&self) -> u64 {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret == std::mem::size_of::<u64>() as isize {
            val
        } else {
            0
        }
    }
}

pub struct PipeWake {
    rd: OwnedFd,
    wr: OwnedFd,
}

fn set_nonblock_cloexec(fd: RawFd) -> Result<(), Errno> {
    let fl = Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) })?;
    let fdfl = Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFD, fdfl | libc::FD_CLOEXEC) })?;
    Ok(())
}

impl PipeWake {
    pub fn create() -> KcallResult<Self> {
        let mut fds = [0 as libc::c_int; 2];
        Errno::result(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
        // Safety: pipe(2) returned two fresh descriptors.
        let (rd, wr) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        set_nonblock_cloexec(rd.as_raw_fd())?;
        set_nonblock_cloexec(wr.as_raw_fd())?;
        Ok(Self { rd, wr })
    }
}

impl WakeEvent for PipeWake {
    fn post(&self) -> KcallResult<()> {
        let b = [1u8];
        let ret = unsafe { libc::write(self.wr.as_raw_fd(), b.as_ptr().cast(), 1) };
        match Errno::result(ret) {
            Ok(_) | Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(KcallError::Os(e)),
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.rd.as_raw_fd())
    }

    fn drain(&self) -> u64 {
        let mut buf = [0u8; 64];
        let mut total = 0u64;
        loop {
            let ret = unsafe { libc::read(self.rd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
            if ret <= 0 {
                break;
            }
            total += ret as u64;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_post_drain(w: &dyn WakeEvent) {
        assert!(w.raw_fd().is_some());
        assert_eq!(w.drain(), 0);
        w.post().unwrap();
        w.post().unwrap();
        assert_eq!(w.drain(), 2);
        assert_eq!(w.drain(), 0);
    }

    fn readable(fd: RawFd) -> bool {
        let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
        let n = unsafe { libc::poll(&mut pfd, 1, 0) };
        n == 1 && (pfd.revents & libc::POLLIN) != 0
    }

    #[test]
    fn test_pipe_post_drain() {
        check_post_drain(&PipeWake::create().unwrap());
    }

    #[test]
    fn test_platform_post_drain() {
        check_post_drain(&PlatformWake::create().unwrap());
    }

    #[test]
    fn test_post_makes_fd_readable() {
        let w = PlatformWake::create().unwrap();
        let fd = w.raw_fd().unwrap();
        assert!(!readable(fd));
        w.post().unwrap();
        assert!(readable(fd));
        w.drain();
        assert!(!readable(fd));
    }
}
