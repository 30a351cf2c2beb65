//! Asynchronous kcall functions.
//!
//! Every function follows the same reentrant convention on its `Kcall`:
//!
//! 1. No queue pair: run the call synchronously, return the real result.
//! 2. A call is outstanding (`Queued`/`Completed`): `Err(Busy)`.
//! 3. A result is buffered: return it and clear it (consume).
//! 4. Otherwise submit: `Err(InProgress)` if accepted, `Err(QueueFull)`
//!    if the queue pair cannot take it (the descriptor stays Idle).
//!
//! After `InProgress`, the call site waits for the handler (or polls
//! `Kcall::state`) and calls the same function again to collect the
//! result. Arguments passed to the collecting call are ignored.
//!
//! ```rust,ignore
//! match file_read_async(fd, 4096, &mut kc) {
//!     Err(KcallError::InProgress) => return Poll::Pending,
//!     Ok(buf) => consume(buf),
//!     Err(e) => fail(e),
//! }
//! ```

use kcall_core::error::{KcallError, KcallResult};
use kcall_core::syscall::{AddrHint, SyscallTable};

use kcall_sys::SysCalls;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::{FileStat, Mode};

use std::net::SocketAddr;
use std::os::fd::{OwnedFd, RawFd};
use std::path::Path;

use crate::kcall::{Completion, Kcall, Payload};

/// Table used by descriptors without a queue pair.
static BLOCKING: SysCalls = SysCalls::new();

fn reenter<T>(
    kc: &mut Kcall,
    args: impl FnOnce() -> Result<Payload, Errno>,
    blocking: impl FnOnce(&dyn SyscallTable) -> Result<T, Errno>,
    unpack: impl FnOnce(Completion) -> Option<T>,
) -> KcallResult<T> {
    let queue = match kc.queue() {
        Some(queue) => queue.clone(),
        None => return blocking(&BLOCKING).map_err(KcallError::Os),
    };
    match kc.take_completion()? {
        Some(Ok(done)) => unpack(done).ok_or(KcallError::Busy),
        Some(Err(e)) => Err(KcallError::Os(e)),
        None => Err(match args() {
            Ok(payload) => kc.submit(&queue, payload),
            Err(e) => KcallError::Os(e),
        }),
    }
}

/// Zeroed read buffer. An allocation the process cannot make is ENOMEM,
/// not a panic.
fn read_buf(size: usize) -> Result<Vec<u8>, Errno> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).map_err(|_| Errno::ENOMEM)?;
    buf.resize(size, 0);
    Ok(buf)
}

fn read_into(
    size: usize,
    read: impl FnOnce(&mut [u8]) -> Result<usize, Errno>,
) -> Result<Vec<u8>, Errno> {
    let mut buf = read_buf(size)?;
    let n = read(&mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

/// Open `path`. `O_CLOEXEC` is always added.
pub fn file_open_async(
    path: &Path,
    flags: OFlag,
    mode: Mode,
    kc: &mut Kcall,
) -> KcallResult<OwnedFd> {
    reenter(
        kc,
        || Ok(Payload::FileOpen { path: path.to_path_buf(), flags, mode }),
        |sys| sys.file_open(path, flags, mode),
        |done| match done {
            Completion::Opened(fd) => Some(fd),
            _ => None,
        },
    )
}

/// `fstat` on `fd`.
pub fn file_info_async(fd: RawFd, kc: &mut Kcall) -> KcallResult<FileStat> {
    reenter(
        kc,
        || Ok(Payload::FileInfo { fd }),
        |sys| sys.file_info(fd),
        |done| match done {
            Completion::Info(st) => Some(st),
            _ => None,
        },
    )
}

/// Read up to `size` bytes at the current position. The returned buffer
/// holds exactly the bytes read; empty at end of file. A `size` that
/// cannot be allocated fails with ENOMEM without submitting.
pub fn file_read_async(fd: RawFd, size: usize, kc: &mut Kcall) -> KcallResult<Vec<u8>> {
    reenter(
        kc,
        || Ok(Payload::FileRead { fd, buf: read_buf(size)? }),
        |sys| read_into(size, |buf| sys.file_read(fd, buf)),
        |done| match done {
            Completion::Read(buf) => Some(buf),
            _ => None,
        },
    )
}

/// Read up to `size` bytes at `offset` without moving the file position.
pub fn file_read_at_async(
    fd: RawFd,
    size: usize,
    offset: u64,
    kc: &mut Kcall,
) -> KcallResult<Vec<u8>> {
    reenter(
        kc,
        || Ok(Payload::FileReadAt { fd, buf: read_buf(size)?, offset }),
        |sys| read_into(size, |buf| sys.file_read_at(fd, buf, offset)),
        |done| match done {
            Completion::Read(buf) => Some(buf),
            _ => None,
        },
    )
}

/// Write `data` at the current position. `data` is copied on submission.
pub fn file_write_async(fd: RawFd, data: &[u8], kc: &mut Kcall) -> KcallResult<usize> {
    reenter(
        kc,
        || Ok(Payload::FileWrite { fd, data: data.to_vec() }),
        |sys| sys.file_write(fd, data),
        |done| match done {
            Completion::Written(n) => Some(n),
            _ => None,
        },
    )
}

/// Write `data` at `offset` without moving the file position.
pub fn file_write_at_async(
    fd: RawFd,
    data: &[u8],
    offset: u64,
    kc: &mut Kcall,
) -> KcallResult<usize> {
    reenter(
        kc,
        || Ok(Payload::FileWriteAt { fd, data: data.to_vec(), offset }),
        |sys| sys.file_write_at(fd, data, offset),
        |done| match done {
            Completion::Written(n) => Some(n),
            _ => None,
        },
    )
}

/// Resolve `host` to socket addresses carrying `port`.
pub fn resolve_async(
    host: &str,
    port: u16,
    hint: AddrHint,
    kc: &mut Kcall,
) -> KcallResult<Vec<SocketAddr>> {
    reenter(
        kc,
        || Ok(Payload::NetResolve { host: host.to_owned(), port, hint }),
        |sys| sys.resolve(host, port, hint),
        |done| match done {
            Completion::Resolved(addrs) => Some(addrs),
            _ => None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kcall::kcall_cancel;
    use crate::pool::WorkerPool;
    use crate::queue::KcallQueue;
    use crate::config::KcallConfig;
    use kcall_core::op::OpCode;
    use kcall_core::state::KcallState;
    use kcall_core::wake::WakeEvent;

    use std::io::Write;
    use std::os::fd::{AsRawFd, FromRawFd};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    #[derive(Default)]
    struct CountingWake {
        posts: AtomicUsize,
    }

    impl WakeEvent for CountingWake {
        fn post(&self) -> KcallResult<()> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl CountingWake {
        fn posts(&self) -> usize {
            self.posts.load(Ordering::SeqCst)
        }
    }

    /// Blocks inside `file_read` until the test releases it.
    struct GatedSys {
        entered: Barrier,
        release: Barrier,
    }

    impl SyscallTable for GatedSys {
        fn file_open(&self, p: &Path, f: OFlag, m: Mode) -> Result<OwnedFd, Errno> {
            SysCalls.file_open(p, f, m)
        }
        fn file_info(&self, fd: RawFd) -> Result<FileStat, Errno> {
            SysCalls.file_info(fd)
        }
        fn file_read(&self, _fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno> {
            self.entered.wait();
            self.release.wait();
            buf[..2].copy_from_slice(b"ok");
            Ok(2)
        }
        fn file_read_at(&self, fd: RawFd, buf: &mut [u8], off: u64) -> Result<usize, Errno> {
            SysCalls.file_read_at(fd, buf, off)
        }
        fn file_write(&self, fd: RawFd, buf: &[u8]) -> Result<usize, Errno> {
            SysCalls.file_write(fd, buf)
        }
        fn file_write_at(&self, fd: RawFd, buf: &[u8], off: u64) -> Result<usize, Errno> {
            SysCalls.file_write_at(fd, buf, off)
        }
        fn resolve(&self, h: &str, p: u16, a: AddrHint) -> Result<Vec<SocketAddr>, Errno> {
            SysCalls.resolve(h, p, a)
        }
    }

    /// `FileStat` has no `Debug`, so no `unwrap_err` on it.
    fn err<T>(r: KcallResult<T>) -> KcallError {
        match r {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        }
    }

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    fn queue(sq: usize, cq: usize) -> (Arc<KcallQueue>, Arc<CountingWake>) {
        let wake = Arc::new(CountingWake::default());
        let q = KcallQueue::builder(sq, cq).wake(wake.clone()).build().unwrap();
        (q, wake)
    }

    fn counting_kcall(q: &Arc<KcallQueue>) -> (Kcall, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let kc = Kcall::with_handler(q.clone(), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (kc, hits)
    }

    struct TempFile(std::path::PathBuf);

    impl TempFile {
        fn new(tag: &str) -> Self {
            static SEQ: AtomicUsize = AtomicUsize::new(0);
            let name = format!(
                "kcall-ops-{}-{}-{}",
                std::process::id(),
                tag,
                SEQ.fetch_add(1, Ordering::Relaxed)
            );
            TempFile(std::env::temp_dir().join(name))
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn test_blocking_mode_runs_in_place() {
        let mut kc = Kcall::blocking();
        let (r, w) = pipe();
        assert_eq!(file_write_async(w.as_raw_fd(), b"hello", &mut kc), Ok(5));
        assert_eq!(file_read_async(r.as_raw_fd(), 64, &mut kc).unwrap(), b"hello");
        assert_eq!(
            err(file_info_async(-1, &mut kc)),
            KcallError::Os(Errno::EBADF)
        );
        assert_eq!(kc.state(), KcallState::Idle);
        assert_eq!(kc.op(), OpCode::None);
    }

    #[test]
    fn test_single_read_round_trip() {
        let (q, wake) = queue(1, 1);
        let (mut kc, hits) = counting_kcall(&q);
        let (r, w) = pipe();
        (&std::fs::File::from(w)).write_all(b"0123456789abc").unwrap();

        assert_eq!(file_read_async(r.as_raw_fd(), 10, &mut kc), Err(KcallError::InProgress));
        assert_eq!(kc.state(), KcallState::Queued);
        assert_eq!(kc.op(), OpCode::FileRead);

        assert_eq!(q.process_sq(), 1);
        assert_eq!(kc.state(), KcallState::Completed);
        assert_eq!(wake.posts(), 1);

        assert_eq!(q.process_cq(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(kc.state(), KcallState::Idle);

        let buf = file_read_async(r.as_raw_fd(), 10, &mut kc).unwrap();
        assert_eq!(buf, b"0123456789");
        assert_eq!(kc.op(), OpCode::None);
        assert_eq!(q.outstanding(), 0);
    }

    #[test]
    fn test_result_consumed_once() {
        let (q, _wake) = queue(2, 2);
        let mut kc = Kcall::new(q.clone());
        let (_r, w) = pipe();

        assert_eq!(file_write_async(w.as_raw_fd(), b"abc", &mut kc), Err(KcallError::InProgress));
        q.process_sq();
        q.process_cq();
        assert_eq!(file_write_async(w.as_raw_fd(), b"abc", &mut kc), Ok(3));
        // Not a replay: a fresh submission.
        assert_eq!(file_write_async(w.as_raw_fd(), b"abc", &mut kc), Err(KcallError::InProgress));
        assert_eq!(q.sq_len(), 1);
    }

    #[test]
    fn test_busy_while_queued() {
        let (q, _wake) = queue(4, 4);
        let mut kc = Kcall::new(q.clone());
        let (r, _w) = pipe();

        assert_eq!(file_read_async(r.as_raw_fd(), 8, &mut kc), Err(KcallError::InProgress));
        assert_eq!(file_read_async(r.as_raw_fd(), 8, &mut kc), Err(KcallError::Busy));
        assert_eq!(err(file_info_async(r.as_raw_fd(), &mut kc)), KcallError::Busy);
        assert_eq!(kc.state(), KcallState::Queued);
        assert_eq!(kc.op(), OpCode::FileRead);
        assert_eq!(q.sq_len(), 1);
        assert_eq!(q.outstanding(), 1);

        // Cancel so the blocked read is never executed.
        kc.cancel();
        q.process_sq();
        q.process_cq();
    }

    #[test]
    fn test_busy_while_completed() {
        let (q, _wake) = queue(4, 4);
        let mut kc = Kcall::new(q.clone());
        let (_r, w) = pipe();

        err(file_write_async(w.as_raw_fd(), b"z", &mut kc));
        q.process_sq();
        assert_eq!(file_write_async(w.as_raw_fd(), b"z", &mut kc), Err(KcallError::Busy));
        assert_eq!(kc.state(), KcallState::Completed);
        q.process_cq();
        assert_eq!(file_write_async(w.as_raw_fd(), b"z", &mut kc), Ok(1));
    }

    #[test]
    fn test_sq_full_rejects_without_blocking() {
        let (q, _wake) = queue(1, 4);
        let (r, _w) = pipe();
        let mut first = Kcall::new(q.clone());
        let mut second = Kcall::new(q.clone());

        assert_eq!(err(file_info_async(r.as_raw_fd(), &mut first)), KcallError::InProgress);
        assert_eq!(err(file_info_async(r.as_raw_fd(), &mut second)), KcallError::QueueFull);
        assert_eq!(second.state(), KcallState::Idle);
        assert_eq!(second.op(), OpCode::None);
        assert_eq!(q.outstanding(), 1);
        assert_eq!(q.stats().rejected.load(Ordering::Relaxed), 1);

        // Once the SQ has room the rejected descriptor is usable.
        q.process_sq();
        assert_eq!(err(file_info_async(r.as_raw_fd(), &mut second)), KcallError::InProgress);
    }

    #[test]
    fn test_outstanding_budget_is_cq_capacity() {
        let (q, _wake) = queue(4, 1);
        let (r, _w) = pipe();
        let mut first = Kcall::new(q.clone());
        let mut second = Kcall::new(q.clone());

        err(file_info_async(r.as_raw_fd(), &mut first));
        assert_eq!(q.process_sq(), 1);
        // SQ is empty but the CQ slot is still spoken for.
        assert_eq!(err(file_info_async(r.as_raw_fd(), &mut second)), KcallError::QueueFull);
        q.process_cq();
        assert_eq!(err(file_info_async(r.as_raw_fd(), &mut second)), KcallError::InProgress);
        assert!(file_info_async(r.as_raw_fd(), &mut first).is_ok());
    }

    #[test]
    fn test_slot_in_one_queue_at_a_time() {
        let (q, _wake) = queue(2, 2);
        let mut kc = Kcall::new(q.clone());
        let (_r, w) = pipe();

        assert_eq!(Arc::strong_count(kc.slot()), 1);
        err(file_write_async(w.as_raw_fd(), b"q", &mut kc));
        assert_eq!((q.sq_len(), q.cq_len()), (1, 0));
        assert_eq!(Arc::strong_count(kc.slot()), 2);
        q.process_sq();
        assert_eq!((q.sq_len(), q.cq_len()), (0, 1));
        assert_eq!(Arc::strong_count(kc.slot()), 2);
        q.process_cq();
        assert_eq!((q.sq_len(), q.cq_len()), (0, 0));
        assert_eq!(Arc::strong_count(kc.slot()), 1);
    }

    #[test]
    fn test_cancel_before_pickup() {
        let (q, _wake) = queue(2, 2);
        let (mut kc, hits) = counting_kcall(&q);
        let (r, _w) = pipe();

        assert_eq!(file_read_async(r.as_raw_fd(), 8, &mut kc), Err(KcallError::InProgress));
        kcall_cancel(&kc);
        assert_eq!(kc.op(), OpCode::None);
        assert_eq!(kc.state(), KcallState::Queued);

        // Skipped: the empty pipe would block otherwise.
        assert_eq!(q.process_sq(), 1);
        assert_eq!(q.stats().skipped.load(Ordering::Relaxed), 1);
        assert_eq!(q.process_cq(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(kc.state(), KcallState::Idle);
        assert_eq!(q.outstanding(), 0);

        // Reusable.
        assert_eq!(err(file_info_async(r.as_raw_fd(), &mut kc)), KcallError::InProgress);
    }

    #[test]
    fn test_cancel_after_execution() {
        let (q, _wake) = queue(2, 2);
        let (mut kc, hits) = counting_kcall(&q);
        let path = TempFile::new("cancel");

        let flags = OFlag::O_CREAT | OFlag::O_RDWR;
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;
        assert_eq!(err(file_open_async(&path.0, flags, mode, &mut kc)), KcallError::InProgress);
        q.process_sq();
        kc.cancel();
        assert_eq!(q.process_cq(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(kc.state(), KcallState::Idle);
        assert!(path.0.exists());

        // The discarded outcome is not handed out.
        assert_eq!(err(file_info_async(-1, &mut kc)), KcallError::InProgress);
    }

    #[test]
    fn test_cancel_drops_unconsumed_result() {
        let (q, _wake) = queue(2, 2);
        let (mut kc, hits) = counting_kcall(&q);
        let path = TempFile::new("unconsumed");

        let flags = OFlag::O_CREAT | OFlag::O_RDWR;
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;
        assert_eq!(err(file_open_async(&path.0, flags, mode, &mut kc)), KcallError::InProgress);
        q.process_sq();
        assert_eq!(q.process_cq(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // Safety: the descriptor is Idle and this thread is its call site.
        let held = unsafe { &*kc.slot().payload_mut() };
        assert!(matches!(held, Payload::Done(Ok(Completion::Opened(_)))));

        kc.cancel();
        assert_eq!(kc.op(), OpCode::None);
        let held = unsafe { &*kc.slot().payload_mut() };
        assert!(matches!(held, Payload::Empty));
        assert_eq!(err(file_info_async(-1, &mut kc)), KcallError::InProgress);
    }

    #[test]
    fn test_cancel_during_execution() {
        let sys = Arc::new(GatedSys { entered: Barrier::new(2), release: Barrier::new(2) });
        let q = KcallQueue::builder(2, 2).syscalls(sys.clone()).build().unwrap();
        let (mut kc, hits) = counting_kcall(&q);

        assert_eq!(file_read_async(0, 4, &mut kc), Err(KcallError::InProgress));
        let worker = {
            let q = q.clone();
            std::thread::spawn(move || q.process_sq())
        };
        sys.entered.wait();
        kc.cancel();
        sys.release.wait();
        assert_eq!(worker.join().unwrap(), 1);

        assert_eq!(q.stats().executed.load(Ordering::Relaxed), 1);
        assert_eq!(q.process_cq(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(kc.state(), KcallState::Idle);
        assert_eq!(kc.op(), OpCode::None);
    }

    #[test]
    fn test_drop_handle_in_flight() {
        let (q, _wake) = queue(2, 2);
        let (mut kc, hits) = counting_kcall(&q);
        let (_r, w) = pipe();

        err(file_write_async(w.as_raw_fd(), b"d", &mut kc));
        drop(kc);
        assert_eq!(q.process_sq(), 1);
        assert_eq!(q.process_cq(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(q.outstanding(), 0);
    }

    #[test]
    fn test_mismatched_consume_is_busy() {
        let (q, _wake) = queue(2, 2);
        let mut kc = Kcall::new(q.clone());
        let (_r, w) = pipe();

        err(file_write_async(w.as_raw_fd(), b"m", &mut kc));
        q.process_sq();
        q.process_cq();
        assert_eq!(err(file_info_async(w.as_raw_fd(), &mut kc)), KcallError::Busy);
        // Stale outcome dropped; the descriptor is free again.
        assert_eq!(kc.op(), OpCode::None);
        assert_eq!(err(file_info_async(w.as_raw_fd(), &mut kc)), KcallError::InProgress);
    }

    #[test]
    fn test_wake_posted_once_per_transition() {
        let (q, wake) = queue(8, 8);
        let (_r, w) = pipe();
        let mut calls: Vec<Kcall> = (0..6).map(|_| Kcall::new(q.clone())).collect();

        for kc in calls[..3].iter_mut() {
            err(file_write_async(w.as_raw_fd(), b"1", kc));
        }
        assert_eq!(q.process_sq(), 3);
        assert_eq!(wake.posts(), 1);

        // More completions before the consumer runs: still pending.
        err(file_write_async(w.as_raw_fd(), b"1", &mut calls[3]));
        q.process_sq();
        assert_eq!(wake.posts(), 1);

        assert_eq!(q.process_cq(), 4);
        for kc in calls[4..].iter_mut() {
            err(file_write_async(w.as_raw_fd(), b"1", kc));
        }
        assert_eq!(q.process_sq(), 2);
        assert_eq!(wake.posts(), 2);
    }

    #[test]
    fn test_burst_during_drain_wakes_once() {
        let (q, wake) = queue(8, 8);
        let (_r, w) = pipe();
        let fd = w.as_raw_fd();
        let burst: Arc<std::sync::Mutex<Vec<Kcall>>> =
            Arc::new(std::sync::Mutex::new((0..4).map(|_| Kcall::new(q.clone())).collect()));

        // The trigger's handler runs mid-drain and plays submitter and
        // worker for a burst of four completions.
        let (q2, burst2) = (q.clone(), burst.clone());
        let mut trigger = Kcall::with_handler(q.clone(), move || {
            for kc in burst2.lock().unwrap().iter_mut() {
                assert_eq!(file_write_async(fd, b"b", kc), Err(KcallError::InProgress));
            }
            assert_eq!(q2.process_sq(), 4);
        });

        err(file_write_async(fd, b"t", &mut trigger));
        q.process_sq();
        assert_eq!(wake.posts(), 1);

        // Trigger plus the burst, all in one drain.
        assert_eq!(q.process_cq(), 5);
        assert_eq!(wake.posts(), 2);
        for kc in burst.lock().unwrap().iter_mut() {
            assert_eq!(file_write_async(fd, b"b", kc), Ok(1));
        }
    }

    #[test]
    fn test_unallocatable_read_is_enomem() {
        let enomem = KcallError::Os(Errno::ENOMEM);
        let mut blocking = Kcall::blocking();
        assert_eq!(file_read_async(-1, usize::MAX, &mut blocking), Err(enomem));
        assert_eq!(file_read_at_async(-1, usize::MAX, 0, &mut blocking), Err(enomem));

        let (q, _wake) = queue(2, 2);
        let mut kc = Kcall::new(q.clone());
        assert_eq!(file_read_async(0, usize::MAX, &mut kc), Err(enomem));
        assert_eq!(file_read_at_async(0, usize::MAX, 0, &mut kc), Err(enomem));
        assert_eq!(kc.state(), KcallState::Idle);
        assert_eq!(kc.op(), OpCode::None);
        assert_eq!(q.sq_len(), 0);
        assert_eq!(q.outstanding(), 0);
    }

    #[test]
    fn test_file_ops_through_queue() {
        let (q, _wake) = queue(4, 4);
        let mut kc = Kcall::new(q.clone());
        let path = TempFile::new("ops");

        macro_rules! complete {
            ($call:expr) => {{
                assert_eq!(err($call), KcallError::InProgress);
                q.process_sq();
                q.process_cq();
                $call
            }};
        }

        let flags = OFlag::O_CREAT | OFlag::O_RDWR;
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;
        let fd = complete!(file_open_async(&path.0, flags, mode, &mut kc)).unwrap();
        let raw = fd.as_raw_fd();

        assert_eq!(complete!(file_write_async(raw, b"hello world", &mut kc)), Ok(11));
        assert_eq!(complete!(file_write_at_async(raw, b"W", 6, &mut kc)), Ok(1));
        let st = complete!(file_info_async(raw, &mut kc)).unwrap();
        assert_eq!(st.st_size, 11);
        assert_eq!(complete!(file_read_at_async(raw, 64, 0, &mut kc)).unwrap(), b"hello World");
        // Position is at the end after the plain write.
        assert_eq!(complete!(file_read_async(raw, 64, &mut kc)).unwrap(), b"");

        let missing = TempFile::new("missing");
        assert_eq!(
            err(complete!(file_open_async(&missing.0, OFlag::O_RDONLY, Mode::empty(), &mut kc))),
            KcallError::Os(Errno::ENOENT)
        );
    }

    #[test]
    fn test_resolve_through_queue() {
        let (q, _wake) = queue(1, 1);
        let mut kc = Kcall::new(q.clone());

        assert_eq!(resolve_async("127.0.0.1", 8080, AddrHint::Any, &mut kc), Err(KcallError::InProgress));
        q.process_sq();
        q.process_cq();
        let addrs = resolve_async("127.0.0.1", 8080, AddrHint::Any, &mut kc).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8080".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_many_calls_with_worker_pool() {
        const CALLS: usize = 32;
        const ROUNDS: usize = 20;

        let config = KcallConfig::new().sq_capacity(8).cq_capacity(16).workers(4);
        let q = KcallQueue::from_config(&config).unwrap();
        let pool = WorkerPool::start(q.clone(), &config).unwrap();
        let (r, _w) = pipe();

        let hits = Arc::new(AtomicUsize::new(0));
        let mut calls: Vec<Kcall> = (0..CALLS)
            .map(|_| {
                let h = hits.clone();
                Kcall::with_handler(q.clone(), move || {
                    h.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();
        let mut done = vec![0usize; CALLS];

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(20);
        while done.iter().any(|&d| d < ROUNDS) {
            assert!(std::time::Instant::now() < deadline, "stalled: {:?}", q);
            for (kc, d) in calls.iter_mut().zip(done.iter_mut()) {
                if *d == ROUNDS {
                    continue;
                }
                match file_info_async(r.as_raw_fd(), kc) {
                    Ok(_) => *d += 1,
                    Err(KcallError::InProgress | KcallError::Busy | KcallError::QueueFull) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
            q.process_cq();
            std::thread::yield_now();
        }

        assert_eq!(hits.load(Ordering::Relaxed), CALLS * ROUNDS);
        assert_eq!(q.outstanding(), 0);
        assert_eq!(q.stats().executed.load(Ordering::Relaxed), (CALLS * ROUNDS) as u64);
        drop(pool);
    }
}
