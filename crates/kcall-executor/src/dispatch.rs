//! Worker-side dispatch: run the blocking call named by a payload.

use kcall_core::syscall::SyscallTable;

use crate::kcall::{Completion, Payload};

/// Execute `args` against `sys` and return `Payload::Done`.
///
/// Read buffers are truncated to the byte count actually read. Payloads
/// without arguments (`Empty`, `Done`) are returned untouched.
pub(crate) fn execute(args: Payload, sys: &dyn SyscallTable) -> Payload {
    let outcome = match args {
        Payload::FileOpen { path, flags, mode } => {
            sys.file_open(&path, flags, mode).map(Completion::Opened)
        }
        Payload::FileInfo { fd } => sys.file_info(fd).map(Completion::Info),
        Payload::FileRead { fd, mut buf } => sys.file_read(fd, &mut buf).map(|n| {
            buf.truncate(n);
            Completion::Read(buf)
        }),
        Payload::FileReadAt { fd, mut buf, offset } => {
            sys.file_read_at(fd, &mut buf, offset).map(|n| {
                buf.truncate(n);
                Completion::Read(buf)
            })
        }
        Payload::FileWrite { fd, data } => sys.file_write(fd, &data).map(Completion::Written),
        Payload::FileWriteAt { fd, data, offset } => {
            sys.file_write_at(fd, &data, offset).map(Completion::Written)
        }
        Payload::NetResolve { host, port, hint } => {
            sys.resolve(&host, port, hint).map(Completion::Resolved)
        }
        other @ (Payload::Empty | Payload::Done(_)) => return other,
    };
    Payload::Done(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcall_core::syscall::AddrHint;
    use kcall_sys::SysCalls;
    use nix::errno::Errno;

    #[test]
    fn test_read_truncates_to_count() {
        let sys = SysCalls::new();
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        assert_eq!(sys.file_write(fds[1], b"abc").unwrap(), 3);

        let done = execute(Payload::FileRead { fd: fds[0], buf: vec![0; 16] }, &sys);
        match done {
            Payload::Done(Ok(Completion::Read(buf))) => assert_eq!(buf, b"abc"),
            _ => panic!("expected a read completion"),
        }
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[test]
    fn test_error_is_captured() {
        let sys = SysCalls::new();
        match execute(Payload::FileInfo { fd: -1 }, &sys) {
            Payload::Done(Err(e)) => assert_eq!(e, Errno::EBADF),
            _ => panic!("expected EBADF"),
        }
    }

    #[test]
    fn test_resolve_numeric() {
        let sys = SysCalls::new();
        let args = Payload::NetResolve { host: "127.0.0.1".into(), port: 53, hint: AddrHint::Ipv4 };
        match execute(args, &sys) {
            Payload::Done(Ok(Completion::Resolved(addrs))) => {
                assert_eq!(addrs[0].to_string(), "127.0.0.1:53")
            }
            _ => panic!("expected resolved addresses"),
        }
    }

    #[test]
    fn test_empty_passes_through() {
        assert!(matches!(execute(Payload::Empty, &SysCalls::new()), Payload::Empty));
    }
}
