//! Blocking name resolution via `getaddrinfo(3)`.
//!
//! `getaddrinfo` reports failures as `EAI_*` codes, not errno. They are
//! folded into the errno space so resolution errors travel through the
//! same `Result<_, Errno>` slot as every other offloaded call:
//!
//! | EAI code                 | Errno          |
//! |--------------------------|----------------|
//! | EAI_SYSTEM               | errno as set   |
//! | EAI_NONAME               | ENOENT         |
//! | EAI_AGAIN                | EAGAIN         |
//! | EAI_MEMORY               | ENOMEM         |
//! | EAI_FAMILY               | EAFNOSUPPORT   |
//! | anything else            | EINVAL         |

use kcall_core::syscall::AddrHint;

use nix::errno::Errno;

use std::ffi::CString;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::ptr;

fn eai_to_errno(code: libc::c_int) -> Errno {
    match code {
        libc::EAI_SYSTEM => Errno::last(),
        libc::EAI_NONAME => Errno::ENOENT,
        libc::EAI_AGAIN => Errno::EAGAIN,
        libc::EAI_MEMORY => Errno::ENOMEM,
        libc::EAI_FAMILY => Errno::EAFNOSUPPORT,
        _ => Errno::EINVAL,
    }
}

/// Convert one `addrinfo` node. Unknown families are skipped.
///
/// # Safety
/// `ai` must be a node of a list returned by `getaddrinfo`.
unsafe fn to_socket_addr(ai: &libc::addrinfo) -> Option<SocketAddr> {
    if ai.ai_addr.is_null() {
        return None;
    }
    match ai.ai_family {
        libc::AF_INET => {
            let sin = &*(ai.ai_addr as *const libc::sockaddr_in);
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6 = &*(ai.ai_addr as *const libc::sockaddr_in6);
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

/// Resolve `host` into stream-socket addresses with `port` filled in.
///
/// Duplicates (one per socket type on some libcs) are removed; order is
/// what the resolver returned.
pub fn resolve(host: &str, port: u16, hint: AddrHint) -> Result<Vec<SocketAddr>, Errno> {
    let c_host = CString::new(host).map_err(|_| Errno::EINVAL)?;

    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_family = match hint {
        AddrHint::Any => libc::AF_UNSPEC,
        AddrHint::Ipv4 => libc::AF_INET,
        AddrHint::Ipv6 => libc::AF_INET6,
    };
    hints.ai_socktype = libc::SOCK_STREAM;

    let mut list: *mut libc::addrinfo = ptr::null_mut();
    let rc = unsafe { libc::getaddrinfo(c_host.as_ptr(), ptr::null(), &hints, &mut list) };
    if rc != 0 {
        return Err(eai_to_errno(rc));
    }

    let mut out: Vec<SocketAddr> = Vec::new();
    let mut cur = list;
    while !cur.is_null() {
        // Safety: `cur` walks the list getaddrinfo just returned.
        let ai = unsafe { &*cur };
        if let Some(mut addr) = unsafe { to_socket_addr(ai) } {
            addr.set_port(port);
            if !out.contains(&addr) {
                out.push(addr);
            }
        }
        cur = ai.ai_next;
    }
    unsafe { libc::freeaddrinfo(list) };

    if out.is_empty() {
        return Err(Errno::ENOENT);
    }
    Ok(out)
}
