//! Shadow implementations of the intercepted C library entry points.
//!
//! These are the only unmangled symbols the shared object exports. Each one
//! either acts on a tracked descriptor or forwards to the real
//! implementation unchanged; a process that never touches an AF_INET/AF_INET6
//! socket goes through here without observable effect.
//!
//! Lock discipline: the socket-table mutex is taken first, the rule-store
//! initialization second, the resolver cells last. bind/connect/close keep
//! the table mutex across the underlying call so that a conversion and the
//! call it enables look atomic to every other thread; accept performs the
//! (potentially long-blocking) underlying call before touching the table.

use core::ffi::c_void;
use std::ffi::CString;
#[cfg(feature = "socket-activation")]
use std::io;
use std::net::Ipv4Addr;

use libc::{c_int, sockaddr as libc_sockaddr, socklen_t};

use crate::logging::debug;
#[cfg(feature = "socket-activation")]
use crate::logging::error;
use crate::preload::convert;
use crate::preload::real;
use crate::preload::tracker::{self, SockoptEntry, SocketEntry, SocketRecord};
use crate::rules::{self, RuleDir};
use crate::sockaddr::{self, SockAddr};
use crate::sockpath;
#[cfg(feature = "socket-activation")]
use crate::systemd;

/// Synthetic peer reported for every tracked descriptor: the true peer is a
/// UNIX socket, and callers expecting an internet address get this fixed
/// loopback endpoint instead.
const PEER_ADDR: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
const PEER_PORT: u16 = 65530;

/// Creates a socket and starts tracking it when it is an internet socket.
///
/// # Safety
///
/// Same contract as the C library's `socket`.
#[no_mangle]
pub unsafe extern "C" fn socket(domain: c_int, ty: c_int, protocol: c_int) -> c_int {
    let fd = real::SOCKET.get()(domain, ty, protocol);
    if fd >= 0 && (domain == libc::AF_INET || domain == libc::AF_INET6) {
        let mut table = tracker::lock();
        table.insert_owner(fd, SocketRecord::new(ty, protocol));
        debug!("tracking socket fd {fd} (type {ty:#x}, protocol {protocol})");
    }
    fd
}

/// Applies a socket option and, for generic-level options on tracked
/// descriptors, remembers it for replay onto a converted socket.
///
/// # Safety
///
/// Same contract as the C library's `setsockopt`.
#[no_mangle]
pub unsafe extern "C" fn setsockopt(
    sockfd: c_int,
    level: c_int,
    optname: c_int,
    optval: *const c_void,
    optlen: socklen_t,
) -> c_int {
    {
        let table = tracker::lock();
        // Only generic-level options are cached: protocol-specific ones
        // (IPPROTO_TCP and friends) are meaningless on an AF_UNIX socket.
        if let Some(entry) = table.get(sockfd) {
            if level == libc::SOL_SOCKET {
                let record = entry.record();
                let ret = real::SETSOCKOPT.get()(sockfd, level, optname, optval, optlen);
                if ret == 0 && !optval.is_null() {
                    let bytes =
                        std::slice::from_raw_parts(optval.cast::<u8>(), optlen as usize).to_vec();
                    tracker::lock_record(&record).sockopts.push_back(SockoptEntry {
                        level,
                        optname,
                        optval: bytes,
                    });
                }
                return ret;
            }
        }
    }
    real::SETSOCKOPT.get()(sockfd, level, optname, optval, optlen)
}

unsafe fn real_bind_connect(
    dir: RuleDir,
    fd: c_int,
    addr: *const libc_sockaddr,
    addrlen: socklen_t,
) -> c_int {
    match dir {
        RuleDir::Incoming => real::BIND.get()(fd, addr, addrlen),
        RuleDir::Outgoing => real::CONNECT.get()(fd, addr, addrlen),
    }
}

/// Shared handler for `bind` and `connect`; the two differ only in which
/// underlying call finishes the job and which rule direction applies.
unsafe fn handle_bind_connect(
    dir: RuleDir,
    fd: c_int,
    addr: *const libc_sockaddr,
    addrlen: socklen_t,
) -> c_int {
    // Non-internet families and null addresses are none of our business.
    let Some(sa) = SockAddr::from_raw(addr) else {
        return real_bind_connect(dir, fd, addr, addrlen);
    };

    let table = tracker::lock();

    // No socket() call was tracked for this descriptor, so run the original
    // call; if it fails it fails on the caller's own terms.
    let Some(entry) = table.get(fd) else {
        drop(table);
        return real_bind_connect(dir, fd, addr, addrlen);
    };
    let record_ref = entry.record();
    let mut record = tracker::lock_record(&record_ref);

    for (pos, rule) in rules::global().iter().enumerate() {
        if !rule.matches(dir, &sa, record.socktype) {
            continue;
        }

        #[cfg(feature = "socket-activation")]
        if rule.socket_activation {
            let new_fd = systemd::fd_for_rule(rule);
            if !convert::replay_sockopts(&mut record, fd, new_fd) {
                return -1;
            }
            if libc::dup2(new_fd, fd) == -1 {
                error!("dup2: {}", io::Error::last_os_error());
                return -1;
            }
            record.local_addr = sa.ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED);
            record.local_port = sa.port().unwrap_or(0);
            record.rule = Some(pos);
            debug!("fd {fd} now aliases supervisor fd {new_fd}");
            return 0;
        }

        let Some(template) = rule.socket_path.as_deref() else {
            continue;
        };

        // A failed conversion skips this rule; a later one may still apply.
        if !convert::convert_in_place(fd, &mut record) {
            continue;
        }

        let path = sockpath::format_sockpath(
            template,
            sa.host().as_deref().unwrap_or("unknown"),
            sa.port().unwrap_or(0),
            rules::ip_type_of(record.socktype),
        );
        let (ua, ua_len) = sockaddr::unix(&path);
        let ret = real_bind_connect(dir, fd, (&ua as *const libc::sockaddr_un).cast(), ua_len);
        if ret == 0 {
            record.local_addr = sa.ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED);
            record.local_port = sa.port().unwrap_or(0);
            record.sockpath = Some(path);
            record.rule = Some(pos);
        }
        return ret;
    }

    real_bind_connect(dir, fd, addr, addrlen)
}

/// Binds a socket, redirecting to a UNIX address when an incoming rule
/// matches.
///
/// # Safety
///
/// Same contract as the C library's `bind`.
#[no_mangle]
pub unsafe extern "C" fn bind(fd: c_int, addr: *const libc_sockaddr, addrlen: socklen_t) -> c_int {
    handle_bind_connect(RuleDir::Incoming, fd, addr, addrlen)
}

/// Connects a socket, redirecting to a UNIX address when an outgoing rule
/// matches.
///
/// # Safety
///
/// Same contract as the C library's `connect`.
#[no_mangle]
pub unsafe extern "C" fn connect(fd: c_int, addr: *const libc_sockaddr, addrlen: socklen_t) -> c_int {
    handle_bind_connect(RuleDir::Outgoing, fd, addr, addrlen)
}

/// Starts listening, unless the supervisor already did, in which case the
/// call must be swallowed (listening twice on a passed descriptor fails).
///
/// # Safety
///
/// Same contract as the C library's `listen`.
#[cfg(feature = "socket-activation")]
#[no_mangle]
pub unsafe extern "C" fn listen(sockfd: c_int, backlog: c_int) -> c_int {
    let table = tracker::lock();
    let activated = table.get(sockfd).is_some_and(|entry| {
        tracker::lock_record(&entry.record())
            .rule
            .is_some_and(|pos| rules::global()[pos].socket_activation)
    });
    if activated {
        0
    } else {
        real::LISTEN.get()(sockfd, backlog)
    }
}

unsafe fn handle_accept(
    fd: c_int,
    addr: *mut libc_sockaddr,
    addrlen: *mut socklen_t,
    flags: c_int,
) -> c_int {
    let acc_fd = real::ACCEPT4.get()(fd, addr, addrlen, flags);
    if acc_fd >= 0 {
        let mut table = tracker::lock();
        if let Some(entry) = table.get(fd) {
            let parent = entry.record();
            table.insert_child(acc_fd, parent);
            // The true peer is a UNIX socket; report the synthetic internet
            // endpoint instead. Callers passing a null address still get
            // their connection.
            if !addr.is_null() && !addrlen.is_null() {
                sockaddr::write_inet(PEER_ADDR, PEER_PORT, addr, addrlen);
            }
        }
    }
    acc_fd
}

/// Accepts a connection; on tracked listeners the result is tracked as a
/// child and the reported peer is the synthetic endpoint.
///
/// # Safety
///
/// Same contract as the C library's `accept`.
#[no_mangle]
pub unsafe extern "C" fn accept(fd: c_int, addr: *mut libc_sockaddr, addrlen: *mut socklen_t) -> c_int {
    handle_accept(fd, addr, addrlen, 0)
}

/// `accept` with flags; the flags go straight through to the underlying
/// `accept4`.
///
/// # Safety
///
/// Same contract as the C library's `accept4`.
#[no_mangle]
pub unsafe extern "C" fn accept4(
    fd: c_int,
    addr: *mut libc_sockaddr,
    addrlen: *mut socklen_t,
    flags: c_int,
) -> c_int {
    handle_accept(fd, addr, addrlen, flags)
}

/// Reports the synthetic peer for tracked descriptors.
///
/// # Safety
///
/// Same contract as the C library's `getpeername`.
#[no_mangle]
pub unsafe extern "C" fn getpeername(
    fd: c_int,
    addr: *mut libc_sockaddr,
    addrlen: *mut socklen_t,
) -> c_int {
    let table = tracker::lock();
    if table.get(fd).is_some() {
        sockaddr::write_inet(PEER_ADDR, PEER_PORT, addr, addrlen);
        return 0;
    }
    drop(table);
    real::GETPEERNAME.get()(fd, addr, addrlen)
}

/// Reports the local address the caller originally asked for, not the UNIX
/// path the socket actually sits on.
///
/// # Safety
///
/// Same contract as the C library's `getsockname`.
#[no_mangle]
pub unsafe extern "C" fn getsockname(
    fd: c_int,
    addr: *mut libc_sockaddr,
    addrlen: *mut socklen_t,
) -> c_int {
    let table = tracker::lock();
    if let Some(entry) = table.get(fd) {
        let record = entry.record();
        let (ip, port) = {
            let record = tracker::lock_record(&record);
            (record.local_addr, record.local_port)
        };
        sockaddr::write_inet(ip, port, addr, addrlen);
        return 0;
    }
    drop(table);
    real::GETSOCKNAME.get()(fd, addr, addrlen)
}

/// Closes a descriptor, dropping its tracking entry. Owners with a bound
/// incoming path unlink it; owners aliasing a supervisor descriptor are
/// detached without closing the kernel object the supervisor still owns.
///
/// # Safety
///
/// Same contract as the C library's `close`.
#[no_mangle]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    let mut table = tracker::lock();
    match table.remove(fd) {
        None | Some(SocketEntry::Child(_)) => {
            drop(table);
            real::CLOSE.get()(fd)
        }
        Some(SocketEntry::Owner(record_ref)) => {
            let record = tracker::lock_record(&record_ref);

            #[cfg(feature = "socket-activation")]
            if record
                .rule
                .is_some_and(|pos| rules::global()[pos].socket_activation)
            {
                // The supervisor keeps ownership of the kernel object.
                return 0;
            }

            let ret = real::CLOSE.get()(fd);

            if let (Some(pos), Some(path)) = (record.rule, record.sockpath.as_deref()) {
                if rules::global()[pos].direction == RuleDir::Incoming {
                    // Best effort; a vanished path is fine.
                    if let Ok(cpath) = CString::new(path) {
                        libc::unlink(cpath.as_ptr());
                    }
                }
            }
            ret
        }
    }
}
