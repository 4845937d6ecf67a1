//! In-place replacement of an internet socket with a UNIX-domain one.
//!
//! The caller's descriptor number must survive: programs hold it in epoll
//! sets, pass it to worker threads, and compare it against other descriptors.
//! So conversion creates a fresh AF_UNIX socket, carries the old descriptor's
//! flags and cached options over, and then `dup2`s the new socket onto the
//! old number, the kernel's atomic "replace whatever this number refers to"
//! primitive. Only the kernel object changes; every copy of the number the
//! program has stays valid.

use std::io;

use libc::c_int;

use crate::logging::{debug, error};
use crate::preload::real;
use crate::preload::tracker::SocketRecord;

/// Copies descriptor flags (close-on-exec) and status flags (nonblocking and
/// friends) from `old_fd` to `new_fd`, then replays the record's cached
/// socket options onto `new_fd` in application order.
///
/// Successfully replayed options are drained from the queue; on failure the
/// remainder stays queued and the caller must treat the target descriptor as
/// unusable.
pub(crate) unsafe fn replay_sockopts(
    record: &mut SocketRecord,
    old_fd: c_int,
    new_fd: c_int,
) -> bool {
    let fdflags = libc::fcntl(old_fd, libc::F_GETFD);
    if fdflags == -1 {
        error!("fcntl(F_GETFD): {}", io::Error::last_os_error());
        return false;
    }
    let fdstatus = libc::fcntl(old_fd, libc::F_GETFL);
    if fdstatus == -1 {
        error!("fcntl(F_GETFL): {}", io::Error::last_os_error());
        return false;
    }
    if libc::fcntl(new_fd, libc::F_SETFD, fdflags) == -1 {
        error!("fcntl(F_SETFD): {}", io::Error::last_os_error());
        return false;
    }
    if libc::fcntl(new_fd, libc::F_SETFL, fdstatus) == -1 {
        error!("fcntl(F_SETFL): {}", io::Error::last_os_error());
        return false;
    }

    while let Some(entry) = record.sockopts.front() {
        let ret = real::SETSOCKOPT.get()(
            new_fd,
            entry.level,
            entry.optname,
            entry.optval.as_ptr().cast(),
            entry.optval.len() as libc::socklen_t,
        );
        if ret == -1 {
            error!("setsockopt: {}", io::Error::last_os_error());
            return false;
        }
        record.sockopts.pop_front();
    }

    true
}

/// Swaps the kernel object under `fd` for a fresh AF_UNIX socket of the
/// record's type, preserving descriptor flags, status flags, and cached
/// options. A record that is already converted is a no-op success; on any
/// failure the transient socket is released and `fd` is left untouched.
pub(crate) unsafe fn convert_in_place(fd: c_int, record: &mut SocketRecord) -> bool {
    if record.converted {
        return true;
    }

    // Type flag bits such as SOCK_CLOEXEC/SOCK_NONBLOCK carry over at
    // creation; the fcntl replay below covers flags set later.
    let new_fd = real::SOCKET.get()(libc::AF_UNIX, record.socktype, 0);
    if new_fd == -1 {
        error!("socket(AF_UNIX): {}", io::Error::last_os_error());
        return false;
    }

    if !replay_sockopts(record, fd, new_fd) {
        real::CLOSE.get()(new_fd);
        return false;
    }

    if libc::dup2(new_fd, fd) == -1 {
        error!("dup2: {}", io::Error::last_os_error());
        real::CLOSE.get()(new_fd);
        return false;
    }

    real::CLOSE.get()(new_fd);
    record.converted = true;
    debug!(
        "fd {fd} converted to AF_UNIX (type {:#x}, protocol {})",
        record.socktype, record.protocol
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    fn getsockopt_int(fd: c_int, level: c_int, name: c_int) -> c_int {
        let mut val: c_int = 0;
        let mut len = size_of::<c_int>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd,
                level,
                name,
                (&mut val as *mut c_int).cast(),
                &mut len,
            )
        };
        assert_eq!(ret, 0);
        val
    }

    fn raw_inet_socket(ty: c_int) -> c_int {
        let fd = unsafe { real::SOCKET.get()(libc::AF_INET, ty, 0) };
        assert!(fd >= 0);
        fd
    }

    #[test]
    fn conversion_keeps_descriptor_number_and_becomes_unix() {
        let fd = raw_inet_socket(libc::SOCK_STREAM);
        let mut record = SocketRecord::new(libc::SOCK_STREAM, 0);

        assert!(unsafe { convert_in_place(fd, &mut record) });
        assert!(record.converted);

        let domain = getsockopt_int(fd, libc::SOL_SOCKET, libc::SO_DOMAIN);
        assert_eq!(domain, libc::AF_UNIX);
        unsafe { real::CLOSE.get()(fd) };
    }

    #[test]
    fn conversion_is_idempotent() {
        let fd = raw_inet_socket(libc::SOCK_STREAM);
        let mut record = SocketRecord::new(libc::SOCK_STREAM, 0);
        assert!(unsafe { convert_in_place(fd, &mut record) });
        // Second call must succeed without creating another socket.
        assert!(unsafe { convert_in_place(fd, &mut record) });
        unsafe { real::CLOSE.get()(fd) };
    }

    #[test]
    fn conversion_replays_cached_options_in_order() {
        use crate::preload::tracker::SockoptEntry;

        let fd = raw_inet_socket(libc::SOCK_STREAM);
        let mut record = SocketRecord::new(libc::SOCK_STREAM, 0);
        let one: c_int = 1;
        for optname in [libc::SO_REUSEADDR, libc::SO_KEEPALIVE] {
            record.sockopts.push_back(SockoptEntry {
                level: libc::SOL_SOCKET,
                optname,
                optval: one.to_ne_bytes().to_vec(),
            });
        }

        assert!(unsafe { convert_in_place(fd, &mut record) });
        assert!(record.sockopts.is_empty());
        assert_eq!(getsockopt_int(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR), 1);
        assert_eq!(getsockopt_int(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE), 1);
        unsafe { real::CLOSE.get()(fd) };
    }

    #[test]
    fn conversion_preserves_descriptor_flags() {
        let fd = raw_inet_socket(libc::SOCK_STREAM);
        assert_ne!(unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) }, -1);
        assert_ne!(unsafe { libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK) }, -1);

        let mut record = SocketRecord::new(libc::SOCK_STREAM, 0);
        assert!(unsafe { convert_in_place(fd, &mut record) });

        let fdflags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_ne!(fdflags & libc::FD_CLOEXEC, 0);
        let status = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        assert_ne!(status & libc::O_NONBLOCK, 0);
        unsafe { real::CLOSE.get()(fd) };
    }
}
