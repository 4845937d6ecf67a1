//! Socket-address handling at the C ABI boundary.
//!
//! [`SockAddr`] snapshots a caller-supplied `sockaddr` into a
//! `sockaddr_storage` so the rest of the crate can inspect it without
//! touching raw pointers again. Host text uses the standard library's
//! `IpAddr` presentation, which is also the canonical form rule addresses are
//! normalized to, so matching is a plain string comparison.

use core::mem::{size_of, zeroed};
use core::ptr;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use libc::{
    c_char, sa_family_t, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, sockaddr_un,
    socklen_t, AF_INET, AF_INET6, AF_UNIX,
};

/// An owned copy of an IPv4 or IPv6 socket address.
#[derive(Clone, Copy)]
pub struct SockAddr {
    storage: sockaddr_storage,
}

impl SockAddr {
    /// Copies the address behind `addr`, or `None` when the pointer is null
    /// or the family is neither `AF_INET` nor `AF_INET6`.
    ///
    /// # Safety
    ///
    /// `addr` must either be null or point to a valid socket address of at
    /// least the size its `sa_family` field implies.
    pub unsafe fn from_raw(addr: *const sockaddr) -> Option<Self> {
        if addr.is_null() {
            return None;
        }
        let len = match i32::from((*addr).sa_family) {
            AF_INET => size_of::<sockaddr_in>(),
            AF_INET6 => size_of::<sockaddr_in6>(),
            _ => return None,
        };
        let mut storage: sockaddr_storage = zeroed();
        ptr::copy_nonoverlapping(
            addr.cast::<u8>(),
            (&mut storage as *mut sockaddr_storage).cast::<u8>(),
            len,
        );
        Some(Self { storage })
    }

    /// Builds an address from parts (used by the matcher tests and benches).
    #[must_use]
    pub fn new(ip: IpAddr, port: u16) -> Self {
        // SAFETY: all-zero is a valid sockaddr_storage.
        let mut storage: sockaddr_storage = unsafe { zeroed() };
        match ip {
            IpAddr::V4(v4) => {
                let sin = (&mut storage as *mut sockaddr_storage).cast::<sockaddr_in>();
                // SAFETY: sockaddr_in fits in sockaddr_storage.
                unsafe {
                    (*sin).sin_family = AF_INET as sa_family_t;
                    (*sin).sin_port = port.to_be();
                    (*sin).sin_addr.s_addr = u32::from(v4).to_be();
                }
            }
            IpAddr::V6(v6) => {
                let sin6 = (&mut storage as *mut sockaddr_storage).cast::<sockaddr_in6>();
                // SAFETY: sockaddr_in6 fits in sockaddr_storage.
                unsafe {
                    (*sin6).sin6_family = AF_INET6 as sa_family_t;
                    (*sin6).sin6_port = port.to_be();
                    (*sin6).sin6_addr.s6_addr = v6.octets();
                }
            }
        }
        Self { storage }
    }

    fn as_sin(&self) -> &sockaddr_in {
        // SAFETY: only called when the stored family is AF_INET.
        unsafe { &*(&self.storage as *const sockaddr_storage).cast::<sockaddr_in>() }
    }

    fn as_sin6(&self) -> &sockaddr_in6 {
        // SAFETY: only called when the stored family is AF_INET6.
        unsafe { &*(&self.storage as *const sockaddr_storage).cast::<sockaddr_in6>() }
    }

    /// The stored address as an `IpAddr`.
    #[must_use]
    pub fn ip(&self) -> Option<IpAddr> {
        match i32::from(self.storage.ss_family) {
            AF_INET => Some(IpAddr::V4(Ipv4Addr::from(
                self.as_sin().sin_addr.s_addr.to_ne_bytes(),
            ))),
            AF_INET6 => Some(IpAddr::V6(Ipv6Addr::from(self.as_sin6().sin6_addr.s6_addr))),
            _ => None,
        }
    }

    /// The IPv4 part of the address, if it is one.
    #[must_use]
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match self.ip() {
            Some(IpAddr::V4(v4)) => Some(v4),
            _ => None,
        }
    }

    /// Canonical textual presentation of the address.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        self.ip().map(|ip| ip.to_string())
    }

    /// The port in host byte order.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        match i32::from(self.storage.ss_family) {
            AF_INET => Some(u16::from_be(self.as_sin().sin_port)),
            AF_INET6 => Some(u16::from_be(self.as_sin6().sin6_port)),
            _ => None,
        }
    }
}

/// Writes an IPv4 `sockaddr_in` through caller-provided out-pointers, the way
/// `getsockname`/`getpeername`/`accept` report addresses. The caller's buffer
/// is assumed to hold at least a `sockaddr_in`, which the socket API requires
/// of anyone passing a non-null address for an `AF_INET` socket.
///
/// # Safety
///
/// `addr` and `addrlen` must be valid for writes of `sockaddr_in` and
/// `socklen_t` respectively.
pub(crate) unsafe fn write_inet(
    ip: Ipv4Addr,
    port: u16,
    addr: *mut sockaddr,
    addrlen: *mut socklen_t,
) {
    let mut sin: sockaddr_in = zeroed();
    sin.sin_family = AF_INET as sa_family_t;
    sin.sin_port = port.to_be();
    sin.sin_addr.s_addr = u32::from(ip).to_be();
    ptr::copy_nonoverlapping(
        (&sin as *const sockaddr_in).cast::<u8>(),
        addr.cast::<u8>(),
        size_of::<sockaddr_in>(),
    );
    *addrlen = size_of::<sockaddr_in>() as socklen_t;
}

/// Builds a `sockaddr_un` for the given filesystem path, truncated to the
/// platform's `sun_path` limit minus the terminating NUL.
pub(crate) fn unix(path: &str) -> (sockaddr_un, socklen_t) {
    // SAFETY: all-zero is a valid sockaddr_un.
    let mut ua: sockaddr_un = unsafe { zeroed() };
    ua.sun_family = AF_UNIX as sa_family_t;
    let len = path.len().min(ua.sun_path.len() - 1);
    for (dst, src) in ua.sun_path.iter_mut().zip(&path.as_bytes()[..len]) {
        *dst = *src as c_char;
    }
    (ua, size_of::<sockaddr_un>() as socklen_t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_rejects_null_and_foreign_families() {
        assert!(unsafe { SockAddr::from_raw(ptr::null()) }.is_none());

        let mut un: sockaddr_un = unsafe { zeroed() };
        un.sun_family = AF_UNIX as sa_family_t;
        let got = unsafe { SockAddr::from_raw((&un as *const sockaddr_un).cast()) };
        assert!(got.is_none());
    }

    #[test]
    fn roundtrips_ipv4_through_raw() {
        let built = SockAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9)), 8080);
        let raw = (&built.storage as *const sockaddr_storage).cast::<sockaddr>();
        let copied = unsafe { SockAddr::from_raw(raw) }.expect("AF_INET should be accepted");
        assert_eq!(copied.host().as_deref(), Some("192.168.1.9"));
        assert_eq!(copied.port(), Some(8080));
        assert_eq!(copied.ipv4(), Some(Ipv4Addr::new(192, 168, 1, 9)));
    }

    #[test]
    fn presents_ipv6_canonically() {
        let addr = SockAddr::new("2001:db8:0:0:0:0:0:1".parse().unwrap(), 443);
        assert_eq!(addr.host().as_deref(), Some("2001:db8::1"));
        assert_eq!(addr.port(), Some(443));
        assert_eq!(addr.ipv4(), None);
    }

    #[test]
    fn write_inet_fills_caller_buffer() {
        let mut buf: sockaddr_storage = unsafe { zeroed() };
        let mut len: socklen_t = size_of::<sockaddr_storage>() as socklen_t;
        unsafe {
            write_inet(
                Ipv4Addr::new(127, 0, 0, 1),
                65530,
                (&mut buf as *mut sockaddr_storage).cast(),
                &mut len,
            );
        }
        assert_eq!(len as usize, size_of::<sockaddr_in>());
        let copied =
            unsafe { SockAddr::from_raw((&buf as *const sockaddr_storage).cast()) }.unwrap();
        assert_eq!(copied.host().as_deref(), Some("127.0.0.1"));
        assert_eq!(copied.port(), Some(65530));
    }

    #[test]
    fn unix_address_copies_and_truncates_path() {
        let (ua, _) = unix("/run/app.sock");
        let path: Vec<u8> = ua.sun_path.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
        assert_eq!(path, b"/run/app.sock");

        let long = "/".repeat(4096);
        let (ua, _) = unix(&long);
        let used = ua.sun_path.iter().take_while(|&&c| c != 0).count();
        assert_eq!(used, ua.sun_path.len() - 1);
    }
}
