//! Resolution of the C library's own definitions of the shadowed symbols.
//!
//! Each shim needs to call the function it is standing in front of, which is
//! whatever comes *after* us in the dynamic-symbol search order, i.e.
//! `dlsym(RTLD_NEXT, ...)`. Lookups are memoized per symbol behind a
//! [`spin::Once`], so the first caller resolves under the cell's internal
//! lock and everyone else reuses the cached pointer. A symbol the dynamic
//! linker cannot find means the process is wired up wrong (not preloaded into
//! anything that links libc); there is no sane fallback, so resolution
//! failure is fatal.

use core::ffi::{c_char, c_void};
use core::mem;

use libc::{c_int, sockaddr, socklen_t, RTLD_NEXT};
use spin::Once;

use crate::logging::fatal;

pub(crate) type SocketFn = unsafe extern "C" fn(c_int, c_int, c_int) -> c_int;
pub(crate) type SetsockoptFn =
    unsafe extern "C" fn(c_int, c_int, c_int, *const c_void, socklen_t) -> c_int;
/// Shared by `bind` and `connect`, which have identical signatures.
pub(crate) type SockaddrFn = unsafe extern "C" fn(c_int, *const sockaddr, socklen_t) -> c_int;
#[cfg(feature = "socket-activation")]
pub(crate) type ListenFn = unsafe extern "C" fn(c_int, c_int) -> c_int;
pub(crate) type Accept4Fn =
    unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t, c_int) -> c_int;
pub(crate) type SocknameFn = unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t) -> c_int;
pub(crate) type CloseFn = unsafe extern "C" fn(c_int) -> c_int;

/// A lazily resolved `RTLD_NEXT` function pointer.
///
/// The symbol string carries its own NUL terminator so resolution can hand
/// it straight to `dlsym`.
pub(crate) struct RealFn<T> {
    symbol: &'static str,
    fptr: Once<T>,
}

impl<T: Copy> RealFn<T> {
    pub(crate) const fn new(symbol: &'static str) -> Self {
        Self {
            symbol,
            fptr: Once::new(),
        }
    }

    /// Returns the underlying implementation, resolving it on first use.
    pub(crate) fn get(&self) -> T {
        *self.fptr.call_once(|| {
            // SAFETY: the symbol string is NUL-terminated by construction and
            // T is the function's actual signature at every use site.
            unsafe {
                let raw = libc::dlsym(RTLD_NEXT, self.symbol.as_ptr().cast::<c_char>());
                if raw.is_null() {
                    fatal!("dlsym({}): symbol not found", self.name());
                }
                mem::transmute_copy::<*mut c_void, T>(&raw)
            }
        })
    }

    fn name(&self) -> &'static str {
        self.symbol.trim_end_matches('\0')
    }
}

pub(crate) static SOCKET: RealFn<SocketFn> = RealFn::new("socket\0");
pub(crate) static SETSOCKOPT: RealFn<SetsockoptFn> = RealFn::new("setsockopt\0");
pub(crate) static BIND: RealFn<SockaddrFn> = RealFn::new("bind\0");
pub(crate) static CONNECT: RealFn<SockaddrFn> = RealFn::new("connect\0");
#[cfg(feature = "socket-activation")]
pub(crate) static LISTEN: RealFn<ListenFn> = RealFn::new("listen\0");
pub(crate) static ACCEPT4: RealFn<Accept4Fn> = RealFn::new("accept4\0");
pub(crate) static GETPEERNAME: RealFn<SocknameFn> = RealFn::new("getpeername\0");
pub(crate) static GETSOCKNAME: RealFn<SocknameFn> = RealFn::new("getsockname\0");
pub(crate) static CLOSE: RealFn<CloseFn> = RealFn::new("close\0");
