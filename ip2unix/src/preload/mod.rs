//! The preloaded interposition layer.
//!
//! Everything the dynamic linker sees lives in [`shims`]: shadow definitions
//! of the C library's socket entry points, exported unmangled so that an
//! `LD_PRELOAD` of this object wins symbol resolution. The shims consult the
//! per-descriptor [`tracker`], delegate in-place rewrites to [`convert`], and
//! reach the C library's own definitions through [`real`].
//!
//! Nothing here runs at load time; every piece of global state (the socket
//! table, the rule list, resolved symbols, supervisor descriptors)
//! initializes lazily on first use, so merely mapping the object into a
//! process has no side effects.

pub(crate) mod convert;
pub(crate) mod real;
pub mod shims;
pub(crate) mod tracker;
