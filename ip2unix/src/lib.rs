//! ip2unix: transparent redirection of IP sockets to UNIX domain sockets.
//!
//! This crate builds a shared object that is meant to be preloaded into an
//! unmodified program via `LD_PRELOAD`. It shadows a small set of C library
//! socket functions (`socket`, `bind`, `connect`, `accept`, ...) and, whenever
//! the program touches an `AF_INET`/`AF_INET6` socket that matches one of the
//! user-supplied rules, swaps the underlying kernel object for an `AF_UNIX`
//! socket bound or connected to a filesystem path, without the program ever
//! noticing. Sockets that match no rule pass through untouched.
//!
//! # Usage
//!
//! ```bash
//! IP2UNIX_RULE_FILE=rules.json LD_PRELOAD=/path/to/libip2unix.so ./server
//! ```
//!
//! or via the companion `ip2unix` launcher binary, which prepares both
//! environment variables and then `exec()`s the target program.
//!
//! # Rule files
//!
//! A rule file is a JSON array of rule objects, evaluated first-match-wins:
//!
//! ```json
//! [
//!     { "direction": "incoming", "port": 8080, "socketPath": "/run/app.sock" },
//!     { "direction": "outgoing", "port": 5432, "socketPath": "/run/db.sock" }
//! ]
//! ```
//!
//! See [`rules`] for the full set of fields, including systemd-style socket
//! activation via `socketActivation`/`fdName` (behind the `socket-activation`
//! cargo feature, enabled by default).
//!
//! # Environment
//!
//! - `IP2UNIX_RULE_FILE` (required): path to the rule file. Looked up lazily
//!   on the first `bind`/`connect` that touches a tracked socket; absence is
//!   fatal at that point.
//! - `__IP2UNIX_VERBOSITY` (optional): a single digit raising the diagnostic
//!   verbosity on standard error. Defaults to fatal-only.
//!
//! The exported C symbols live in [`preload::shims`]; everything else is
//! plumbing shared with the launcher and the test suite.

mod lock_util;
mod logging;
pub mod preload;
pub mod rules;
pub mod sockaddr;
pub mod sockpath;
#[cfg(feature = "socket-activation")]
mod systemd;
