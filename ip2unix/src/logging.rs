//! Leveled diagnostics on standard error.
//!
//! The layer runs inside arbitrary host processes, so all output goes through
//! [`libc_print`] (a plain `write(2)` under the hood) instead of the `std`
//! stdio machinery, and the verbosity is read once from the
//! `__IP2UNIX_VERBOSITY` environment variable with raw `getenv`. Anything at
//! or below the configured verbosity is printed as a single line prefixed
//! with `ip2unix <LEVEL>:`.
//!
//! [`fatal!`] is special: it always prints and then terminates the process
//! with `_exit(1)`, skipping destructors. Configuration faults (missing rule
//! file, unresolvable symbols, missing supervisor fds) are operator errors;
//! aborting is safer than silently bypassing the rules.

use core::sync::atomic::{AtomicI8, Ordering};

/// Diagnostic levels, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i8)]
pub(crate) enum Verbosity {
    Fatal = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
}

/// Cached verbosity; -1 means "not read from the environment yet".
static CURRENT: AtomicI8 = AtomicI8::new(UNSET);

const UNSET: i8 = -1;

/// Whether a message at `level` should be printed.
pub(crate) fn enabled(level: Verbosity) -> bool {
    let mut current = CURRENT.load(Ordering::Relaxed);
    if current == UNSET {
        current = init_from_env();
    }
    level as i8 <= current
}

/// Reads `__IP2UNIX_VERBOSITY` with raw `getenv`, so this works even when the
/// host process is in a state where `std::env` must not be touched.
fn init_from_env() -> i8 {
    let mut level = Verbosity::Fatal as i8;
    // SAFETY: getenv with a valid NUL-terminated key; the result is only
    // dereferenced while non-null.
    unsafe {
        let val = libc::getenv(c"__IP2UNIX_VERBOSITY".as_ptr());
        if !val.is_null() {
            let digit = *val as u8;
            if digit.is_ascii_digit() {
                level = ((digit - b'0') as i8).min(Verbosity::Debug as i8);
            }
        }
    }
    CURRENT.store(level, Ordering::Relaxed);
    level
}

macro_rules! fatal {
    ($($arg:tt)*) => {{
        ::libc_print::libc_eprintln!("ip2unix FATAL: {}", ::core::format_args!($($arg)*));
        // SAFETY: _exit is async-signal-safe and does not run destructors.
        unsafe { ::libc::_exit(1) }
    }};
}

macro_rules! error {
    ($($arg:tt)*) => {
        if $crate::logging::enabled($crate::logging::Verbosity::Error) {
            ::libc_print::libc_eprintln!("ip2unix ERROR: {}", ::core::format_args!($($arg)*));
        }
    };
}

macro_rules! warning {
    ($($arg:tt)*) => {
        if $crate::logging::enabled($crate::logging::Verbosity::Warning) {
            ::libc_print::libc_eprintln!("ip2unix WARNING: {}", ::core::format_args!($($arg)*));
        }
    };
}

macro_rules! info {
    ($($arg:tt)*) => {
        if $crate::logging::enabled($crate::logging::Verbosity::Info) {
            ::libc_print::libc_eprintln!("ip2unix INFO: {}", ::core::format_args!($($arg)*));
        }
    };
}

macro_rules! debug {
    ($($arg:tt)*) => {
        if $crate::logging::enabled($crate::logging::Verbosity::Debug) {
            ::libc_print::libc_eprintln!("ip2unix DEBUG: {}", ::core::format_args!($($arg)*));
        }
    };
}

pub(crate) use {debug, error, fatal, info, warning};
