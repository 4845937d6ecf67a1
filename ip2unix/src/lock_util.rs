//! Lock-poisoning recovery for the process-global state.
//!
//! A panic in some host thread while a shim holds one of our mutexes would
//! poison it and turn every later socket call into a panic of its own. The
//! layer must stay invisible to the host, so we recover the guard and keep
//! going: stale tracking state degrades redirection, but a crashed host
//! process is strictly worse.

use std::sync::{MutexGuard, PoisonError};

use crate::logging::warning;

/// Recovers from a poisoned mutex, logging once per occurrence.
pub(crate) fn recover<'a, T>(
    result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    result.unwrap_or_else(|poison| {
        warning!("recovering from poisoned lock");
        poison.into_inner()
    })
}
