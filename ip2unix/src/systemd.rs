//! Supervisor-passed listening sockets (the systemd listen-fds protocol).
//!
//! When a matched rule requests socket activation, the listening descriptor
//! is not created here at all: the supervisor opened it, listened on it, and
//! handed it down as an inherited descriptor. The protocol is plain
//! environment plumbing: `LISTEN_FDS` holds the count of descriptors
//! starting at [`LISTEN_FDS_START`], and the optional `LISTEN_FDNAMES` holds
//! a parallel colon-separated name list.
//!
//! Rules pick descriptors either by name (`fdName`) or, lacking one, in FIFO
//! order from the unnamed pool. The placeholder names `""`, `"unknown"`, and
//! `"stored"` count as unnamed. Every lookup failure is fatal: a rule that
//! asked for a supervisor socket which does not exist is an operator error,
//! not something to paper over.

use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;
use std::sync::Mutex;

use crate::lock_util;
use crate::logging::{debug, fatal, info};
use crate::rules::Rule;

/// First inherited descriptor under the listen-fds protocol.
const LISTEN_FDS_START: RawFd = 3;

/// The supervisor's descriptors, split by whether they carry a usable name.
struct PassedFds {
    named: HashMap<String, RawFd>,
    unnamed: VecDeque<RawFd>,
}

/// Lazily built from the environment on the first activation-rule match.
static PASSED: Mutex<Option<PassedFds>> = Mutex::new(None);

/// Splits `count` descriptors into named and unnamed pools according to the
/// colon-separated name list, if one was passed.
fn collect(count: usize, names: Option<&str>) -> PassedFds {
    let mut passed = PassedFds {
        named: HashMap::new(),
        unnamed: VecDeque::new(),
    };
    let mut names = names.map(|n| n.split(':'));

    for i in 0..count {
        let fd = LISTEN_FDS_START + i as RawFd;
        let name = names
            .as_mut()
            .and_then(Iterator::next)
            .unwrap_or_default();
        match name {
            "" | "unknown" | "stored" => passed.unnamed.push_back(fd),
            _ => {
                debug!("got supervisor file descriptor named '{name}' ({fd})");
                passed.named.insert(name.to_owned(), fd);
            }
        }
    }

    passed
}

fn fetch() -> PassedFds {
    let Ok(listen_fds) = std::env::var("LISTEN_FDS") else {
        fatal!("no LISTEN_FDS environment variable set, but socket activation is used in rules");
    };
    let Ok(count) = listen_fds.parse::<usize>() else {
        fatal!("invalid value '{listen_fds}' for the LISTEN_FDS environment variable");
    };
    if count == 0 {
        fatal!("needed at least one supervisor socket file descriptor, but found zero");
    }
    info!("number of supervisor file descriptors found in LISTEN_FDS: {count}");

    let names = std::env::var("LISTEN_FDNAMES").ok();
    collect(count, names.as_deref())
}

/// Returns the supervisor descriptor a rule is entitled to: the one matching
/// its `fdName`, or the next unnamed one in passing order. Exhaustion or an
/// unknown name terminates the process.
pub(crate) fn fd_for_rule(rule: &Rule) -> RawFd {
    let mut guard = lock_util::recover(PASSED.lock());
    let passed = guard.get_or_insert_with(fetch);

    if let Some(name) = &rule.fd_name {
        match passed.named.get(name) {
            Some(fd) => *fd,
            None => fatal!("can't get supervisor socket for '{name}'"),
        }
    } else {
        match passed.unnamed.pop_front() {
            Some(fd) => fd,
            None => fatal!("ran out of supervisor sockets to assign"),
        }
    }
}
