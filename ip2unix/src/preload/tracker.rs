//! Per-descriptor socket tracking shared by every shim.
//!
//! One process-global table maps file descriptors to entries. An *owner*
//! entry is created by `socket` for AF_INET/AF_INET6 descriptors and holds
//! the socket record; a *child* entry is created by `accept` on a tracked
//! listener and shares the listener's record. Records are reference-counted
//! so a child outliving its closed listener keeps reporting the synthetic
//! peer until it closes itself.
//!
//! All table access happens under one mutex, and the bind/connect/close
//! shims keep holding it across the underlying call, so a conversion and the
//! operation it enables are atomic as far as any other thread can observe
//! through the table.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use libc::c_int;

use crate::lock_util;

/// One generic-level socket option as the caller applied it.
pub(crate) struct SockoptEntry {
    pub(crate) level: c_int,
    pub(crate) optname: c_int,
    pub(crate) optval: Vec<u8>,
}

/// State for one tracked parent socket.
pub(crate) struct SocketRecord {
    /// Type bits as passed to `socket`, including flag bits like
    /// `SOCK_CLOEXEC`.
    pub(crate) socktype: c_int,
    pub(crate) protocol: c_int,
    /// Local address/port the caller asked for, cached once a matched
    /// bind/connect succeeded; zero until then. `getsockname` reports these
    /// instead of the UNIX path.
    pub(crate) local_addr: Ipv4Addr,
    pub(crate) local_port: u16,
    /// Whether the kernel object under the descriptor is already AF_UNIX.
    /// Monotone; never reset.
    pub(crate) converted: bool,
    /// Index of the matched rule in the global rule list, set at most once.
    pub(crate) rule: Option<usize>,
    /// Options to replay on conversion, in the order `setsockopt` succeeded.
    pub(crate) sockopts: VecDeque<SockoptEntry>,
    /// Filesystem path a matched incoming bind landed on, unlinked on close.
    pub(crate) sockpath: Option<String>,
}

impl SocketRecord {
    pub(crate) fn new(socktype: c_int, protocol: c_int) -> Self {
        Self {
            socktype,
            protocol,
            local_addr: Ipv4Addr::UNSPECIFIED,
            local_port: 0,
            converted: false,
            rule: None,
            sockopts: VecDeque::new(),
            sockpath: None,
        }
    }
}

pub(crate) type RecordRef = Arc<Mutex<SocketRecord>>;

/// A tracked descriptor: either the owner of a record or a child referring
/// to its parent's.
pub(crate) enum SocketEntry {
    Owner(RecordRef),
    Child(RecordRef),
}

impl SocketEntry {
    /// The record behind this entry: its own for owners, the parent's for
    /// children.
    pub(crate) fn record(&self) -> RecordRef {
        match self {
            Self::Owner(record) | Self::Child(record) => Arc::clone(record),
        }
    }

    pub(crate) fn is_child(&self) -> bool {
        matches!(self, Self::Child(_))
    }
}

/// The descriptor table. Descriptor numbers are reused by the kernel, so an
/// insert may overwrite a number that was erased earlier (or that a missed
/// close left behind).
pub(crate) struct SocketTable {
    entries: HashMap<c_int, SocketEntry>,
}

impl SocketTable {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub(crate) fn insert_owner(&mut self, fd: c_int, record: SocketRecord) {
        self.entries
            .insert(fd, SocketEntry::Owner(Arc::new(Mutex::new(record))));
    }

    pub(crate) fn insert_child(&mut self, fd: c_int, parent: RecordRef) {
        self.entries.insert(fd, SocketEntry::Child(parent));
    }

    pub(crate) fn get(&self, fd: c_int) -> Option<&SocketEntry> {
        self.entries.get(&fd)
    }

    pub(crate) fn remove(&mut self, fd: c_int) -> Option<SocketEntry> {
        self.entries.remove(&fd)
    }
}

static TABLE: LazyLock<Mutex<SocketTable>> = LazyLock::new(|| Mutex::new(SocketTable::new()));

/// Locks the global table.
pub(crate) fn lock() -> MutexGuard<'static, SocketTable> {
    lock_util::recover(TABLE.lock())
}

/// Locks an individual record. Always acquired while already holding the
/// table lock, never the other way around.
pub(crate) fn lock_record(record: &RecordRef) -> MutexGuard<'_, SocketRecord> {
    lock_util::recover(record.lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_and_child_share_one_record() {
        let mut table = SocketTable::new();
        table.insert_owner(10, SocketRecord::new(libc::SOCK_STREAM, 0));
        let parent = table.get(10).unwrap().record();
        table.insert_child(11, Arc::clone(&parent));

        lock_record(&parent).local_port = 8080;
        let child = table.get(11).unwrap();
        assert!(child.is_child());
        assert_eq!(lock_record(&child.record()).local_port, 8080);
    }

    #[test]
    fn record_survives_owner_removal_while_child_remains() {
        let mut table = SocketTable::new();
        table.insert_owner(10, SocketRecord::new(libc::SOCK_STREAM, 0));
        let parent = table.get(10).unwrap().record();
        table.insert_child(11, parent);

        table.remove(10);
        let child = table.get(11).unwrap().record();
        assert_eq!(lock_record(&child).socktype, libc::SOCK_STREAM);
    }

    #[test]
    fn reused_descriptor_numbers_overwrite() {
        let mut table = SocketTable::new();
        table.insert_owner(5, SocketRecord::new(libc::SOCK_STREAM, 0));
        table.remove(5);
        table.insert_owner(5, SocketRecord::new(libc::SOCK_DGRAM, 0));
        let record = table.get(5).unwrap().record();
        assert_eq!(lock_record(&record).socktype, libc::SOCK_DGRAM);
    }

    #[test]
    fn untracked_descriptors_are_absent() {
        let table = SocketTable::new();
        assert!(table.get(42).is_none());
    }
}
