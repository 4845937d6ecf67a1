//! End-to-end test for socket activation: bind/listen/accept/close against a
//! supervisor-passed descriptor.
//!
//! This lives in its own integration-test binary because it plays the
//! supervisor itself: it has to stage a listening socket at the protocol's
//! first inherited descriptor number (3) and own the `LISTEN_FDS` /
//! `IP2UNIX_RULE_FILE` environment for the whole process.

#![cfg(feature = "socket-activation")]

use std::fs;
use std::mem::{size_of, zeroed};
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};

use libc::{c_int, sockaddr, sockaddr_in, sockaddr_storage, socklen_t};

use ip2unix::preload::shims;

const LISTEN_FDS_START: c_int = 3;

#[test]
fn activation_rule_reuses_the_supervisor_descriptor() {
    // The whole scenario is one test function: it owns fd 3 and the process
    // environment, neither of which can be shared with parallel tests.
    if unsafe { libc::fcntl(LISTEN_FDS_START, libc::F_GETFD) } != -1 {
        eprintln!("skipping: fd {LISTEN_FDS_START} is already in use in this process");
        return;
    }

    let dir = std::env::temp_dir().join(format!("ip2unix-sa-test-{}", std::process::id()));
    fs::create_dir_all(&dir).expect("create test dir");
    let sock_path = dir.join("supervised.sock");

    // Play supervisor: listen on a UNIX socket and pass it down as fd 3.
    let supervisor = UnixListener::bind(&sock_path).expect("bind supervisor socket");
    assert_eq!(
        unsafe { libc::dup2(supervisor.as_raw_fd(), LISTEN_FDS_START) },
        LISTEN_FDS_START
    );
    std::env::set_var("LISTEN_FDS", "1");

    let rule_file = dir.join("rules.json");
    fs::write(
        &rule_file,
        r#"[{"direction": "incoming", "port": 10080, "socketActivation": true}]"#,
    )
    .expect("write rule file");
    std::env::set_var("IP2UNIX_RULE_FILE", &rule_file);

    let fd = unsafe { shims::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    assert!(fd >= 0);

    // bind must not create a socket of its own; it aliases fd 3 instead.
    let mut sin: sockaddr_in = unsafe { zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = 10080u16.to_be();
    let ret = unsafe {
        shims::bind(
            fd,
            (&sin as *const sockaddr_in).cast::<sockaddr>(),
            size_of::<sockaddr_in>() as socklen_t,
        )
    };
    assert_eq!(ret, 0);

    // The supervisor already listened; the shim swallows the call.
    assert_eq!(unsafe { shims::listen(fd, 5) }, 0);

    // The caller-visible local endpoint is the one it asked to bind.
    let mut local: sockaddr_storage = unsafe { zeroed() };
    let mut local_len = size_of::<sockaddr_storage>() as socklen_t;
    let ret = unsafe {
        shims::getsockname(fd, (&mut local as *mut sockaddr_storage).cast(), &mut local_len)
    };
    assert_eq!(ret, 0);
    let local_sin = unsafe { &*(&local as *const sockaddr_storage).cast::<sockaddr_in>() };
    assert_eq!(u16::from_be(local_sin.sin_port), 10080);

    // A client connecting to the supervisor's socket arrives through fd.
    let _client = UnixStream::connect(&sock_path).expect("connect to supervised socket");
    let mut peer: sockaddr_storage = unsafe { zeroed() };
    let mut peer_len = size_of::<sockaddr_storage>() as socklen_t;
    let acc_fd = unsafe {
        shims::accept(fd, (&mut peer as *mut sockaddr_storage).cast(), &mut peer_len)
    };
    assert!(acc_fd >= 0, "accept on the supervised descriptor failed");

    let sin = unsafe { &*(&peer as *const sockaddr_storage).cast::<sockaddr_in>() };
    assert_eq!(i32::from(peer.ss_family), libc::AF_INET);
    assert_eq!(Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()), Ipv4Addr::LOCALHOST);
    assert_eq!(u16::from_be(sin.sin_port), 65530);

    assert_eq!(unsafe { shims::close(acc_fd) }, 0);

    // close detaches the tracking entry but leaves the kernel object alone:
    // the supervisor still owns it, and new connections keep arriving.
    assert_eq!(unsafe { shims::close(fd) }, 0);
    assert_ne!(unsafe { libc::fcntl(LISTEN_FDS_START, libc::F_GETFD) }, -1);
    let _late_client =
        UnixStream::connect(&sock_path).expect("supervisor socket must still accept connections");
}
