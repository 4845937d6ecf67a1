//! Micro-benchmarks for the per-call hot paths.
//!
//! Rule matching and path formatting run inside the bind/connect shims while
//! the socket-table mutex is held, so their cost is paid by every
//! connection-establishing call the host process makes.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::net::{IpAddr, Ipv4Addr};

use ip2unix::rules::{parse_rules_str, RuleDir};
use ip2unix::sockaddr::SockAddr;
use ip2unix::sockpath::format_sockpath;

fn bench_rule_match(c: &mut Criterion) {
    // A miss has to walk the whole list, so pad it with rules that fail at
    // different fields before the one that matches.
    let rules = parse_rules_str(
        r#"[
            {"direction": "outgoing", "socketPath": "/run/out.sock"},
            {"direction": "incoming", "address": "10.0.0.1", "socketPath": "/run/a.sock"},
            {"direction": "incoming", "port": 443, "socketPath": "/run/b.sock"},
            {"direction": "incoming", "type": "udp", "socketPath": "/run/c.sock"},
            {"direction": "incoming", "port": 8080, "socketPath": "/run/http.sock"}
        ]"#,
    )
    .expect("benchmark rules should parse");

    let addr = SockAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

    c.bench_function("first_matching_rule", |b| {
        b.iter(|| {
            rules
                .iter()
                .position(|r| r.matches(RuleDir::Incoming, black_box(&addr), libc::SOCK_STREAM))
        })
    });

    let miss = SockAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9999);
    c.bench_function("no_matching_rule", |b| {
        b.iter(|| {
            rules
                .iter()
                .position(|r| r.matches(RuleDir::Incoming, black_box(&miss), libc::SOCK_STREAM))
        })
    });
}

fn bench_format_sockpath(c: &mut Criterion) {
    c.bench_function("format_sockpath_plain", |b| {
        b.iter(|| format_sockpath(black_box("/run/app.sock"), "0.0.0.0", 8080, None))
    });

    c.bench_function("format_sockpath_placeholders", |b| {
        b.iter(|| {
            format_sockpath(
                black_box("/tmp/%t-%a-%p.sock"),
                "192.168.1.100",
                65535,
                ip2unix::rules::ip_type_of(libc::SOCK_STREAM),
            )
        })
    });
}

criterion_group!(benches, bench_rule_match, bench_format_sockpath);
criterion_main!(benches);
