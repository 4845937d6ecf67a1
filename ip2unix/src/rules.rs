//! Rule model, rule-file parsing, and the process-global rule store.
//!
//! A rule file is a JSON array of objects; rules are evaluated in file order
//! and the first one that matches a `bind`/`connect` wins. Parsing and
//! validation are plain library functions so the launcher can run its
//! `--check`/`--print` modes without touching any process-global state; the
//! preloaded layer itself goes through [`global`], which initializes the
//! ordered list exactly once from `IP2UNIX_RULE_FILE` and treats every
//! configuration fault as fatal.

use std::ffi::CString;
use std::fmt;
use std::fmt::Write as _;
use std::io;
use std::net::IpAddr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use libc::c_int;
use serde::Deserialize;
use spin::Once;

use crate::logging::fatal;
use crate::preload::real;
use crate::sockaddr::SockAddr;

/// Which side of a connection a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDir {
    /// `bind` (and everything accepted through the resulting listener).
    Incoming,
    /// `connect`.
    Outgoing,
}

/// Transport selector derived from the socket type bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleIpType {
    Tcp,
    Udp,
}

/// A single redirection rule.
///
/// All fields except `direction` are optional; an unset `address`, `port`, or
/// `type` acts as a wildcard. Exactly one of `socket_path` and
/// `socket_activation` must be given.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Rule {
    pub direction: RuleDir,
    #[serde(rename = "type", default)]
    pub ip_type: Option<RuleIpType>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Path template for the substituted UNIX socket; supports the `%a`,
    /// `%p`, `%t`, and `%%` escapes (see [`crate::sockpath`]).
    #[serde(default)]
    pub socket_path: Option<String>,
    /// Take the listening socket from the supervisor instead of creating one.
    #[serde(default)]
    pub socket_activation: bool,
    /// Pick the supervisor-passed descriptor with this name rather than the
    /// next unnamed one.
    #[serde(default)]
    pub fd_name: Option<String>,
}

impl Rule {
    /// Whether this rule applies to a call with the given direction, caller
    /// address, and socket type bits. Matching is pure; unset fields succeed.
    pub fn matches(&self, dir: RuleDir, addr: &SockAddr, socktype: c_int) -> bool {
        if self.direction != dir {
            return false;
        }
        if let Some(want) = &self.address {
            if addr.host().as_deref() != Some(want.as_str()) {
                return false;
            }
        }
        if let Some(want) = self.port {
            if addr.port() != Some(want) {
                return false;
            }
        }
        if let Some(want) = self.ip_type {
            if ip_type_of(socktype) != Some(want) {
                return false;
            }
        }
        true
    }
}

/// Maps socket type bits to a transport selector: stream is tcp, datagram is
/// udp, anything else matches no typed rule.
pub fn ip_type_of(socktype: c_int) -> Option<RuleIpType> {
    match socktype & (libc::SOCK_STREAM | libc::SOCK_DGRAM) {
        libc::SOCK_STREAM => Some(RuleIpType::Tcp),
        libc::SOCK_DGRAM => Some(RuleIpType::Udp),
        _ => None,
    }
}

/// Failure to load a rule file.
#[derive(Debug)]
pub enum RuleError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The file is not valid JSON of the expected shape.
    Parse(serde_json::Error),
    /// A rule parsed but is not usable; `rule` is its zero-based position.
    Invalid { rule: usize, reason: String },
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "unable to read rule file: {e}"),
            Self::Parse(e) => write!(f, "unable to parse rule file: {e}"),
            Self::Invalid { rule, reason } => write!(f, "rule #{rule}: {reason}"),
        }
    }
}

impl std::error::Error for RuleError {}

impl From<std::io::Error> for RuleError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for RuleError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

/// Parses and validates a rule file.
///
/// # Errors
///
/// Returns a [`RuleError`] if the file cannot be read, is not a JSON array of
/// rule objects, or contains a rule that fails validation.
pub fn parse_rules_file(path: &Path) -> Result<Vec<Rule>, RuleError> {
    parse_rules_str(&read_file_raw(path)?)
}

/// Reads the rule file with raw descriptor IO.
///
/// This crate's own `close` shadows the C library's, and the rule store can
/// initialize while the socket-table mutex is held; going through `std::fs`
/// here would re-enter the shims when the file descriptor is dropped. The
/// descriptor is closed through the resolved real implementation instead.
fn read_file_raw(path: &Path) -> Result<String, RuleError> {
    let bad_data = |msg| RuleError::Io(io::Error::new(io::ErrorKind::InvalidData, msg));

    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| bad_data("path contains a NUL byte"))?;
    // SAFETY: cpath is NUL-terminated; the descriptor is valid until the
    // real close below.
    let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
    if fd == -1 {
        return Err(RuleError::Io(io::Error::last_os_error()));
    }

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = unsafe { libc::read(fd, chunk.as_mut_ptr().cast(), chunk.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            unsafe { real::CLOSE.get()(fd) };
            return Err(RuleError::Io(err));
        }
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n as usize]);
    }
    unsafe { real::CLOSE.get()(fd) };

    String::from_utf8(buf).map_err(|_| bad_data("rule file is not valid UTF-8"))
}

/// Parses and validates rules from an in-memory JSON document.
///
/// # Errors
///
/// See [`parse_rules_file`].
pub fn parse_rules_str(input: &str) -> Result<Vec<Rule>, RuleError> {
    let mut rules: Vec<Rule> = serde_json::from_str(input)?;
    for (pos, rule) in rules.iter_mut().enumerate() {
        validate_rule(pos, rule)?;
    }
    Ok(rules)
}

fn invalid(rule: usize, reason: impl Into<String>) -> RuleError {
    RuleError::Invalid {
        rule,
        reason: reason.into(),
    }
}

/// Checks a single rule and normalizes its address to the canonical textual
/// presentation, so the matcher can compare strings.
fn validate_rule(pos: usize, rule: &mut Rule) -> Result<(), RuleError> {
    if let Some(addr) = &rule.address {
        match addr.parse::<IpAddr>() {
            Ok(ip) => rule.address = Some(ip.to_string()),
            Err(_) => {
                return Err(invalid(
                    pos,
                    format!("address \"{addr}\" is not a valid IPv4 or IPv6 address"),
                ))
            }
        }
    }

    if rule.port == Some(0) {
        return Err(invalid(pos, "port number is not in range 1..65535"));
    }

    let has_path = rule.socket_path.as_deref().is_some_and(|p| !p.is_empty());
    if rule.socket_activation {
        if has_path {
            return Err(invalid(
                pos,
                "socket activation cannot be combined with a socket path",
            ));
        }
        #[cfg(not(feature = "socket-activation"))]
        return Err(invalid(pos, "socket activation support is not compiled in"));
    } else {
        if !has_path {
            return Err(invalid(
                pos,
                "no socket path specified and socket activation is disabled",
            ));
        }
        if rule.fd_name.is_some() {
            return Err(invalid(pos, "fdName requires socket activation"));
        }
    }

    if let Some(path) = &rule.socket_path {
        if !path.is_empty() && !path.starts_with('/') {
            return Err(invalid(pos, "socket path has to be absolute"));
        }
    }

    Ok(())
}

/// Renders a human-readable table of the given rules (the launcher's
/// `--print` output).
#[must_use]
pub fn render_rules(rules: &[Rule]) -> String {
    let mut out = String::new();
    for (pos, rule) in rules.iter().enumerate() {
        let direction = match rule.direction {
            RuleDir::Incoming => "incoming",
            RuleDir::Outgoing => "outgoing",
        };
        let ip_type = match rule.ip_type {
            Some(RuleIpType::Tcp) => "TCP",
            Some(RuleIpType::Udp) => "UDP",
            None => "TCP and UDP",
        };
        let _ = writeln!(out, "Rule #{pos}:");
        let _ = writeln!(out, "  Direction: {direction}");
        let _ = writeln!(out, "  IP Type: {ip_type}");
        let _ = writeln!(out, "  Address: {}", rule.address.as_deref().unwrap_or("<any>"));
        match rule.port {
            Some(port) => {
                let _ = writeln!(out, "  Port: {port}");
            }
            None => {
                let _ = writeln!(out, "  Port: <any>");
            }
        }
        if rule.socket_activation {
            match &rule.fd_name {
                Some(name) => {
                    let _ = writeln!(out, "  Socket activation with file descriptor name: {name}");
                }
                None => {
                    let _ = writeln!(out, "  Socket activation.");
                }
            }
        } else if let Some(path) = &rule.socket_path {
            let _ = writeln!(out, "  Socket path: {path}");
        }
    }
    out
}

/// The immutable, process-global rule list.
static RULES: Once<Vec<Rule>> = Once::new();

/// Returns the global rule list, initializing it on first use from the file
/// named by `IP2UNIX_RULE_FILE`. Concurrent first calls are serialized; a
/// missing variable or a bad rule file terminates the process.
pub(crate) fn global() -> &'static [Rule] {
    RULES.call_once(|| {
        let Some(path) = std::env::var_os("IP2UNIX_RULE_FILE") else {
            fatal!("unable to find IP2UNIX_RULE_FILE in the environment");
        };
        match parse_rules_file(Path::new(&path)) {
            Ok(rules) => rules,
            Err(e) => fatal!("{}: {e}", path.to_string_lossy()),
        }
    })
}
