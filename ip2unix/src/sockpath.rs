//! Socket-path template expansion.
//!
//! Rule paths may embed the caller-supplied address (`%a`), port (`%p`), and
//! transport type (`%t`), plus `%%` for a literal percent sign. Anything else
//! after a `%` (including a `%` at the end of the template) is reproduced
//! verbatim.

use crate::rules::RuleIpType;

/// Expands the placeholders in a socket-path template.
///
/// `addr` is the textual caller address (even a wildcard like `0.0.0.0` is
/// used as-is), `port` the host-order port number, and `ip_type` the
/// transport derived from the socket type, rendered as `tcp`, `udp`, or
/// `unknown`.
#[must_use]
pub fn format_sockpath(
    template: &str,
    addr: &str,
    port: u16,
    ip_type: Option<RuleIpType>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                out.push('%');
                chars.next();
            }
            Some('a') => {
                out.push_str(addr);
                chars.next();
            }
            Some('p') => {
                out.push_str(&port.to_string());
                chars.next();
            }
            Some('t') => {
                out.push_str(match ip_type {
                    Some(RuleIpType::Tcp) => "tcp",
                    Some(RuleIpType::Udp) => "udp",
                    None => "unknown",
                });
                chars.next();
            }
            // Unrecognized escape or trailing '%': keep the '%' and let the
            // following character (if any) come through on its own.
            _ => out.push('%'),
        }
    }

    out
}
