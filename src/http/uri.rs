//! Absolute-URI / CONNECT-target parsing and relative-URI rewriting (spec §4.1).
//!
//! Grounded in the teacher's inline `uri.strip_prefix("http://")` / manual
//! `host.split_once(':')` logic in `http_proxy.rs`, generalized into
//! standalone, testable functions instead of being inlined in the request
//! handler.

/// A parsed HTTP proxy target: host, port, and (for absolute URIs) the
/// path-and-query that should be sent to the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

/// Parses `http://host[:port][/path]` or `https://host[:port][/path]`
/// case-insensitively. Returns `(Target, path_and_query)`; the path defaults
/// to `/` when absent. IPv6 literals use `[...]` with an optional `:port`.
pub fn parse_absolute_uri(s: &str) -> Option<(Target, String)> {
    let lower = s.to_ascii_lowercase();
    let default_port = if lower.starts_with("http://") {
        80u16
    } else if lower.starts_with("https://") {
        443u16
    } else {
        return None;
    };
    let body = if default_port == 80 { &s[7..] } else { &s[8..] };

    let (authority, path) = match body.find('/') {
        Some(idx) => (&body[..idx], &body[idx..]),
        None => (body, "/"),
    };
    let (host, port) = split_authority(authority, default_port)?;
    Some((
        Target { host, port },
        if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        },
    ))
}

/// Parses `host:port` or `[ipv6]:port`. Port must be in 1..=65535.
pub fn parse_connect_target(s: &str) -> Option<Target> {
    let (host, port) = split_authority_no_default(s)?;
    if port == 0 {
        return None;
    }
    Some(Target { host, port })
}

/// Splits `authority` into `(host, port)`, applying `default_port` when no
/// `:port` suffix is present.
fn split_authority(authority: &str, default_port: u16) -> Option<(String, u16)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = format!("[{}]", &rest[..end]);
        let after = &rest[end + 1..];
        let port = if let Some(p) = after.strip_prefix(':') {
            p.parse().ok()?
        } else {
            default_port
        };
        return Some((host, port));
    }
    match authority.rsplit_once(':') {
        Some((host, port_str)) if !host.is_empty() => {
            let port: u16 = port_str.parse().ok()?;
            Some((host.to_string(), port))
        }
        _ => Some((authority.to_string(), default_port)),
    }
}

fn split_authority_no_default(s: &str) -> Option<(String, u16)> {
    if let Some(rest) = s.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = format!("[{}]", &rest[..end]);
        let after = &rest[end + 1..];
        let port: u16 = after.strip_prefix(':')?.parse().ok()?;
        return Some((host, port));
    }
    let (host, port_str) = s.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port: u16 = port_str.parse().ok()?;
    Some((host.to_string(), port))
}

/// Splits a bare `Host` header value (`host` or `host:port`, or an IPv6
/// literal form) into `(host, port)`, defaulting to port 80 when absent —
/// the fallback leg of `extractTarget` (spec §4.1).
pub fn split_host_port_default_80(host_header: &str) -> Option<Target> {
    let (host, port) = split_authority(host_header.trim(), 80)?;
    Some(Target { host, port })
}

/// Reduces an absolute URI to its path-and-query; a relative URI passes
/// through unchanged (spec §8 property 5).
pub fn rewrite_uri_to_relative(uri: &str) -> String {
    match parse_absolute_uri(uri) {
        Some((_, path)) => path,
        None => uri.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_http_uri_with_path() {
        let (target, path) = parse_absolute_uri("http://example.invalid/foo?q=1").unwrap();
        assert_eq!(target.host, "example.invalid");
        assert_eq!(target.port, 80);
        assert_eq!(path, "/foo?q=1");
    }

    #[test]
    fn parses_absolute_https_uri_default_port() {
        let (target, path) = parse_absolute_uri("HTTPS://Example.invalid").unwrap();
        assert_eq!(target.port, 443);
        assert_eq!(path, "/");
    }

    #[test]
    fn parses_absolute_uri_with_explicit_port() {
        let (target, _) = parse_absolute_uri("http://example.invalid:8080/x").unwrap();
        assert_eq!(target.port, 8080);
    }

    #[test]
    fn parses_absolute_uri_ipv6_literal() {
        let (target, path) = parse_absolute_uri("http://[::1]:8080/x").unwrap();
        assert_eq!(target.host, "[::1]");
        assert_eq!(target.port, 8080);
        assert_eq!(path, "/x");
    }

    #[test]
    fn rejects_non_absolute_uri() {
        assert!(parse_absolute_uri("/just/a/path").is_none());
    }

    #[test]
    fn parses_connect_target() {
        let target = parse_connect_target("example.invalid:443").unwrap();
        assert_eq!(target.host, "example.invalid");
        assert_eq!(target.port, 443);
    }

    #[test]
    fn parses_connect_target_ipv6() {
        let target = parse_connect_target("[::1]:443").unwrap();
        assert_eq!(target.host, "[::1]");
        assert_eq!(target.port, 443);
    }

    #[test]
    fn rejects_connect_target_without_port() {
        assert!(parse_connect_target("example.invalid").is_none());
        assert!(parse_connect_target("example.invalid:0").is_none());
    }

    #[test]
    fn rewrite_matches_spec_example() {
        assert_eq!(rewrite_uri_to_relative("http://h:80/x?q=1"), "/x?q=1");
        assert_eq!(rewrite_uri_to_relative("/already/relative"), "/already/relative");
    }
}
