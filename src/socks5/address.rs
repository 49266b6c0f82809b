//! SOCKS5 address form (spec §3, §4.1).
//!
//! Grounded in the teacher's inline `match atyp { 0x01 | 0x03 | 0x04 => ... }`
//! arms in `socks5.rs`, generalized into a standalone, round-trippable type
//! (cross-checked against `examples/0xinf0-nooshdaroo/src/socks5.rs` and
//! `examples/other_examples/06ea12db_sfackler-rust-socks__src-v5.rs.rs`, which
//! use the same three-tag shape).

use std::net::{Ipv4Addr, Ipv6Addr};

pub const ATYP_V4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_V6: u8 = 0x04;

/// A SOCKS5 destination/bind address, tagged by wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    /// Domain names are carried as raw UTF-8, up to 255 bytes per RFC 1928 §5.
    Domain(String),
}

impl Address {
    /// Canonical string form used for logging, DNS resolution, and outbound
    /// channel map keys: dotted-quad, colon-hex (no `::` compression on
    /// encode, per spec §9 open question 4), or the domain literal.
    pub fn host_string(&self) -> String {
        match self {
            Address::V4(ip) => ip.to_string(),
            Address::V6(ip) => {
                let segs = ip.segments();
                segs.iter()
                    .map(|s| format!("{:x}", s))
                    .collect::<Vec<_>>()
                    .join(":")
            }
            Address::Domain(d) => d.clone(),
        }
    }

    pub fn atyp(&self) -> u8 {
        match self {
            Address::V4(_) => ATYP_V4,
            Address::V6(_) => ATYP_V6,
            Address::Domain(_) => ATYP_DOMAIN,
        }
    }

    /// Number of bytes `encode_into` will append for the address portion alone
    /// (excludes ATYP tag byte and port).
    pub fn wire_len(&self) -> usize {
        match self {
            Address::V4(_) => 4,
            Address::V6(_) => 16,
            Address::Domain(d) => 1 + d.len(),
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.atyp());
        match self {
            Address::V4(ip) => out.extend_from_slice(&ip.octets()),
            Address::V6(ip) => out.extend_from_slice(&ip.octets()),
            Address::Domain(d) => {
                out.push(d.len() as u8);
                out.extend_from_slice(d.as_bytes());
            }
        }
    }

    /// Chooses the ATYP a reply should use for a *target* that was originally
    /// specified in string form (spec §4.6: "ATYP follows the original target
    /// form" — IPv6 if the host contains `:`, Domain if it starts with a
    /// letter, else IPv4).
    pub fn for_original_target_form(host: &str, port: u16) -> Address {
        if host.contains(':') {
            if let Ok(ip) = host.parse::<Ipv6Addr>() {
                return Address::V6(ip);
            }
            // Malformed-but-colon-bearing host: still tag it as the v6 form
            // the spec mandates; fall through to a best-effort domain.
        }
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Address::V4(ip);
        }
        let _ = port;
        Address::Domain(host.to_string())
    }

    /// Parses ATYP + address bytes + port (big-endian) from `buf`, returning
    /// the address, the port, and the number of bytes consumed. Non-destructive:
    /// callers pass a slice and only advance their own cursor on `Ok`.
    pub fn decode(buf: &[u8]) -> Result<(Address, u16, usize), AddressDecodeError> {
        if buf.is_empty() {
            return Err(AddressDecodeError::Incomplete);
        }
        let atyp = buf[0];
        match atyp {
            ATYP_V4 => {
                if buf.len() < 1 + 4 + 2 {
                    return Err(AddressDecodeError::Incomplete);
                }
                let ip = Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]);
                let port = u16::from_be_bytes([buf[5], buf[6]]);
                Ok((Address::V4(ip), port, 1 + 4 + 2))
            }
            ATYP_V6 => {
                if buf.len() < 1 + 16 + 2 {
                    return Err(AddressDecodeError::Incomplete);
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[1..17]);
                let port = u16::from_be_bytes([buf[17], buf[18]]);
                Ok((Address::V6(Ipv6Addr::from(octets)), port, 1 + 16 + 2))
            }
            ATYP_DOMAIN => {
                if buf.len() < 2 {
                    return Err(AddressDecodeError::Incomplete);
                }
                let len = buf[1] as usize;
                if buf.len() < 2 + len + 2 {
                    return Err(AddressDecodeError::Incomplete);
                }
                let domain = match std::str::from_utf8(&buf[2..2 + len]) {
                    Ok(s) => s.to_string(),
                    // Lossy-to-empty per spec §4.1; caller rejects empty domains.
                    Err(_) => String::new(),
                };
                let port_off = 2 + len;
                let port = u16::from_be_bytes([buf[port_off], buf[port_off + 1]]);
                Ok((Address::Domain(domain), port, port_off + 2))
            }
            other => Err(AddressDecodeError::UnknownAtyp(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressDecodeError {
    /// Not enough bytes yet; caller should wait for more input.
    Incomplete,
    UnknownAtyp(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_round_trips() {
        let addr = Address::V4(Ipv4Addr::new(127, 0, 0, 1));
        let mut buf = Vec::new();
        addr.encode_into(&mut buf);
        buf.extend_from_slice(&80u16.to_be_bytes());
        let (decoded, port, consumed) = Address::decode(&buf).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(port, 80);
        assert_eq!(consumed, buf.len());
        assert_eq!(addr.host_string(), "127.0.0.1");
    }

    #[test]
    fn v6_round_trips_no_compression() {
        let ip: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let addr = Address::V6(ip);
        let mut buf = Vec::new();
        addr.encode_into(&mut buf);
        buf.extend_from_slice(&443u16.to_be_bytes());
        let (decoded, port, consumed) = Address::decode(&buf).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(port, 443);
        assert_eq!(consumed, buf.len());
        assert_eq!(addr.host_string(), "2001:db8:0:0:0:0:0:1");
    }

    #[test]
    fn domain_round_trips() {
        let addr = Address::Domain("example.invalid".to_string());
        let mut buf = Vec::new();
        addr.encode_into(&mut buf);
        buf.extend_from_slice(&53u16.to_be_bytes());
        let (decoded, port, consumed) = Address::decode(&buf).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(port, 53);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn incomplete_buffer_is_non_destructive() {
        let addr = Address::V4(Ipv4Addr::new(1, 2, 3, 4));
        let mut buf = Vec::new();
        addr.encode_into(&mut buf);
        // missing the port bytes
        let err = Address::decode(&buf[..buf.len() - 1]).unwrap_err();
        assert_eq!(err, AddressDecodeError::Incomplete);
    }

    #[test]
    fn original_target_form_picks_atyp_by_host_shape() {
        assert_eq!(
            Address::for_original_target_form("127.0.0.1", 80).atyp(),
            ATYP_V4
        );
        assert_eq!(
            Address::for_original_target_form("::1", 80).atyp(),
            ATYP_V6
        );
        assert_eq!(
            Address::for_original_target_form("example.invalid", 80).atyp(),
            ATYP_DOMAIN
        );
    }
}
