//! SOCKS5 greeting / command / reply / UDP-header framing (spec §4.1).
//!
//! Every `decode_*` function is non-destructive: it reads from a `&[u8]` slice
//! and returns how many bytes it consumed on success, or `None` when the
//! buffer doesn't yet hold a complete message. Callers (see `state.rs`) only
//! advance their real accumulation buffer's cursor once a decode succeeds,
//! matching the "operate on a copy, advance only on success" contract.

use super::address::{Address, AddressDecodeError};

pub const VERSION: u8 = 0x05;
pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

pub const REP_SUCCESS: u8 = 0x00;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;

/// `VER | NMETHODS | METHODS[NMETHODS]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

impl Greeting {
    pub fn offers_no_auth(&self) -> bool {
        self.methods.contains(&METHOD_NO_AUTH)
    }

    /// Returns `(greeting, bytes_consumed)`, or `None` if incomplete. Returns
    /// `Err` only for a version mismatch, which the caller treats the same as
    /// "malformed" (close, no reply expected).
    pub fn decode(buf: &[u8]) -> Result<Option<(Greeting, usize)>, ()> {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf[0] != VERSION {
            return Err(());
        }
        if buf.len() < 2 {
            return Ok(None);
        }
        let nmethods = buf[1] as usize;
        if nmethods == 0 {
            return Err(());
        }
        if buf.len() < 2 + nmethods {
            return Ok(None);
        }
        let methods = buf[2..2 + nmethods].to_vec();
        Ok(Some((Greeting { methods }, 2 + nmethods)))
    }

    pub fn encode_reply(method: u8) -> [u8; 2] {
        [VERSION, method]
    }
}

/// `VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub cmd: u8,
    pub address: Address,
    pub port: u16,
}

impl Command {
    pub fn decode(buf: &[u8]) -> Result<Option<(Command, usize)>, ()> {
        if buf.len() < 4 {
            return Ok(None);
        }
        if buf[0] != VERSION {
            return Err(());
        }
        let cmd = buf[1];
        if !matches!(cmd, CMD_CONNECT | CMD_BIND | CMD_UDP_ASSOCIATE) {
            return Err(());
        }
        if buf[2] != 0x00 {
            return Err(());
        }
        match Address::decode(&buf[3..]) {
            Ok((address, port, consumed)) => Ok(Some((Command { cmd, address, port }, 3 + consumed))),
            Err(AddressDecodeError::Incomplete) => Ok(None),
            Err(AddressDecodeError::UnknownAtyp(_)) => Err(()),
        }
    }
}

/// `VER | REP | RSV | ATYP | BND.ADDR | BND.PORT`
pub fn encode_reply(rep: u8, bind_address: &Address, bind_port: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + bind_address.wire_len());
    out.push(VERSION);
    out.push(rep);
    out.push(0x00);
    bind_address.encode_into(&mut out);
    out.extend_from_slice(&bind_port.to_be_bytes());
    out
}

/// `RSV (2) | FRAG (1) | ATYP | DST.ADDR | DST.PORT | DATA`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpHeader {
    pub frag: u8,
    pub address: Address,
    pub port: u16,
}

impl UdpHeader {
    /// Decodes the header prefix of `buf`, returning the header and the
    /// remaining payload slice. Does not copy the payload.
    pub fn decode(buf: &[u8]) -> Result<(UdpHeader, &[u8]), UdpHeaderError> {
        if buf.len() < 3 {
            return Err(UdpHeaderError::Malformed);
        }
        if buf[0] != 0x00 || buf[1] != 0x00 {
            return Err(UdpHeaderError::Malformed);
        }
        let frag = buf[2];
        let (address, port, consumed) =
            Address::decode(&buf[3..]).map_err(|_| UdpHeaderError::Malformed)?;
        let header_len = 3 + consumed;
        Ok((
            UdpHeader {
                frag,
                address,
                port,
            },
            &buf[header_len..],
        ))
    }

    pub fn encode_with_payload(frag: u8, address: &Address, port: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + address.wire_len() + 2 + payload.len());
        out.push(0x00);
        out.push(0x00);
        out.push(frag);
        address.encode_into(&mut out);
        out.extend_from_slice(&port.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpHeaderError {
    Malformed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socks5::address::Address;
    use std::net::Ipv4Addr;

    #[test]
    fn greeting_round_trip() {
        let mut buf = vec![VERSION, 2, 0x00, 0x02];
        let (greeting, consumed) = Greeting::decode(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert!(greeting.offers_no_auth());
        buf.push(0xAA); // trailing residue must not be consumed
        let (_, consumed2) = Greeting::decode(&buf).unwrap().unwrap();
        assert_eq!(consumed2, 4);
    }

    #[test]
    fn greeting_incomplete_returns_none() {
        assert_eq!(Greeting::decode(&[VERSION]).unwrap(), None);
        assert_eq!(Greeting::decode(&[VERSION, 2, 0x00]).unwrap(), None);
    }

    #[test]
    fn command_connect_round_trip() {
        let mut buf = vec![VERSION, CMD_CONNECT, 0x00, 0x01, 127, 0, 0, 1];
        buf.extend_from_slice(&80u16.to_be_bytes());
        let (command, consumed) = Command::decode(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(command.cmd, CMD_CONNECT);
        assert_eq!(command.address, Address::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(command.port, 80);
    }

    #[test]
    fn reply_encodes_rfc1928_success_shape() {
        let reply = encode_reply(REP_SUCCESS, &Address::V4(Ipv4Addr::UNSPECIFIED), 0);
        assert_eq!(
            reply,
            vec![VERSION, REP_SUCCESS, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn udp_header_round_trip_with_payload() {
        let address = Address::Domain("example.invalid".into());
        let encoded = UdpHeader::encode_with_payload(0, &address, 53, b"hello");
        let (header, payload) = UdpHeader::decode(&encoded).unwrap();
        assert_eq!(header.frag, 0);
        assert_eq!(header.address, address);
        assert_eq!(header.port, 53);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn udp_header_rejects_bad_rsv() {
        let mut encoded = UdpHeader::encode_with_payload(
            0,
            &Address::V4(Ipv4Addr::new(1, 1, 1, 1)),
            53,
            b"x",
        );
        encoded[0] = 0x01;
        assert_eq!(UdpHeader::decode(&encoded).unwrap_err(), UdpHeaderError::Malformed);
    }
}
