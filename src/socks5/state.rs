//! SOCKS5 state machine driver (spec §4.5).
//!
//! `accumulated` is filled by successive `read()`s on the client socket; each
//! step tries to decode the current state's message against the buffer and,
//! on success, drains exactly the consumed bytes, leaving any residue for the
//! next state (spec §3 invariant).

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::relay::relay_tcp;
use crate::socks5::address::Address;
use crate::socks5::codec::{
    self, Command, Greeting, CMD_BIND, CMD_CONNECT, CMD_UDP_ASSOCIATE, METHOD_NO_ACCEPTABLE,
    METHOD_NO_AUTH, REP_COMMAND_NOT_SUPPORTED, REP_HOST_UNREACHABLE, REP_SUCCESS,
};
use crate::stats::StatsObserver;
use crate::udp::UdpRelaySession;

/// Reads from `stream` until `decode` returns a complete message or the
/// connection closes. Mirrors the teacher's byte-accumulation loops in
/// `handle_socks5`, generalized to work against the pure codec functions.
async fn read_message<T>(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    decode: impl Fn(&[u8]) -> Result<Option<(T, usize)>, ()>,
) -> anyhow::Result<T> {
    loop {
        match decode(buf) {
            Ok(Some((value, consumed))) => {
                let _ = buf.split_to(consumed);
                return Ok(value);
            }
            Ok(None) => {}
            Err(()) => anyhow::bail!("malformed SOCKS5 message"),
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("client closed before a complete SOCKS5 message");
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Drives one SOCKS5 connection end-to-end: greeting, command, then either a
/// TCP relay, a UDP associate session, or a rejection.
pub async fn run_socks5(
    mut stream: TcpStream,
    config: Arc<Config>,
    stats: Arc<dyn StatsObserver>,
    leftover: BytesMut,
) -> anyhow::Result<()> {
    let mut buf = leftover;

    let greeting = read_message(&mut stream, &mut buf, Greeting::decode).await?;
    if !greeting.offers_no_auth() {
        stream
            .write_all(&Greeting::encode_reply(METHOD_NO_ACCEPTABLE))
            .await?;
        return Ok(());
    }
    stream
        .write_all(&Greeting::encode_reply(METHOD_NO_AUTH))
        .await?;

    let command = read_message(&mut stream, &mut buf, Command::decode).await?;

    match command.cmd {
        CMD_CONNECT => handle_connect(stream, command, stats, buf, config).await,
        CMD_UDP_ASSOCIATE => handle_udp_associate(stream, stats, config).await,
        CMD_BIND => {
            let reply = codec::encode_reply(
                REP_COMMAND_NOT_SUPPORTED,
                &Address::V4(std::net::Ipv4Addr::UNSPECIFIED),
                0,
            );
            let _ = stream.write_all(&reply).await;
            Ok(())
        }
        _ => unreachable!("Command::decode only yields CONNECT/BIND/UDP_ASSOCIATE"),
    }
}

async fn handle_connect(
    stream: TcpStream,
    command: Command,
    stats: Arc<dyn StatsObserver>,
    leftover_after_command: BytesMut,
    config: Arc<Config>,
) -> anyhow::Result<()> {
    // §4.5 "Command": on CONNECT, both notifications fire together, before the
    // upstream connect is even attempted — paired with the single
    // `disconnected()` below regardless of how this function exits.
    stats.accepted();
    stats.socks5_connection_started();
    let result = handle_connect_inner(stream, command, &stats, leftover_after_command, config).await;
    stats.disconnected();
    result
}

async fn handle_connect_inner(
    mut stream: TcpStream,
    command: Command,
    stats: &Arc<dyn StatsObserver>,
    leftover_after_command: BytesMut,
    config: Arc<Config>,
) -> anyhow::Result<()> {
    let host = command.address.host_string();
    let port = command.port;

    let connect = tokio::net::lookup_host((host.as_str(), port));
    let upstream = match tokio::time::timeout(config.connect_timeout(), connect).await {
        Ok(Ok(mut addrs)) => {
            let mut connected = None;
            let mut last_err = None;
            while let Some(addr) = addrs.next() {
                match TcpStream::connect(addr).await {
                    Ok(s) => {
                        connected = Some(s);
                        break;
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            match connected {
                Some(s) => Ok(s),
                None => Err(last_err.unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
                })),
            }
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connect timed out",
        )),
    };

    let upstream = match upstream {
        Ok(s) => s,
        Err(e) => {
            stats.failed(&format!("SOCKS5 CONNECT to {}:{} failed: {}", host, port, e));
            let reply = codec::encode_reply(
                REP_HOST_UNREACHABLE,
                &Address::V4(std::net::Ipv4Addr::UNSPECIFIED),
                0,
            );
            let _ = stream.write_all(&reply).await;
            return Ok(());
        }
    };

    let reply = codec::encode_reply(REP_SUCCESS, &Address::V4(std::net::Ipv4Addr::UNSPECIFIED), 0);
    stream.write_all(&reply).await?;

    let mut upstream = upstream;
    if !leftover_after_command.is_empty() {
        // Re-feed any bytes the client already pipelined past the command
        // message straight to the upstream, since that's where they were
        // headed (spec §4.5).
        tokio::io::AsyncWriteExt::write_all(&mut upstream, &leftover_after_command).await?;
    }

    relay_tcp(stream, upstream).await?;
    Ok(())
}

async fn handle_udp_associate(
    mut stream: TcpStream,
    stats: Arc<dyn StatsObserver>,
    config: Arc<Config>,
) -> anyhow::Result<()> {
    let socket = match tokio::net::UdpSocket::bind(("0.0.0.0", 0)).await {
        Ok(s) => s,
        Err(e) => {
            stats.failed(&format!("UDP ASSOCIATE bind failed: {}", e));
            let reply = codec::encode_reply(
                0x01, // general SOCKS server failure, per §7's "UDP bind failure -> REP=0x01"
                &Address::V4(std::net::Ipv4Addr::UNSPECIFIED),
                0,
            );
            let _ = stream.write_all(&reply).await;
            return Ok(());
        }
    };
    let bound_port = socket.local_addr()?.port();

    let reply = codec::encode_reply(
        REP_SUCCESS,
        &Address::V4(std::net::Ipv4Addr::UNSPECIFIED),
        bound_port,
    );
    stream.write_all(&reply).await?;

    stats.udp_session_started();
    let session = UdpRelaySession::new(socket, Arc::clone(&stats), Arc::clone(&config));
    let run_session = Arc::clone(&session);
    let session_task = tokio::spawn(async move { run_session.run().await });

    // The session lives alongside the TCP control connection: once it reads
    // EOF/error (client hung up), tear the UDP session down. Aborting
    // `session_task` only cancels the inbound loop future; it does not run
    // `run`'s own cleanup, so the outbound reply tasks and sockets are torn
    // down explicitly here too (idempotent if `run` already did it itself).
    let mut one = [0u8; 1];
    let _ = stream.read(&mut one).await;
    session_task.abort();
    session.shutdown().await;
    stats.udp_session_ended();

    Ok(())
}
