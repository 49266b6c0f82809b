//! UDP relay session (spec §4.6, §3).
//!
//! One session owns a single client-facing datagram socket (bound on
//! UDP ASSOCIATE) and a bounded map of per-target outbound sockets, the way
//! `examples/other_examples/86e02232_simophin-cpxy__...udp_relay.rs` and
//! `examples/other_examples/8c817c6f_EAimTY-socks5-server__...associate.rs`
//! both key their per-target channel by the resolved destination and remember
//! the client's return address to re-wrap replies.
//!
//! Open question 2 (spec §9) is resolved here as written: inbound datagrams
//! are not validated against the address that issued UDP ASSOCIATE. The
//! client's reply address is simply learned from the first inbound datagram.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::socks5::address::Address;
use crate::socks5::codec::{UdpHeader, UdpHeaderError};
use crate::stats::StatsObserver;

const MAX_DATAGRAM: usize = 64 * 1024;

/// One outbound socket bound to relay datagrams toward a single
/// `(target_host, target_port)`, remembering the target's original string
/// form so replies can be re-wrapped with the right ATYP (spec §4.6).
struct OutboundChannel {
    socket: Arc<UdpSocket>,
    target_host: String,
    target_port: u16,
}

pub struct UdpRelaySession {
    client_socket: Arc<UdpSocket>,
    /// Learned from the first inbound datagram's source address; §9 notes the
    /// ASSOCIATE command's advertised address is frequently 0.0.0.0:0 and
    /// should not be relied on.
    client_endpoint: Mutex<Option<SocketAddr>>,
    outbound: Mutex<HashMap<String, Arc<OutboundChannel>>>,
    /// One entry per task spawned by `spawn_outbound_reply_loop`, aborted by
    /// `shutdown` so a session never outlives its outbound sockets (spec
    /// §4.6 "Lifecycle").
    reply_handles: Mutex<Vec<JoinHandle<()>>>,
    max_outbound_channels: usize,
    idle_timeout: std::time::Duration,
    last_activity_unix: AtomicU64,
    stats: Arc<dyn StatsObserver>,
}

impl UdpRelaySession {
    pub fn new(socket: UdpSocket, stats: Arc<dyn StatsObserver>, config: Arc<Config>) -> Arc<Self> {
        Arc::new(Self {
            client_socket: Arc::new(socket),
            client_endpoint: Mutex::new(None),
            outbound: Mutex::new(HashMap::new()),
            reply_handles: Mutex::new(Vec::new()),
            max_outbound_channels: config.max_udp_outbound_channels,
            idle_timeout: config.udp_relay_timeout(),
            last_activity_unix: AtomicU64::new(now_unix()),
            stats,
        })
    }

    /// Runs the inbound-from-client loop until the idle timeout elapses or
    /// the client socket errors, then tears down every outbound reply task
    /// and channel it spawned. Also safe to call `shutdown` again from the
    /// caller after aborting this future externally; both paths converge on
    /// the same idempotent cleanup.
    pub async fn run(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let recv = tokio::time::timeout(self.idle_timeout, self.client_socket.recv_from(&mut buf));
            let (n, from) = match recv.await {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "UDP relay session client socket error");
                    break;
                }
                Err(_) => {
                    tracing::debug!("UDP relay session idle timeout, tearing down");
                    break;
                }
            };
            self.last_activity_unix.store(now_unix(), Ordering::Relaxed);
            {
                let mut endpoint = self.client_endpoint.lock().await;
                if endpoint.is_none() {
                    *endpoint = Some(from);
                }
            }
            if let Err(e) = self.handle_inbound_datagram(&buf[..n]).await {
                tracing::debug!(error = %e, "dropped malformed/oversized SOCKS5 UDP datagram");
            }
        }
        self.shutdown().await;
    }

    /// Aborts every outbound reply-loop task and drops every outbound
    /// channel, closing their sockets. Idempotent: safe to call once from
    /// `run`'s own exit and again from a caller that externally aborted the
    /// `run` future (which skips `run`'s own cleanup entirely).
    pub async fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.reply_handles.lock().await);
        for handle in handles {
            handle.abort();
        }
        self.outbound.lock().await.clear();
    }

    async fn handle_inbound_datagram(self: &Arc<Self>, datagram: &[u8]) -> anyhow::Result<()> {
        let (header, payload) = match UdpHeader::decode(datagram) {
            Ok(pair) => pair,
            Err(UdpHeaderError::Malformed) => anyhow::bail!("malformed SOCKS5 UDP header"),
        };
        if header.frag != 0 {
            anyhow::bail!("fragmented datagram (FRAG != 0) dropped, no reassembly");
        }

        let target_host = header.address.host_string();
        let target_port = header.port;
        let key = format!("{}:{}", target_host, target_port);

        let channel = self.outbound_channel_for(&key, &target_host, target_port).await?;

        let target_addr = resolve_target(&target_host, target_port).await?;
        channel.socket.send_to(payload, target_addr).await?;
        self.stats.udp_packet_relayed();
        Ok(())
    }

    async fn outbound_channel_for(
        self: &Arc<Self>,
        key: &str,
        target_host: &str,
        target_port: u16,
    ) -> anyhow::Result<Arc<OutboundChannel>> {
        {
            let map = self.outbound.lock().await;
            if let Some(existing) = map.get(key) {
                return Ok(Arc::clone(existing));
            }
        }

        let mut map = self.outbound.lock().await;
        // Re-check after acquiring the write-side lock, in case of a race
        // between the read above and here.
        if let Some(existing) = map.get(key) {
            return Ok(Arc::clone(existing));
        }
        if map.len() >= self.max_outbound_channels {
            // Hard ceiling, no eviction (spec §9 open question 1, decided in
            // DESIGN.md): new targets beyond the cap are rejected outright.
            anyhow::bail!(
                "UDP outbound channel cap ({}) reached, dropping target {}",
                self.max_outbound_channels,
                key
            );
        }

        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        let channel = Arc::new(OutboundChannel {
            socket: Arc::new(socket),
            target_host: target_host.to_string(),
            target_port,
        });
        map.insert(key.to_string(), Arc::clone(&channel));
        drop(map);

        self.spawn_outbound_reply_loop(Arc::clone(&channel)).await;
        Ok(channel)
    }

    /// One task per outbound channel, forwarding target replies back to the
    /// remembered client endpoint, re-wrapped with a header whose ATYP
    /// follows the target's original string form (spec §4.6).
    async fn spawn_outbound_reply_loop(self: &Arc<Self>, channel: Arc<OutboundChannel>) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let n = match channel.socket.recv(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!(error = %e, "outbound UDP channel closed");
                        return;
                    }
                };
                let client_endpoint = *session.client_endpoint.lock().await;
                let Some(client_endpoint) = client_endpoint else {
                    continue;
                };
                let reply_address =
                    Address::for_original_target_form(&channel.target_host, channel.target_port);
                let wrapped =
                    UdpHeader::encode_with_payload(0, &reply_address, channel.target_port, &buf[..n]);
                if let Err(e) = session.client_socket.send_to(&wrapped, client_endpoint).await {
                    tracing::debug!(error = %e, "failed to relay UDP reply to client");
                }
            }
        });
        self.reply_handles.lock().await.push(handle);
    }
}

async fn resolve_target(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let mut addrs = tokio::net::lookup_host((host, port)).await?;
    addrs
        .next()
        .ok_or_else(|| anyhow::anyhow!("DNS resolution for {} returned no addresses", host))
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::InMemoryStats;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn relays_datagram_to_target_and_back() {
        let target = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();

        let client_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let session_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let session_addr = session_socket.local_addr().unwrap();

        let stats: Arc<dyn StatsObserver> = Arc::new(InMemoryStats::new(8));
        let config = Arc::new(Config {
            udp_relay_timeout_seconds: 2,
            ..Config::default()
        });
        let session = UdpRelaySession::new(session_socket, Arc::clone(&stats), config);
        let session_clone = Arc::clone(&session);
        let run_task = tokio::spawn(async move { session_clone.run().await });

        let header = UdpHeader::encode_with_payload(
            0,
            &Address::V4(match target_addr.ip() {
                std::net::IpAddr::V4(v4) => v4,
                _ => unreachable!(),
            }),
            target_addr.port(),
            b"ping",
        );
        client_socket.send_to(&header, session_addr).await.unwrap();

        let mut target_buf = [0u8; 128];
        let (n, from) = target.recv_from(&mut target_buf).await.unwrap();
        assert_eq!(&target_buf[..n], b"ping");

        target.send_to(b"pong", from).await.unwrap();

        let mut client_buf = [0u8; 128];
        let (n, _) = client_socket.recv_from(&mut client_buf).await.unwrap();
        let (reply_header, payload) = UdpHeader::decode(&client_buf[..n]).unwrap();
        assert_eq!(payload, b"pong");
        assert_eq!(
            reply_header.address,
            Address::V4(Ipv4Addr::new(127, 0, 0, 1))
        );

        run_task.abort();
    }

    #[tokio::test]
    async fn shutdown_aborts_reply_tasks_and_clears_outbound_channels() {
        let target = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();

        let client_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let session_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let session_addr = session_socket.local_addr().unwrap();

        let stats: Arc<dyn StatsObserver> = Arc::new(InMemoryStats::new(8));
        let config = Arc::new(Config {
            udp_relay_timeout_seconds: 2,
            ..Config::default()
        });
        let session = UdpRelaySession::new(session_socket, Arc::clone(&stats), config);
        let session_clone = Arc::clone(&session);
        let run_task = tokio::spawn(async move { session_clone.run().await });

        let header = UdpHeader::encode_with_payload(
            0,
            &Address::V4(match target_addr.ip() {
                std::net::IpAddr::V4(v4) => v4,
                _ => unreachable!(),
            }),
            target_addr.port(),
            b"ping",
        );
        client_socket.send_to(&header, session_addr).await.unwrap();

        let mut target_buf = [0u8; 128];
        target.recv_from(&mut target_buf).await.unwrap();

        assert_eq!(session.outbound.lock().await.len(), 1);
        assert_eq!(session.reply_handles.lock().await.len(), 1);

        run_task.abort();
        session.shutdown().await;

        assert!(session.outbound.lock().await.is_empty());
        assert!(session.reply_handles.lock().await.is_empty());

        // Idempotent: a second call must not panic on the now-empty state.
        session.shutdown().await;
    }
}
