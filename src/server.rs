//! Listener and accept loop (spec §6, §10 graceful shutdown).
//!
//! Grounded in the teacher's `run_http_proxy`/`run_socks5_proxy` accept loops
//! in `proxy.rs`, generalized to a single listener that dispatches per
//! connection by protocol instead of binding one socket per protocol.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::Config;
use crate::detector::dispatch;
use crate::gate::ConcurrencyGate;
use crate::stats::StatsObserver;

/// A bound, not-yet-running proxy core instance.
pub struct Server {
    listener: TcpListener,
    config: Arc<Config>,
    stats: Arc<dyn StatsObserver>,
    gate: Arc<ConcurrencyGate>,
}

impl Server {
    /// Binds `0.0.0.0:{config.port}`. Does not start accepting connections.
    pub async fn bind(config: Config, stats: Arc<dyn StatsObserver>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        let config = Arc::new(config);
        let gate = Arc::new(ConcurrencyGate::new(config.max_concurrent_connections));
        Ok(Self {
            listener,
            config,
            stats,
            gate,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` fires, spawning one task per
    /// connection. Each spawned task runs to completion independently of
    /// `run`'s own return — this only stops taking *new* connections.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, _peer) = accepted?;
                    let config = Arc::clone(&self.config);
                    let stats = Arc::clone(&self.stats);
                    let gate = Arc::clone(&self.gate);
                    tokio::spawn(async move {
                        if let Err(e) = dispatch(stream, config, Arc::clone(&stats), gate).await {
                            stats.failed(&format!("connection ended with error: {}", e));
                        }
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("shutdown signal received, no longer accepting connections");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Builds a shutdown channel pair: hold the sender, hand receivers to any
/// number of `Server::run` calls, and send `true` once to stop them all.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::InMemoryStats;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn accepts_and_relays_a_plain_http_forward_request() {
        let target_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = target_listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = conn.read(&mut buf).await.unwrap();
            assert!(buf[..n].starts_with(b"GET / HTTP/1.1\r\n"));
            let body = b"hi";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                String::from_utf8_lossy(body)
            );
            conn.write_all(response.as_bytes()).await.unwrap();
        });

        let mut config = Config::default();
        config.port = 0;
        let stats: Arc<dyn StatsObserver> = Arc::new(InMemoryStats::new(config.max_recent_errors));
        let server = Server::bind(config, Arc::clone(&stats)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = shutdown_channel();
        let run_handle = tokio::spawn(server.run(rx));

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET http://{} HTTP/1.1\r\nHost: {}\r\n\r\n",
            target_addr, target_addr
        );
        client.write_all(request.as_bytes()).await.unwrap();

        let mut response = vec![0u8; 4096];
        let n = client.read(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response[..n]);
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("hi"));

        let _ = tx.send(true);
        let _ = run_handle.await;
    }
}
