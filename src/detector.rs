//! First-byte protocol detection (spec §4.7).
//!
//! SOCKS5 greetings start with a version byte of `0x05`; every HTTP method
//! name starts with an ASCII letter. Peeking (rather than consuming) the
//! first byte means there is no "replay buffered bytes back into the stream"
//! step to get right — the byte is still sitting in the kernel's receive
//! buffer for whichever handler reads it for real.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::net::TcpStream;

use crate::config::Config;
use crate::gate::ConcurrencyGate;
use crate::http_machine::run_http;
use crate::socks5::run_socks5;
use crate::stats::StatsObserver;

const SOCKS5_VERSION_BYTE: u8 = 0x05;

/// Peeks the first byte of `stream` and dispatches to the matching protocol
/// handler. Never consumes the peeked byte itself; the chosen handler reads
/// it as part of its own framing.
pub async fn dispatch(
    stream: TcpStream,
    config: Arc<Config>,
    stats: Arc<dyn StatsObserver>,
    gate: Arc<ConcurrencyGate>,
) -> anyhow::Result<()> {
    let mut probe = [0u8; 1];
    let n = stream.peek(&mut probe).await?;
    if n == 0 {
        return Ok(()); // client closed before sending anything
    }

    let leftover = BytesMut::new();
    if probe[0] == SOCKS5_VERSION_BYTE {
        run_socks5(stream, config, stats, leftover).await
    } else {
        run_http(stream, config, stats, gate, leftover).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::InMemoryStats;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn detects_socks5_by_first_byte() {
        let (mut client, server) = pair().await;
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0x05, 0x01, 0x00])
            .await
            .unwrap();

        let config = Arc::new(Config::default());
        let stats: Arc<dyn StatsObserver> = Arc::new(InMemoryStats::new(config.max_recent_errors));
        let gate = Arc::new(ConcurrencyGate::new(config.max_concurrent_connections));

        let handle = tokio::spawn(dispatch(server, config, Arc::clone(&stats), gate));
        let mut reply = [0u8; 2];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut reply)
            .await
            .unwrap();
        assert_eq!(reply, [0x05, 0x00]); // VERSION, METHOD_NO_AUTH: only SOCKS5 replies this way
        drop(client);
        let _ = handle.await;
    }
}
