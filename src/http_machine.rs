//! HTTP proxy state machine (spec §4.4): CONNECT tunnels and forward-mode
//! request/response relaying, gated by the process-wide concurrency limit.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::gate::ConcurrencyGate;
use crate::http::headers::Headers;
use crate::http::request::{
    parse_request_head, read_fixed_length_body, read_request_head, ReadHeadError, RequestHead,
};
use crate::http::response::{
    write_bad_gateway, write_bad_request, write_connect_established, write_service_unavailable,
};
use crate::http::uri::parse_connect_target;
use crate::relay::relay_tcp;
use crate::stats::StatsObserver;

/// Drives one HTTP-mode client connection from admission through however many
/// forward-mode request/response cycles it keeps alive for, or a single
/// CONNECT tunnel.
pub async fn run_http(
    mut stream: TcpStream,
    config: Arc<Config>,
    stats: Arc<dyn StatsObserver>,
    gate: Arc<ConcurrencyGate>,
    leftover: BytesMut,
) -> anyhow::Result<()> {
    let ticket = match gate.try_acquire() {
        Some(t) => t,
        None => {
            stats.rejected();
            let _ = write_service_unavailable(&mut stream).await;
            return Ok(());
        }
    };
    stats.accepted();
    let result = drive_idle_timeout(stream, &config, &stats, leftover).await;
    drop(ticket);
    stats.disconnected();
    result
}

/// Drives request/response cycles on an owned stream. A CONNECT request
/// consumes `stream` into a relay and the function returns; a forward-mode
/// request borrows it for one cycle and loops for keep-alive.
async fn drive_idle_timeout(
    mut stream: TcpStream,
    config: &Arc<Config>,
    stats: &Arc<dyn StatsObserver>,
    mut leftover: BytesMut,
) -> anyhow::Result<()> {
    loop {
        let head_result = tokio::time::timeout(
            config.idle_timeout(),
            read_request_head(&mut stream, &mut leftover),
        )
        .await;
        let (head, body_start) = match head_result {
            Ok(Ok(pair)) => pair,
            Ok(Err(ReadHeadError::Eof)) => return Ok(()), // client closed: normal disconnect
            Ok(Err(e @ (ReadHeadError::Malformed | ReadHeadError::TooLarge))) => {
                stats.failed(&format!("malformed HTTP request: {}", e));
                let _ = write_bad_request(&mut stream).await;
                return Ok(());
            }
            Ok(Err(ReadHeadError::Io(e))) => {
                stats.failed(&format!("HTTP request read error: {}", e));
                return Ok(());
            }
            Err(_) => return Ok(()), // idle timeout: close, no reply required
        };

        if head.is_connect() {
            return handle_connect(stream, config, stats, &head, body_start).await;
        }

        match handle_forward(&mut stream, config, stats, &head, body_start).await {
            Ok(true) => continue,   // keep-alive: loop for another request
            Ok(false) => return Ok(()),
            Err(e) => {
                stats.failed(&format!("forward proxy error: {}", e));
                return Ok(());
            }
        }
    }
}

async fn handle_connect(
    mut stream: TcpStream,
    config: &Arc<Config>,
    stats: &Arc<dyn StatsObserver>,
    head: &RequestHead,
    leftover_after_head: BytesMut,
) -> anyhow::Result<()> {
    let Some(target) = parse_connect_target(&head.uri) else {
        let _ = write_bad_request(&mut stream).await;
        return Ok(());
    };

    let mut upstream = match connect_timeout(config, &target.host, target.port).await {
        Ok(s) => s,
        Err(e) => {
            stats.failed(&format!(
                "CONNECT to {}:{} failed: {}",
                target.host, target.port, e
            ));
            let _ = write_bad_gateway(&mut stream).await;
            return Ok(());
        }
    };

    write_connect_established(&mut stream).await?;

    if !leftover_after_head.is_empty() {
        // The client may have pipelined the tunneled payload (e.g. a TLS
        // ClientHello) in the same segment as the CONNECT request; it must
        // still reach the upstream once the relay takes over (spec §9
        // "Pipeline reconfiguration").
        upstream.write_all(&leftover_after_head).await?;
    }

    // Dismantling "the HTTP response encoder, the HTTP request decoder, the
    // idle timer, the close-on-idle stage, and the HTTP state machine itself"
    // (spec §4.4) has no separate representation here: the function simply
    // stops parsing HTTP and hands the raw socket to the relay, which is the
    // same end state.
    relay_tcp(stream, upstream).await?;
    Ok(())
}

/// Handles one forward-mode request/response cycle. Returns `Ok(true)` if the
/// client connection should stay open for another request (keep-alive),
/// `Ok(false)` if it should close normally.
async fn handle_forward(
    stream: &mut TcpStream,
    config: &Arc<Config>,
    stats: &Arc<dyn StatsObserver>,
    head: &RequestHead,
    body_start: BytesMut,
) -> anyhow::Result<bool> {
    let Some(target) = head.target() else {
        let _ = write_bad_request(stream).await;
        return Ok(false);
    };

    if head.is_chunked() && head.content_length().is_none() {
        let _ = write_bad_request(stream).await;
        return Ok(false);
    }
    let content_length = head.content_length().unwrap_or(0);
    let body = read_fixed_length_body(stream, body_start, content_length).await?;

    let rewritten = build_rewritten_request(head, &target);

    let mut upstream = match connect_timeout(config, &target.host, target.port).await {
        Ok(s) => s,
        Err(e) => {
            stats.failed(&format!(
                "forward connect to {}:{} failed: {}",
                target.host, target.port, e
            ));
            let _ = write_bad_gateway(stream).await;
            return Ok(false);
        }
    };

    upstream.write_all(rewritten.as_bytes()).await?;
    if !body.is_empty() {
        upstream.write_all(&body).await?;
    }

    relay_response(&mut upstream, stream).await?;
    upstream.shutdown().await.ok();

    Ok(true)
}

/// Builds the relative-URI, hop-by-hop-scrubbed, `Host`-guaranteed request
/// head to send upstream (spec §4.4).
fn build_rewritten_request(head: &RequestHead, target: &crate::http::Target) -> String {
    let mut headers = head.headers.clone();
    headers.scrub_hop_by_hop();
    if !headers.contains("host") {
        if target.port == 80 {
            headers.set("Host", target.host.clone());
        } else {
            headers.set("Host", format!("{}:{}", target.host, target.port));
        }
    }

    let path = crate::http::uri::rewrite_uri_to_relative(&head.uri);
    let mut out = format!("{} {} {}\r\n", head.method, path, head.version);
    headers.render_into(&mut out);
    out.push_str("\r\n");
    out
}

/// Reads the upstream's response head + body (by `Content-Length`, or until
/// EOF when absent) and relays it to the client with hop-by-hop headers
/// scrubbed (spec §4.4).
async fn relay_response(upstream: &mut TcpStream, client: &mut TcpStream) -> anyhow::Result<()> {
    let mut raw = BytesMut::new();
    let head_end = loop {
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let mut chunk = [0u8; 4096];
        let n = upstream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("upstream closed before sending a response head");
        }
        raw.extend_from_slice(&chunk[..n]);
    };
    let head_bytes = raw.split_to(head_end);
    let _ = raw.split_to(4);
    let mut already_read_body = raw;

    let text = std::str::from_utf8(&head_bytes)?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or("HTTP/1.1 502 Bad Gateway");
    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push(name.trim(), value.trim());
        }
    }
    headers.scrub_hop_by_hop();

    let mut out = String::new();
    out.push_str(status_line);
    out.push_str("\r\n");
    headers.render_into(&mut out);
    out.push_str("\r\n");
    client.write_all(out.as_bytes()).await?;

    if let Some(len) = headers.get("content-length").and_then(|v| v.trim().parse::<usize>().ok()) {
        while already_read_body.len() < len {
            let mut chunk = [0u8; 8192];
            let n = upstream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            already_read_body.extend_from_slice(&chunk[..n]);
        }
        let body = &already_read_body[..already_read_body.len().min(len)];
        client.write_all(body).await?;
    } else {
        client.write_all(&already_read_body).await?;
        tokio::io::copy(upstream, client).await?;
    }
    client.flush().await?;
    Ok(())
}

async fn connect_timeout(config: &Config, host: &str, port: u16) -> std::io::Result<TcpStream> {
    let host = strip_ipv6_brackets(host);
    let connect = async {
        let mut addrs = tokio::net::lookup_host((host.as_str(), port)).await?;
        let mut last_err = None;
        while let Some(addr) = addrs.next() {
            match TcpStream::connect(addr).await {
                Ok(s) => return Ok(s),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
        }))
    };
    match tokio::time::timeout(config.connect_timeout(), connect).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connect timed out",
        )),
    }
}

fn strip_ipv6_brackets(host: &str) -> String {
    host.trim_start_matches('[').trim_end_matches(']').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewritten_request_strips_proxy_connection_and_keeps_host() {
        let raw = b"GET http://example.invalid/path HTTP/1.1\r\nHost: example.invalid\r\nProxy-Connection: keep-alive\r\n";
        let head = parse_request_head(raw).unwrap();
        let target = head.target().unwrap();
        let rewritten = build_rewritten_request(&head, &target);
        assert!(rewritten.starts_with("GET /path HTTP/1.1\r\n"));
        assert!(!rewritten.to_ascii_lowercase().contains("proxy-connection"));
        assert!(rewritten.contains("Host: example.invalid"));
    }
}
