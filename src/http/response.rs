//! Fixed HTTP responses the proxy emits itself (spec §4.3, §4.4, §8).

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// `HTTP/1.1 200\r\nContent-Length: 0\r\n\r\n` — the explicit zero length is
/// mandatory (spec §4.4): it suppresses chunked framing that would otherwise
/// inject a `0\r\n\r\n` sentinel into the tunnel and corrupt it.
pub async fn write_connect_established(stream: &mut TcpStream) -> std::io::Result<()> {
    stream
        .write_all(b"HTTP/1.1 200\r\nContent-Length: 0\r\n\r\n")
        .await
}

pub async fn write_bad_request(stream: &mut TcpStream) -> std::io::Result<()> {
    write_simple(stream, 400, "Bad Request", "bad request").await
}

pub async fn write_bad_gateway(stream: &mut TcpStream) -> std::io::Result<()> {
    write_simple(stream, 502, "Bad Gateway", "upstream connect failed").await
}

/// §4.3 / §8 property 2: `Content-Type: text/plain; charset=utf-8`,
/// `Connection: close`, and a fixed body.
pub async fn write_service_unavailable(stream: &mut TcpStream) -> std::io::Result<()> {
    let body = "too many concurrent connections";
    let response = format!(
        "HTTP/1.1 503 Service Unavailable\r\nContent-Type: text/plain; charset=utf-8\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await
}

async fn write_simple(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await
}
