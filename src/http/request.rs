//! HTTP/1.1 request head + body reading (spec §3 HTTP mode state, §4.4).
//!
//! Grounded in the teacher's `read_http_headers`/`split_headers_body`/
//! `parse_request_line` trio in `http_proxy.rs`, generalized into a
//! `RequestHead` type plus a `Content-Length`-driven body reader. Chunked
//! transfer-encoding on the client->proxy side is not decoded (spec §4.4);
//! such a request is treated as malformed.

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use super::headers::Headers;
use super::uri::{parse_absolute_uri, split_host_port_default_80, Target};

const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: Headers,
}

impl RequestHead {
    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    pub fn is_chunked(&self) -> bool {
        self.headers
            .get("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    /// Prefers the absolute-URI form, then falls back to the `Host` header
    /// defaulting to port 80 (spec §4.1 `extractTarget`).
    pub fn target(&self) -> Option<Target> {
        if let Some((target, _)) = parse_absolute_uri(&self.uri) {
            return Some(target);
        }
        let host_header = self.headers.get("host")?;
        split_host_port_default_80(host_header)
    }
}

/// Parses one request head out of `raw` (bytes up to but excluding the
/// terminating blank line). Returns `None` on a malformed request line.
pub fn parse_request_head(raw: &[u8]) -> Option<RequestHead> {
    let text = std::str::from_utf8(raw).ok()?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let uri = parts.next()?.to_string();
    let version = parts.next()?.to_string();

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':')?;
        headers.push(name.trim(), value.trim());
    }
    Some(RequestHead {
        method,
        uri,
        version,
        headers,
    })
}

/// Distinguishes "client went away" (no reply owed) from "client sent garbage"
/// (spec §7: malformed request/handshake -> 400 + close, reported once to the
/// observer) so callers don't have to inspect error text to tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum ReadHeadError {
    #[error("client closed before a request head completed")]
    Eof,
    #[error("malformed request line or headers")]
    Malformed,
    #[error("request headers exceeded {MAX_HEADER_BYTES} bytes")]
    TooLarge,
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads from `stream` (prepending anything already buffered in `leftover`)
/// until a full `\r\n\r\n`-terminated head is available. Returns the parsed
/// head and any body bytes already read past the header terminator.
pub async fn read_request_head(
    stream: &mut TcpStream,
    leftover: &mut BytesMut,
) -> Result<(RequestHead, BytesMut), ReadHeadError> {
    loop {
        if let Some(pos) = find_header_end(leftover) {
            let head_bytes = leftover.split_to(pos);
            // drop the trailing CRLFCRLF itself
            let _ = leftover.split_to(4);
            let head = parse_request_head(&head_bytes).ok_or(ReadHeadError::Malformed)?;
            let body_start = leftover.split();
            return Ok((head, body_start));
        }
        if leftover.len() > MAX_HEADER_BYTES {
            return Err(ReadHeadError::TooLarge);
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if leftover.is_empty() {
                return Err(ReadHeadError::Eof);
            }
            return Err(ReadHeadError::Malformed);
        }
        leftover.extend_from_slice(&chunk[..n]);
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Reads exactly `content_length` body bytes, consuming `already_read` first.
pub async fn read_fixed_length_body(
    stream: &mut TcpStream,
    mut already_read: BytesMut,
    content_length: usize,
) -> anyhow::Result<Vec<u8>> {
    while already_read.len() < content_length {
        let mut chunk = [0u8; 8192];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("client closed mid-body");
        }
        already_read.extend_from_slice(&chunk[..n]);
    }
    Ok(already_read[..content_length].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get_request_line_and_headers() {
        let raw = b"GET http://example.invalid/path HTTP/1.1\r\nHost: example.invalid\r\n";
        let head = parse_request_head(raw).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.uri, "http://example.invalid/path");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.headers.get("host"), Some("example.invalid"));
    }

    #[test]
    fn content_length_parses_numeric_header() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n";
        let head = parse_request_head(raw).unwrap();
        assert_eq!(head.content_length(), Some(5));
    }

    #[test]
    fn rejects_request_line_missing_parts() {
        assert!(parse_request_head(b"GET\r\n").is_none());
    }
}
