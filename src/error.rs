//! Error taxonomy (spec §4.9, §7).
//!
//! Library code returns [`ProxyError`]; binary-level glue keeps using
//! `anyhow::Result` the way the teacher's `main.rs`/`proxy.rs` did.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// One row of the §7 error table.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("unsupported method/command: {0}")]
    UnsupportedCommand(String),

    #[error("concurrency limit reached")]
    ConcurrencyOverflow,

    #[error("upstream connect failed: {0}")]
    UpstreamConnect(#[source] std::io::Error),

    #[error("upstream I/O error: {0}")]
    UpstreamIo(#[source] std::io::Error),

    #[error("idle timeout")]
    IdleTimeout,

    #[error("UDP bind failed: {0}")]
    UdpBindFailed(#[source] std::io::Error),

    #[error("malformed SOCKS5 UDP header")]
    UdpHeaderMalformed,

    #[error("fragmented SOCKS5 UDP datagram dropped (FRAG != 0)")]
    UdpFragmented,
}

/// Seconds-resolution timestamp plus a human-readable description, the shape the
/// external statistics collaborator's `failed(description)` call ultimately carries
/// (spec §3, §6).
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub message: String,
    pub unix_timestamp: u64,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        let unix_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            message: message.into(),
            unix_timestamp,
        }
    }
}

impl From<&ProxyError> for ErrorRecord {
    fn from(err: &ProxyError) -> Self {
        ErrorRecord::new(err.to_string())
    }
}

/// Bounded FIFO ring of the last `capacity` error records, for a host UI to poll
/// without re-deriving history from the observer stream.
pub struct ErrorRing {
    capacity: usize,
    records: Mutex<VecDeque<ErrorRecord>>,
}

impl ErrorRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, record: ErrorRecord) {
        let mut records = self.records.lock().expect("error ring mutex poisoned");
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.records
            .lock()
            .expect("error ring mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_first() {
        let ring = ErrorRing::new(2);
        ring.push(ErrorRecord::new("a"));
        ring.push(ErrorRecord::new("b"));
        ring.push(ErrorRecord::new("c"));
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].message, "b");
        assert_eq!(snap[1].message, "c");
    }
}
