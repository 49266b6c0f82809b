//! Statistics observer interface (spec §6) and a default in-memory sink.
//!
//! Real deployments hand the host UI's own collaborator in here; the default
//! sink exists for the example binary and for tests that want to assert on
//! counts.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ErrorRecord, ErrorRing};

/// Event notifications the core sends to an external stats collaborator.
/// All methods are fire-and-forget from the caller's perspective; an
/// implementation is expected to serialize these itself (spec §5).
pub trait StatsObserver: Send + Sync {
    fn accepted(&self) {}
    fn disconnected(&self) {}
    fn rejected(&self) {}
    fn failed(&self, _description: &str) {}
    fn socks5_connection_started(&self) {}
    fn udp_session_started(&self) {}
    fn udp_session_ended(&self) {}
    fn udp_packet_relayed(&self) {}
}

/// A no-op observer, for when the host genuinely doesn't care.
#[derive(Debug, Default)]
pub struct NullStats;

impl StatsObserver for NullStats {}

/// Default in-memory observer: plain atomic counters plus the bounded error ring
/// from [`crate::error`].
#[derive(Debug)]
pub struct InMemoryStats {
    accepted: AtomicU64,
    disconnected: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    socks5_connections: AtomicU64,
    udp_sessions_started: AtomicU64,
    udp_sessions_ended: AtomicU64,
    udp_packets_relayed: AtomicU64,
    errors: ErrorRing,
}

impl InMemoryStats {
    pub fn new(max_recent_errors: usize) -> Self {
        Self {
            accepted: AtomicU64::new(0),
            disconnected: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            socks5_connections: AtomicU64::new(0),
            udp_sessions_started: AtomicU64::new(0),
            udp_sessions_ended: AtomicU64::new(0),
            udp_packets_relayed: AtomicU64::new(0),
            errors: ErrorRing::new(max_recent_errors),
        }
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn disconnected_count(&self) -> u64 {
        self.disconnected.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn udp_packets_relayed_count(&self) -> u64 {
        self.udp_packets_relayed.load(Ordering::Relaxed)
    }

    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.errors.snapshot()
    }
}

impl StatsObserver for InMemoryStats {
    fn accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn disconnected(&self) {
        self.disconnected.fetch_add(1, Ordering::Relaxed);
    }

    fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn failed(&self, description: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.errors.push(ErrorRecord::new(description));
        tracing::warn!(description, "proxy error reported to stats observer");
    }

    fn socks5_connection_started(&self) {
        self.socks5_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn udp_session_started(&self) {
        self.udp_sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    fn udp_session_ended(&self) {
        self.udp_sessions_ended.fetch_add(1, Ordering::Relaxed);
    }

    fn udp_packet_relayed(&self) {
        self.udp_packets_relayed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate() {
        let stats = InMemoryStats::new(4);
        stats.accepted();
        stats.accepted();
        stats.disconnected();
        stats.rejected();
        stats.failed("boom");
        assert_eq!(stats.accepted_count(), 2);
        assert_eq!(stats.disconnected_count(), 1);
        assert_eq!(stats.rejected_count(), 1);
        assert_eq!(stats.recent_errors().len(), 1);
    }
}
