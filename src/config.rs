//! Runtime configuration surface for the proxy core.
//!
//! Loading configuration from disk, environment, or a remote source is a host
//! application concern (see spec §1); this module only defines the fields and
//! their defaults.

/// Tunables for one running proxy core instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// TCP port the listener binds on `0.0.0.0`.
    pub port: u16,
    /// Concurrency gate threshold; the (n+1)th HTTP-mode connection gets a 503.
    pub max_concurrent_connections: usize,
    /// Deadline for opening an upstream TCP/HTTP connection.
    pub connect_timeout_seconds: u64,
    /// HTTP client socket read/write idle deadline.
    pub idle_timeout_seconds: u64,
    /// Size of the bounded ring of recent error records.
    pub max_recent_errors: usize,
    /// UDP relay session idle deadline.
    pub udp_relay_timeout_seconds: u64,
    /// Per-session cap on distinct outbound UDP target sockets.
    pub max_udp_outbound_channels: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            max_concurrent_connections: 512,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 120,
            max_recent_errors: 64,
            udp_relay_timeout_seconds: 60,
            max_udp_outbound_channels: 256,
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn udp_relay_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.udp_relay_timeout_seconds)
    }
}
