use std::sync::Arc;

use dual_relay_proxy::stats::InMemoryStats;
use dual_relay_proxy::{Config, Server};

fn parse_args() -> Config {
    let mut config = Config::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" => {
                if let Some(v) = args.next() {
                    config.port = v.parse().unwrap_or(config.port);
                }
            }
            "--max-connections" => {
                if let Some(v) = args.next() {
                    config.max_concurrent_connections = v.parse().unwrap_or(config.max_concurrent_connections);
                }
            }
            "--connect-timeout-seconds" => {
                if let Some(v) = args.next() {
                    config.connect_timeout_seconds = v.parse().unwrap_or(config.connect_timeout_seconds);
                }
            }
            "--idle-timeout-seconds" => {
                if let Some(v) = args.next() {
                    config.idle_timeout_seconds = v.parse().unwrap_or(config.idle_timeout_seconds);
                }
            }
            "--udp-relay-timeout-seconds" => {
                if let Some(v) = args.next() {
                    config.udp_relay_timeout_seconds = v.parse().unwrap_or(config.udp_relay_timeout_seconds);
                }
            }
            "--max-udp-channels" => {
                if let Some(v) = args.next() {
                    config.max_udp_outbound_channels = v.parse().unwrap_or(config.max_udp_outbound_channels);
                }
            }
            other => {
                eprintln!("ignoring unknown argument: {}", other);
            }
        }
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = parse_args();
    let stats = Arc::new(InMemoryStats::new(config.max_recent_errors));
    let server = Server::bind(config, stats).await?;
    tracing::info!(addr = ?server.local_addr()?, "listening");

    let (_shutdown_tx, shutdown_rx) = dual_relay_proxy::server::shutdown_channel();
    server.run(shutdown_rx).await?;
    Ok(())
}
