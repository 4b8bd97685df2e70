//! driftwatch server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - DRIFTWATCH_HOST: Bind address (default: 0.0.0.0)
//! - DRIFTWATCH_PORT: Port number (default: 8080)
//! - DRIFTWATCH_GATEWAY_URL: Base URL of the external diff service (default: in-memory gateway)
//! - DRIFTWATCH_HISTORY_LIMIT: Results kept per rule (default: 1000)
//! - DRIFTWATCH_RECONCILE_MS: How often the scheduler re-reads the rule set (default: 1000)
//! - DRIFTWATCH_LOG_ALERTS: Send alerts to the service log as well (default: true)
//! - DRIFTWATCH_START_SCHEDULER: Start the scheduler on boot (default: true)
//! - RUST_LOG: Log level (default: info)

use driftwatch::api::{run_server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "driftwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let defaults = ServerConfig::default();

    // Parse configuration from environment
    let host = std::env::var("DRIFTWATCH_HOST").unwrap_or(defaults.host);
    let port: u16 = std::env::var("DRIFTWATCH_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(defaults.port);
    let gateway_url = std::env::var("DRIFTWATCH_GATEWAY_URL")
        .ok()
        .filter(|url| !url.trim().is_empty());
    let history_limit = std::env::var("DRIFTWATCH_HISTORY_LIMIT")
        .ok()
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(defaults.history_limit);
    let reconcile_interval_ms = std::env::var("DRIFTWATCH_RECONCILE_MS")
        .ok()
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(defaults.reconcile_interval_ms);

    let config = ServerConfig {
        host,
        port,
        gateway_url,
        history_limit,
        reconcile_interval_ms,
        log_alerts: env_flag("DRIFTWATCH_LOG_ALERTS", defaults.log_alerts),
        start_scheduler: env_flag("DRIFTWATCH_START_SCHEDULER", defaults.start_scheduler),
    };

    tracing::info!("driftwatch configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    match &config.gateway_url {
        Some(url) => tracing::info!("  Diff service: {}", url),
        None => tracing::info!("  Diff service: in-memory"),
    }
    tracing::info!("  History limit: {} results per rule", config.history_limit);
    tracing::info!("  Scheduler reconcile interval: {} ms", config.reconcile_interval_ms);
    tracing::info!("  Log alerts: {}", config.log_alerts);
    tracing::info!("  Start scheduler: {}", config.start_scheduler);

    run_server(config).await
}
