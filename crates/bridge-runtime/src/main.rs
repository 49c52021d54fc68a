//! # Gateway Bridge Runtime
//!
//! Runs the gateway bridge on a TCP listener.
//!
//! ## Startup Sequence
//!
//! 1. Install the tracing subscriber (`RUST_LOG`, default `info`)
//! 2. Load configuration (`GS_CONFIG` file, then `GS_*` overrides)
//! 3. Build the static key validator from the `gateways` table
//! 4. Bind the listener and start accepting
//! 5. Drain every connected gateway's uplink and status queues into the log
//! 6. On Ctrl+C: stop accepting, close sessions, wait for them to finish

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gateway_bridge::{
    Connection, ConnectionEvent, ConnectionFeed, GatewayBridgeService, StaticKeyValidator,
    TransportKind,
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::RuntimeConfig;

/// How long sessions get to wind down after Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    let config = RuntimeConfig::load()?;
    let addr = config.listen_addr()?;
    let validator = StaticKeyValidator::from_keys(config.gateway_keys()?);
    if validator.is_empty() {
        warn!("No gateway keys configured, every CONNECT will be refused");
    }
    info!(gateways = validator.len(), "Loaded gateway keys");

    let service = Arc::new(
        GatewayBridgeService::new(config.bridge, Arc::new(validator))
            .context("Failed to create gateway bridge")?,
    );
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tokio::spawn(drain_connections(service.connections()));
    let accept = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.start(listener, TransportKind::Mqtt).await }
    });

    info!("Gateway bridge is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    // Graceful shutdown
    service.shutdown();
    accept
        .await
        .context("Accept loop panicked")?
        .context("Accept loop failed")?;
    if !service.wait_for_sessions(SHUTDOWN_GRACE).await {
        warn!(
            remaining = service.active_sessions(),
            "Sessions still running after shutdown grace period"
        );
    }
    info!("Gateway bridge stopped");
    Ok(())
}

/// Spawn a drain task for every gateway that connects.
async fn drain_connections(mut feed: ConnectionFeed) {
    while let Some(event) = feed.recv().await {
        match event {
            ConnectionEvent::Connected(connection) => {
                tokio::spawn(drain_connection(connection));
            }
            ConnectionEvent::Disconnected {
                gateway,
                connection_id,
            } => {
                debug!(gateway = %gateway, connection_id = %connection_id, "Gateway disconnected");
            }
        }
    }
}

/// Log uplinks and status reports until the connection closes.
async fn drain_connection(connection: Arc<Connection>) {
    let gateway = connection.gateway().clone();
    let (mut uplinks_open, mut status_open) = (true, true);

    while uplinks_open || status_open {
        tokio::select! {
            uplink = connection.recv_uplink(), if uplinks_open => match uplink {
                Some(uplink) => info!(
                    gateway = %gateway,
                    size = uplink.raw_payload.len(),
                    antennas = uplink.rx_metadata.len(),
                    "Uplink received"
                ),
                None => uplinks_open = false,
            },
            status = connection.recv_status(), if status_open => match status {
                Some(status) => info!(
                    gateway = %gateway,
                    time = status.time,
                    metrics = status.metrics.len(),
                    "Status received"
                ),
                None => status_open = false,
            },
        }
    }
}
