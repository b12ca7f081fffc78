//! failover-daemon: runs one failover coordinator on the local network.
//!
//! Joins the multicast group, logs every election event and stops cleanly on
//! Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use failover_core::Coordinator;
use failover_daemon::{Args, LogListener};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,failover_core=debug,failover_daemon=debug"
    } else {
        "info,failover_core=info,failover_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting failover-daemon");
    info!("Group: {}:{}", args.group, args.port);

    let coordinator =
        Coordinator::new(args.to_config()).context("Failed to create coordinator")?;
    info!(
        "Peer ID: {}, host {} ({})",
        coordinator.peer_id(),
        coordinator.host().hostname,
        coordinator.host().address
    );

    coordinator.add_event_listener(Arc::new(LogListener::new(
        coordinator.name(),
        args.json_events,
    )));
    coordinator
        .start()
        .await
        .context("Failed to start coordinator")?;

    info!("Daemon running as {}. Press Ctrl+C to stop.", coordinator.role());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    coordinator.stop().await;
    info!("Shutting down");
    Ok(())
}
