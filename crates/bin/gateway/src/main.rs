//! Process entry point: parses a single config-path argument, builds the
//! gateway, connects, then runs until `SIGINT`/`SIGTERM`.

mod config;
mod data_relay;
mod facade;
mod installer;
mod logging;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// thin gateway process bridging a local device broker to the platform.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the gateway's JSON configuration document.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();

    let config = config::load_gateway_config(&args.config)
        .with_context(|| format!("loading configuration from '{}'", args.config.display()))?;

    let gateway = facade::Gateway::build(config).await.context("building gateway")?;
    gateway.connect().await.context("connecting gateway")?;
    info!("gateway running; awaiting shutdown signal");

    wait_for_shutdown_signal().await;

    info!("shutdown signal received; disconnecting");
    gateway.disconnect().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::signal;
    use tokio::signal::unix::SignalKind;

    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
