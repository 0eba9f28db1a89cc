//! Relay supervisor.
//!
//! Accepts worker control links, assigns worker ids and disconnects
//! workers that stop talking. Room assignment is handled elsewhere.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use danmaku_relay::liveness::LivenessPolicy;
use danmaku_relay::{Registry, SupervisorConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let config = SupervisorConfig::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        };
        EnvFilter::new(format!("danmaku_relay={level},relay_supervisor={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    if let Err(e) = config.validate() {
        tracing::error!("{e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: SupervisorConfig) -> anyhow::Result<()> {
    tracing::info!(
        "relay-supervisor v{} starting on {}",
        env!("CARGO_PKG_VERSION"),
        config.listen
    );
    tracing::debug!(
        url = %config.room_list_update_url,
        interval = ?config.room_list_update_interval(),
        receive_timeout = ?config.worker_receive_timeout(),
        penalty = ?config.worker_penalty(),
        "room list settings"
    );

    let policy = LivenessPolicy::new(config.worker_interval_threshold());
    let registry = Registry::bind(config.listen, config.registry_config(), policy).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    registry.shutdown().await;

    Ok(())
}
