// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// Gurren - Daemon
// Background service managing SSH tunnels

mod auth;
mod forward;
mod handlers;
mod permissions;
mod service;
mod sshconfig;
mod tunnel;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gurren_common::config::Config;

use service::Daemon;

#[tokio::main]
async fn main() -> Result<()> {
    // Restrictive umask before any file is created
    permissions::set_restrictive_umask();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gurren_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("gurren daemon starting, version {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().context("failed to load configuration")?;
    info!("{} tunnel(s) configured", config.tunnels.len());

    let daemon = Daemon::bind(config).await?;
    let state = daemon.state();

    let run = tokio::spawn(daemon.run());

    tokio::select! {
        _ = wait_for_signal() => {
            info!("signal received, shutting down");
            state.shutdown().await;
        }
        // RPC-initiated shutdown
        _ = state.cancelled() => {}
    }

    // Let terminal status transitions reach subscribers before exiting
    tokio::time::sleep(Duration::from_millis(300)).await;

    run.await.context("daemon task panicked")??;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return std::future::pending().await,
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
