// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// Gurren - CLI Client
// One-shot commands wrapping the daemon RPC protocol

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::{Cell, Color, ContentArrangement, Table};

use gurren_common::client::{connect_or_start, daemon_binary, is_running, spawn_daemon, Client};
use gurren_common::protocol::{StatusChangedParams, METHOD_STATUS_CHANGED};
use gurren_common::types::TunnelState;

#[derive(Parser)]
#[command(name = "gurren")]
#[command(about = "SSH tunnel manager", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all managed tunnels
    Ls {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Connect a configured tunnel, or an ad-hoc one given via flags
    Connect {
        /// Tunnel name from the configuration
        name: Option<String>,

        /// SSH host (user@host:port or an alias from ~/.ssh/config)
        #[arg(long)]
        host: Option<String>,

        /// Remote address (host:port)
        #[arg(long)]
        remote: Option<String>,

        /// Local bind address (host:port)
        #[arg(long)]
        local: Option<String>,
    },

    /// Disconnect a running tunnel
    Disconnect {
        /// Tunnel name
        name: String,
    },

    /// Show the status of a tunnel
    Status {
        /// Tunnel name
        name: String,
    },

    /// Stream status change notifications until interrupted
    Watch,

    /// Manage the background daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon
    Start {
        /// Run in the foreground instead of detaching
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the daemon and all running tunnels
    Stop,
    /// Check whether the daemon is running
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ls { json } => run_ls(json).await,
        Commands::Connect {
            name,
            host,
            remote,
            local,
        } => run_connect(name, host, remote, local).await,
        Commands::Disconnect { name } => run_disconnect(&name).await,
        Commands::Status { name } => run_status(&name).await,
        Commands::Watch => run_watch().await,
        Commands::Daemon { command } => match command {
            DaemonCommands::Start { foreground } => run_daemon_start(foreground).await,
            DaemonCommands::Stop => run_daemon_stop().await,
            DaemonCommands::Status => run_daemon_status().await,
        },
    }
}

/// Connect to a running daemon, failing with a hint when there is none
async fn require_daemon() -> Result<Client> {
    Client::connect()
        .await
        .map_err(|_| anyhow::anyhow!("daemon not running. Start it with 'gurren daemon start'"))
}

async fn run_ls(json: bool) -> Result<()> {
    let client = require_daemon().await?;
    let result = client.tunnel_list().await?;
    client.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result.tunnels)?);
        return Ok(());
    }

    if result.tunnels.is_empty() {
        println!("No tunnels configured");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["NAME", "STATUS", "LOCAL", "REMOTE"]);

    for tunnel in &result.tunnels {
        let status = if tunnel.status == TunnelState::Error && !tunnel.error.is_empty() {
            format!("error: {}", tunnel.error)
        } else {
            tunnel.status.to_string()
        };

        table.add_row(vec![
            Cell::new(&tunnel.name),
            Cell::new(status).fg(status_color(tunnel.status)),
            Cell::new(&tunnel.config.local),
            Cell::new(&tunnel.config.remote),
        ]);
    }

    println!("{table}");
    Ok(())
}

async fn run_connect(
    name: Option<String>,
    host: Option<String>,
    remote: Option<String>,
    local: Option<String>,
) -> Result<()> {
    let client = connect_or_start()
        .await
        .context("unable to reach the daemon")?;

    let name = match name {
        Some(name) => name,
        None => {
            // Ad-hoc tunnel from flags: register it first
            let (Some(host), Some(remote), Some(local)) = (host, remote, local) else {
                client.close().await;
                bail!("when not using a named tunnel, --host, --remote, and --local are required");
            };
            let registered = client.tunnel_register(&host, &remote, &local).await?;
            println!("Registered tunnel {:?}", registered.name);
            registered.name
        }
    };

    let status = client.tunnel_start(&name).await;
    client.close().await;
    let status = status?;

    match status.status {
        TunnelState::Error => {
            bail!("tunnel {:?} failed: {}", name, status.error)
        }
        state => {
            println!("Tunnel {:?} {}", name, state);
            Ok(())
        }
    }
}

async fn run_disconnect(name: &str) -> Result<()> {
    let client = require_daemon().await?;
    let result = client.tunnel_stop(name).await;
    client.close().await;
    result?;

    println!("Tunnel {:?} disconnected", name);
    Ok(())
}

async fn run_status(name: &str) -> Result<()> {
    let client = require_daemon().await?;
    let status = client.tunnel_status(name).await;
    client.close().await;
    let status = status?;

    if status.status == TunnelState::Error {
        println!("{}: {} ({})", status.name, paint(status.status), status.error);
    } else {
        println!("{}: {}", status.name, paint(status.status));
    }
    Ok(())
}

async fn run_watch() -> Result<()> {
    let client = require_daemon().await?;
    client.subscribe().await?;

    println!("Watching tunnel status changes (ctrl-c to stop)");

    loop {
        tokio::select! {
            notif = client.next_notification() => {
                let Some(notif) = notif else {
                    client.close().await;
                    bail!("daemon connection lost");
                };
                if notif.method != METHOD_STATUS_CHANGED {
                    continue;
                }
                let Ok(change) = serde_json::from_value::<StatusChangedParams>(notif.params) else {
                    continue;
                };
                if change.error.is_empty() {
                    println!("{:<20} {}", change.name, paint(change.status));
                } else {
                    println!("{:<20} {} ({})", change.name, paint(change.status), change.error);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                client.close().await;
                return Ok(());
            }
        }
    }
}

async fn run_daemon_start(foreground: bool) -> Result<()> {
    if is_running().await {
        println!("Daemon is already running");
        return Ok(());
    }

    if foreground {
        // Run the daemon binary in this terminal and wait for it
        let status = std::process::Command::new(daemon_binary())
            .status()
            .context("failed to run gurren-daemon")?;
        if !status.success() {
            bail!("daemon exited with {}", status);
        }
        return Ok(());
    }

    spawn_daemon()?;

    // Poll until the daemon answers
    for _ in 0..20 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if is_running().await {
            println!("Daemon started");
            return Ok(());
        }
    }

    bail!("daemon did not start in time")
}

async fn run_daemon_stop() -> Result<()> {
    let client = match Client::connect().await {
        Ok(client) => client,
        Err(_) => {
            println!("Daemon is not running");
            return Ok(());
        }
    };

    let result = client.shutdown().await;
    client.close().await;
    result?;

    println!("Daemon stopped");
    Ok(())
}

async fn run_daemon_status() -> Result<()> {
    let client = Client::connect()
        .await
        .map_err(|_| anyhow::anyhow!("daemon is not running"))?;
    let pong = client.ping().await;
    client.close().await;
    let pong = pong?;

    println!("Daemon is running (version {})", pong.version);
    Ok(())
}

fn status_color(state: TunnelState) -> Color {
    match state {
        TunnelState::Connected => Color::Green,
        TunnelState::Connecting => Color::Yellow,
        TunnelState::Error => Color::Red,
        TunnelState::Disconnected => Color::Grey,
    }
}

fn paint(state: TunnelState) -> colored::ColoredString {
    let text = state.to_string();
    match state {
        TunnelState::Connected => text.green(),
        TunnelState::Connecting => text.yellow(),
        TunnelState::Error => text.red(),
        TunnelState::Disconnected => text.dimmed(),
    }
}
