// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// Tunnel manager: the authoritative holder of tunnel state
//
// All mutations go through the write lock; status change events are
// emitted on a broadcast channel after the lock is released, so a
// slow subscriber can never block a state transition. Per-tunnel
// transitions are serialized by the lock and therefore observed in
// order; events for different tunnels may interleave.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use gurren_common::config::{Config, TunnelConfig};
use gurren_common::error::{Error, Result};
use gurren_common::types::{StatusChange, TunnelState};

use crate::auth::AuthCapability;
use crate::forward::{self, ForwardSpec};

/// How long `start` waits before treating a still-connecting tunnel
/// as connected. The SSH handshake normally completes within this
/// window and an early failure has already landed in the error state.
const READINESS_WAIT: Duration = Duration::from_millis(100);

/// Grace period between stopping an ephemeral tunnel and removing it
const EPHEMERAL_GRACE: Duration = Duration::from_millis(200);

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// A tunnel under management
#[derive(Debug)]
struct ManagedTunnel {
    config: TunnelConfig,
    status: TunnelState,
    error: String,
    ephemeral: bool,
    /// Present iff the forwarder is live (connecting or connected)
    cancel: Option<CancellationToken>,
    started_at: Option<DateTime<Utc>>,
}

/// Read-only view of a managed tunnel
#[derive(Debug, Clone)]
pub struct TunnelSnapshot {
    pub config: TunnelConfig,
    pub status: TunnelState,
    pub error: String,
    pub ephemeral: bool,
}

/// Manages all tunnels and tracks their state
#[derive(Clone, Debug)]
pub struct TunnelManager {
    tunnels: Arc<RwLock<HashMap<String, ManagedTunnel>>>,
    event_tx: broadcast::Sender<StatusChange>,
}

impl TunnelManager {
    /// Create a manager seeded with every configured tunnel, all
    /// starting out disconnected.
    pub fn new(config: &Config) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let mut tunnels = HashMap::new();
        for tc in &config.tunnels {
            tunnels.insert(
                tc.name.clone(),
                ManagedTunnel {
                    config: tc.clone(),
                    status: TunnelState::Disconnected,
                    error: String::new(),
                    ephemeral: false,
                    cancel: None,
                    started_at: None,
                },
            );
        }

        Self {
            tunnels: Arc::new(RwLock::new(tunnels)),
            event_tx,
        }
    }

    /// Subscribe to status change events
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.event_tx.subscribe()
    }

    fn emit(&self, name: &str, status: TunnelState, error: &str) {
        let _ = self.event_tx.send(StatusChange {
            name: name.to_string(),
            status,
            error: error.to_string(),
        });
    }

    /// Start a tunnel by name.
    ///
    /// Transitions the tunnel to connecting, spawns the forwarder
    /// under a fresh cancellation token, then waits briefly and
    /// promotes a still-connecting tunnel to connected.
    pub async fn start(
        &self,
        name: &str,
        caps: Vec<AuthCapability>,
        ssh_addr: &str,
        ssh_user: &str,
    ) -> Result<()> {
        let (config, token) = {
            let mut tunnels = self.tunnels.write().await;
            let mt = tunnels
                .get_mut(name)
                .ok_or_else(|| Error::TunnelNotFound(name.to_string()))?;

            if mt.status.is_active() {
                return Err(Error::TunnelActive {
                    name: name.to_string(),
                    status: mt.status.to_string(),
                });
            }

            mt.status = TunnelState::Connecting;
            mt.error.clear();
            mt.started_at = Some(Utc::now());

            let token = CancellationToken::new();
            mt.cancel = Some(token.clone());

            (mt.config.clone(), token)
        };

        self.emit(name, TunnelState::Connecting, "");

        info!("starting tunnel {:?} via {}", name, ssh_addr);

        let spec = ForwardSpec {
            addr: ssh_addr.to_string(),
            user: ssh_user.to_string(),
            remote: config.remote,
            local: config.local,
        };

        let tunnels = self.tunnels.clone();
        let event_tx = self.event_tx.clone();
        let task_name = name.to_string();

        tokio::spawn(async move {
            let result = forward::run(token, spec, caps).await;

            let change = {
                let mut tunnels = tunnels.write().await;
                let Some(mt) = tunnels.get_mut(&task_name) else {
                    return;
                };

                match result {
                    Ok(()) => {
                        mt.status = TunnelState::Disconnected;
                        mt.error.clear();
                    }
                    Err(e) => {
                        mt.status = TunnelState::Error;
                        mt.error = e.to_string();
                    }
                }
                mt.cancel = None;

                if let Some(started) = mt.started_at {
                    debug!(
                        "tunnel {:?} ran for {}s",
                        task_name,
                        (Utc::now() - started).num_seconds()
                    );
                }

                StatusChange {
                    name: task_name.clone(),
                    status: mt.status,
                    error: mt.error.clone(),
                }
            };

            let _ = event_tx.send(change);
        });

        // Give the forwarder a moment to connect or fail
        tokio::time::sleep(READINESS_WAIT).await;

        let promoted = {
            let mut tunnels = self.tunnels.write().await;
            match tunnels.get_mut(name) {
                Some(mt) if mt.status == TunnelState::Connecting => {
                    mt.status = TunnelState::Connected;
                    true
                }
                _ => false,
            }
        };

        if promoted {
            self.emit(name, TunnelState::Connected, "");
        }

        Ok(())
    }

    /// Stop a running tunnel by name. An ephemeral tunnel is removed
    /// shortly after it settles into an inactive state.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let ephemeral = {
            let mut tunnels = self.tunnels.write().await;
            let mt = tunnels
                .get_mut(name)
                .ok_or_else(|| Error::TunnelNotFound(name.to_string()))?;

            if !mt.status.is_active() {
                return Err(Error::TunnelInactive(name.to_string()));
            }

            // Firing the token is non-blocking, safe under the lock
            if let Some(cancel) = &mt.cancel {
                cancel.cancel();
            }

            mt.ephemeral
        };

        if ephemeral {
            let tunnels = self.tunnels.clone();
            let name = name.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(EPHEMERAL_GRACE).await;
                let mut tunnels = tunnels.write().await;
                let inactive = tunnels
                    .get(&name)
                    .map(|mt| !mt.status.is_active())
                    .unwrap_or(false);
                if inactive {
                    debug!("removing ephemeral tunnel {:?}", name);
                    tunnels.remove(&name);
                }
            });
        }

        Ok(())
    }

    /// Current state and last error of a tunnel
    pub async fn status(&self, name: &str) -> Result<(TunnelState, String)> {
        let tunnels = self.tunnels.read().await;
        let mt = tunnels
            .get(name)
            .ok_or_else(|| Error::TunnelNotFound(name.to_string()))?;
        Ok((mt.status, mt.error.clone()))
    }

    /// Snapshot of every managed tunnel
    pub async fn list(&self) -> Vec<TunnelSnapshot> {
        let tunnels = self.tunnels.read().await;
        tunnels
            .values()
            .map(|mt| TunnelSnapshot {
                config: mt.config.clone(),
                status: mt.status,
                error: mt.error.clone(),
                ephemeral: mt.ephemeral,
            })
            .collect()
    }

    /// Fire every live cancel handle
    pub async fn stop_all(&self) {
        let tunnels = self.tunnels.write().await;
        for mt in tunnels.values() {
            if let Some(cancel) = &mt.cancel {
                cancel.cancel();
            }
        }
    }

    /// Definition of a tunnel by name
    pub async fn get_config(&self, name: &str) -> Option<TunnelConfig> {
        let tunnels = self.tunnels.read().await;
        tunnels.get(name).map(|mt| mt.config.clone())
    }

    /// Add an ad-hoc tunnel with a generated name; returns the name.
    pub async fn register(&self, mut config: TunnelConfig) -> Result<String> {
        let mut tunnels = self.tunnels.write().await;

        let mut generator = names::Generator::default();
        let mut name = None;
        for _ in 0..10 {
            if let Some(candidate) = generator.next() {
                if !tunnels.contains_key(&candidate) {
                    name = Some(candidate);
                    break;
                }
            }
        }
        let name = name
            .unwrap_or_else(|| format!("tunnel-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));

        if tunnels.contains_key(&name) {
            return Err(Error::Daemon("failed to generate unique name".to_string()));
        }

        config.name = name.clone();
        tunnels.insert(
            name.clone(),
            ManagedTunnel {
                config,
                status: TunnelState::Disconnected,
                error: String::new(),
                ephemeral: true,
                cancel: None,
                started_at: None,
            },
        );

        Ok(name)
    }

    /// Remove an ephemeral tunnel. Configured or active tunnels are
    /// refused.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let mut tunnels = self.tunnels.write().await;
        let mt = tunnels
            .get(name)
            .ok_or_else(|| Error::TunnelNotFound(name.to_string()))?;

        if !mt.ephemeral {
            return Err(Error::TunnelNotEphemeral(name.to_string()));
        }
        if mt.status.is_active() {
            return Err(Error::TunnelActive {
                name: name.to_string(),
                status: mt.status.to_string(),
            });
        }

        tunnels.remove(name);
        Ok(())
    }
}
