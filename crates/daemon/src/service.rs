// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// RPC service over the daemon's Unix socket
//
// Owns the listening socket, accepts client sessions, dispatches
// requests and fans status change events out to subscribers. Each
// session serializes its writes through one lock so a response and a
// notification never interleave on the wire.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gurren_common::client::is_running_at;
use gurren_common::config::Config;
use gurren_common::error::{Error, Result};
use gurren_common::protocol::{Notification, Request, METHOD_STATUS_CHANGED};
use gurren_common::socket::socket_path;

use crate::handlers;
use crate::permissions::set_socket_permissions;
use crate::tunnel::TunnelManager;

/// Shared daemon state, reachable from every session task
#[derive(Debug)]
pub struct DaemonState {
    pub config: Config,
    pub manager: TunnelManager,
    pub subscribers: RwLock<HashMap<u64, Arc<Session>>>,
    shutdown: CancellationToken,
    next_session_id: AtomicU64,
}

impl DaemonState {
    pub fn new(config: Config) -> Arc<Self> {
        let manager = TunnelManager::new(&config);
        Arc::new(Self {
            config,
            manager,
            subscribers: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Cancel the service context and stop every tunnel. The accept
    /// loop observes the cancellation and exits.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.manager.stop_all().await;
    }

    /// Completes when a shutdown has been requested
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await;
    }
}

/// An accepted client session. Holds the write half of the socket;
/// the read half lives in the session's own task.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    writer: Mutex<OwnedWriteHalf>,
}

impl Session {
    pub fn new(id: u64, writer: OwnedWriteHalf) -> Arc<Self> {
        Arc::new(Self {
            id,
            writer: Mutex::new(writer),
        })
    }

    /// Write one newline-delimited JSON message under the session lock
    pub async fn send<T: Serialize>(&self, msg: &T) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(msg)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await
    }
}

/// The listening daemon
#[derive(Debug)]
pub struct Daemon {
    state: Arc<DaemonState>,
    listener: UnixListener,
    socket_path: PathBuf,
}

impl Daemon {
    /// Bind the daemon socket at the default location
    pub async fn bind(config: Config) -> Result<Daemon> {
        let path = socket_path()?;
        Self::bind_to(config, &path).await
    }

    /// Bind the daemon socket at a specific path
    pub async fn bind_to(config: Config, path: &Path) -> Result<Daemon> {
        if path.exists() {
            // Refuse to start when a live daemon answers a ping;
            // otherwise the socket is stale and replaced.
            if is_running_at(path.to_path_buf()).await {
                return Err(Error::Daemon("daemon is already running".to_string()));
            }
            std::fs::remove_file(path)?;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| Error::Daemon(format!("unable to listen on socket: {}", e)))?;
        set_socket_permissions(path)?;

        Ok(Daemon {
            state: DaemonState::new(config),
            listener,
            socket_path: path.to_path_buf(),
        })
    }

    /// Shared state handle, for shutdown coordination
    pub fn state(&self) -> Arc<DaemonState> {
        self.state.clone()
    }

    /// Accept client sessions until the service is shut down
    pub async fn run(self) -> Result<()> {
        info!("daemon listening on {}", self.socket_path.display());

        tokio::spawn(broadcast_loop(self.state.clone()));

        loop {
            tokio::select! {
                _ = self.state.shutdown.cancelled() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        tokio::spawn(handle_session(self.state.clone(), stream));
                    }
                    Err(e) => {
                        // A dead listener is fatal for the whole service
                        error!("error accepting connection: {}", e);
                        self.state.shutdown().await;
                        break;
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        info!("daemon stopped");
        Ok(())
    }
}

/// Read requests off one session until EOF or a framing error
async fn handle_session(state: Arc<DaemonState>, stream: UnixStream) {
    let id = state.next_session_id.fetch_add(1, Ordering::Relaxed);
    let (read_half, write_half) = stream.into_split();
    let session = Session::new(id, write_half);

    let mut lines = BufReader::new(read_half).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                // Malformed framing is fatal for this session only
                let req: Request = match serde_json::from_str(&line) {
                    Ok(req) => req,
                    Err(e) => {
                        warn!("error decoding request: {}", e);
                        break;
                    }
                };

                let resp = handlers::dispatch(&state, &session, req).await;
                if let Err(e) = session.send(&resp).await {
                    warn!("error sending response: {}", e);
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("session {} read error: {}", id, e);
                break;
            }
        }
    }

    state.subscribers.write().await.remove(&id);
    debug!("session {} closed", id);
}

/// Drain manager status events into notifications for every
/// subscriber. Failed writes are logged and the subscriber kept; its
/// read loop reaps it when the connection actually dies.
async fn broadcast_loop(state: Arc<DaemonState>) {
    let mut rx = state.manager.subscribe();

    loop {
        match rx.recv().await {
            Ok(change) => {
                let notification = Notification::new(METHOD_STATUS_CHANGED, &change);
                let subscribers = state.subscribers.read().await;
                for session in subscribers.values() {
                    if let Err(e) = session.send(&notification).await {
                        warn!("error sending notification to session {}: {}", session.id, e);
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("status event stream lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
