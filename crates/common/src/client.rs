// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// Daemon RPC client
//
// Multiplexes outbound requests over one socket connection. A single
// read task discriminates the incoming stream: responses are routed
// by id to the caller waiting on them, notifications land on a
// bounded queue. The queue never exerts backpressure on the daemon;
// when it is full the notification is dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    classify_message, Incoming, Notification, PingResult, Request, Response, TunnelListResult,
    TunnelRegisterParams, TunnelRegisterResult, TunnelStartParams, TunnelStatusParams,
    TunnelStatusResult, TunnelStopParams, METHOD_DAEMON_PING, METHOD_DAEMON_SHUTDOWN,
    METHOD_SUBSCRIBE, METHOD_TUNNEL_LIST, METHOD_TUNNEL_REGISTER, METHOD_TUNNEL_START,
    METHOD_TUNNEL_STATUS, METHOD_TUNNEL_STOP,
};
use crate::socket::socket_path;

/// Capacity of the notification queue; pushes beyond this are dropped
const NOTIFICATION_QUEUE: usize = 100;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>>;

/// Client for communicating with the gurren daemon
pub struct Client {
    writer: Mutex<OwnedWriteHalf>,
    next_id: AtomicU64,
    pending: PendingMap,
    notifications: Mutex<mpsc::Receiver<Notification>>,
    closed: Arc<AtomicBool>,
}

impl Client {
    /// Connect to the daemon on the default socket
    pub async fn connect() -> Result<Self> {
        Self::connect_to(&socket_path()?).await
    }

    /// Connect to the daemon on a specific socket path
    pub async fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| Error::Daemon(format!("unable to connect to daemon: {}", e)))?;

        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (notif_tx, notif_rx) = mpsc::channel(NOTIFICATION_QUEUE);
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(read_loop(
            read_half,
            pending.clone(),
            notif_tx,
            closed.clone(),
        ));

        Ok(Self {
            writer: Mutex::new(write_half),
            next_id: AtomicU64::new(0),
            pending,
            notifications: Mutex::new(notif_rx),
            closed,
        })
    }

    /// Close the connection. The read task observes the shutdown and
    /// terminates, which in turn closes the notification queue.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    /// Receive the next push notification. Returns `None` once the
    /// connection is gone.
    pub async fn next_notification(&self) -> Option<Notification> {
        self.notifications.lock().await.recv().await
    }

    /// Send one request and wait for the matching response
    async fn call<P: Serialize>(&self, method: &str, params: Option<P>) -> Result<Response> {
        let id = (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();

        let params = match params {
            Some(p) => Some(serde_json::to_value(p)?),
            None => None,
        };
        let req = Request {
            id: id.clone(),
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let mut line = serde_json::to_vec(&req)?;
        line.push(b'\n');

        let write_result = {
            let mut writer = self.writer.lock().await;
            writer.write_all(&line).await
        };
        if let Err(e) = write_result {
            self.pending.lock().await.remove(&id);
            return Err(Error::Daemon(format!("failed to send request: {}", e)));
        }

        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Subscribe to status change notifications
    pub async fn subscribe(&self) -> Result<()> {
        let resp = self.call::<Value>(METHOD_SUBSCRIBE, None).await?;
        expect_result::<Value>(resp)?;
        Ok(())
    }

    /// Check that the daemon is alive and get its version
    pub async fn ping(&self) -> Result<PingResult> {
        let resp = self.call::<Value>(METHOD_DAEMON_PING, None).await?;
        expect_result(resp)
    }

    /// Start a tunnel by name
    pub async fn tunnel_start(&self, name: &str) -> Result<TunnelStatusResult> {
        let params = TunnelStartParams {
            name: name.to_string(),
        };
        let resp = self.call(METHOD_TUNNEL_START, Some(params)).await?;
        expect_result(resp)
    }

    /// Stop a running tunnel by name
    pub async fn tunnel_stop(&self, name: &str) -> Result<()> {
        let params = TunnelStopParams {
            name: name.to_string(),
        };
        let resp = self.call(METHOD_TUNNEL_STOP, Some(params)).await?;
        expect_result::<Value>(resp)?;
        Ok(())
    }

    /// Get the status of a tunnel
    pub async fn tunnel_status(&self, name: &str) -> Result<TunnelStatusResult> {
        let params = TunnelStatusParams {
            name: name.to_string(),
        };
        let resp = self.call(METHOD_TUNNEL_STATUS, Some(params)).await?;
        expect_result(resp)
    }

    /// List all managed tunnels
    pub async fn tunnel_list(&self) -> Result<TunnelListResult> {
        let resp = self.call::<Value>(METHOD_TUNNEL_LIST, None).await?;
        expect_result(resp)
    }

    /// Register an ad-hoc tunnel; returns the generated name
    pub async fn tunnel_register(
        &self,
        host: &str,
        remote: &str,
        local: &str,
    ) -> Result<TunnelRegisterResult> {
        let params = TunnelRegisterParams {
            host: host.to_string(),
            remote: remote.to_string(),
            local: local.to_string(),
        };
        let resp = self.call(METHOD_TUNNEL_REGISTER, Some(params)).await?;
        expect_result(resp)
    }

    /// Tell the daemon to shut down
    pub async fn shutdown(&self) -> Result<()> {
        let resp = self.call::<Value>(METHOD_DAEMON_SHUTDOWN, None).await?;
        expect_result::<Value>(resp)?;
        Ok(())
    }
}

/// Decode a response payload, surfacing RPC errors as `Error::Rpc`
fn expect_result<T: DeserializeOwned>(resp: Response) -> Result<T> {
    if let Some(err) = resp.error {
        return Err(Error::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    let value = resp.result.unwrap_or(Value::Null);
    Ok(serde_json::from_value(value)?)
}

/// Read task: demultiplex responses and notifications off the socket
async fn read_loop(
    read_half: OwnedReadHalf,
    pending: PendingMap,
    notif_tx: mpsc::Sender<Notification>,
    closed: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match classify_message(&line) {
                Incoming::Response(resp) => {
                    if let Some(tx) = pending.lock().await.remove(&resp.id) {
                        let _ = tx.send(resp);
                    }
                }
                Incoming::Notification(notif) => {
                    // Full queue: drop rather than block the daemon
                    if notif_tx.try_send(notif).is_err() {
                        debug!("notification queue full, dropping");
                    }
                }
                Incoming::Malformed => {
                    warn!("malformed message from daemon, dropping");
                }
            },
            Ok(None) => break,
            Err(e) => {
                if !closed.load(Ordering::SeqCst) {
                    debug!("daemon connection read error: {}", e);
                }
                break;
            }
        }
    }

    // Dropping the senders wakes every in-flight call with
    // `ConnectionClosed`.
    pending.lock().await.clear();
}

/// Check whether a daemon is running and answering pings
pub async fn is_running() -> bool {
    is_running_at(match socket_path() {
        Ok(p) => p,
        Err(_) => return false,
    })
    .await
}

/// Like [`is_running`], against a specific socket path
pub async fn is_running_at(path: PathBuf) -> bool {
    match Client::connect_to(&path).await {
        Ok(client) => {
            let alive = client.ping().await.is_ok();
            client.close().await;
            alive
        }
        Err(_) => false,
    }
}

/// Connect to the daemon, starting one in the background if needed
pub async fn connect_or_start() -> Result<Client> {
    if let Ok(client) = Client::connect().await {
        return Ok(client);
    }

    spawn_daemon()?;

    // Poll until the daemon answers or we give up
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(client) = Client::connect().await {
            return Ok(client);
        }
    }

    Err(Error::Daemon("daemon did not start in time".to_string()))
}

/// Spawn `gurren-daemon` as a detached background process
pub fn spawn_daemon() -> Result<()> {
    let daemon = daemon_binary();

    let mut cmd = std::process::Command::new(daemon);
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    cmd.spawn()
        .map_err(|e| Error::Daemon(format!("failed to start daemon: {}", e)))?;
    Ok(())
}

/// Locate the daemon binary: next to the current executable first,
/// then fall back to `$PATH`.
pub fn daemon_binary() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("gurren-daemon");
            if candidate.exists() {
                return candidate;
            }
        }
    }
    PathBuf::from("gurren-daemon")
}
