// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// SSH forwarder: one bastion connection, one local listener
//
// Owns the SSH client for a single tunnel and proxies every accepted
// local TCP connection to the remote endpoint over a direct-tcpip
// channel. Blocks until the cancellation token fires (normal stop,
// returns Ok) or a fatal error occurs (returned as the failure
// cause). Per-connection dial failures are logged and never fail the
// tunnel.

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::{load_secret_key, PrivateKeyWithHashAlg};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gurren_common::error::{Error, Result};

use crate::auth::AuthCapability;

/// Everything the forwarder needs to run one tunnel
#[derive(Debug, Clone)]
pub struct ForwardSpec {
    /// Bastion address (host:port)
    pub addr: String,
    /// SSH username
    pub user: String,
    /// Remote endpoint reached through the bastion (host:port)
    pub remote: String,
    /// Local bind address (host:port)
    pub local: String,
}

/// SSH client handler for russh.
struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // TODO: verify the server key against a known_hosts file
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Establish the SSH tunnel and serve local connections until the
/// token fires. `Ok(())` means the tunnel was cancelled normally.
pub async fn run(
    token: CancellationToken,
    spec: ForwardSpec,
    caps: Vec<AuthCapability>,
) -> Result<()> {
    let (remote_host, remote_port) = split_host_port(&spec.remote)?;

    // Handshake and authentication, abandoned if the tunnel is
    // stopped while still connecting.
    let session = tokio::select! {
        result = establish(&spec, caps) => result?,
        _ = token.cancelled() => return Ok(()),
    };
    let session = Arc::new(session);

    info!("connected to {}", spec.addr);

    let listener = TcpListener::bind(&spec.local)
        .await
        .map_err(|e| Error::Tunnel(format!("unable to listen on {}: {}", spec.local, e)))?;

    info!(
        "tunnel active: {} -> {} (via {})",
        spec.local, spec.remote, spec.addr
    );

    let mut handlers: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    handlers.spawn(handle_connection(
                        session.clone(),
                        stream,
                        peer,
                        remote_host.clone(),
                        remote_port,
                        token.clone(),
                    ));
                }
                Err(e) => {
                    warn!("failed to accept connection: {}", e);
                }
            },

            // Reap finished handlers so the set does not grow unbounded
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
        }
    }

    drop(listener);

    // Cancellation tears down each handler's endpoints; wait for them
    // to drain before reporting the tunnel closed.
    while handlers.join_next().await.is_some() {}

    let _ = session
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await;

    Ok(())
}

/// Connect to the bastion and authenticate with the capability list
async fn establish(spec: &ForwardSpec, caps: Vec<AuthCapability>) -> Result<Handle<ClientHandler>> {
    let config = Arc::new(client::Config {
        keepalive_interval: Some(Duration::from_secs(15)),
        keepalive_max: 3,
        ..Default::default()
    });

    let mut session = client::connect(config, spec.addr.as_str(), ClientHandler)
        .await
        .map_err(|e| {
            Error::SshConnection(format!(
                "unable to connect to SSH server {}: {}",
                spec.addr, e
            ))
        })?;

    authenticate(&mut session, &spec.user, caps)
        .await
        .map_err(|e| {
            Error::SshConnection(format!(
                "unable to connect to SSH server {}: {}",
                spec.addr, e
            ))
        })?;

    Ok(session)
}

/// Try each capability in order; the first one the server accepts wins.
async fn authenticate(
    session: &mut Handle<ClientHandler>,
    user: &str,
    caps: Vec<AuthCapability>,
) -> Result<()> {
    for cap in &caps {
        let attempt = match cap {
            AuthCapability::Agent => try_agent(session, user).await,
            AuthCapability::Key(path) => try_key(session, user, path).await,
            AuthCapability::Password(password) => try_password(session, user, password).await,
        };

        match attempt {
            Ok(true) => {
                debug!("authenticated via {}", cap.name());
                return Ok(());
            }
            Ok(false) => debug!("{} authentication rejected", cap.name()),
            Err(e) => debug!("{} authentication failed: {}", cap.name(), e),
        }
    }

    Err(Error::Auth("all authentication methods failed".to_string()))
}

async fn try_agent(session: &mut Handle<ClientHandler>, user: &str) -> Result<bool> {
    let mut agent = AgentClient::connect_env()
        .await
        .map_err(|e| Error::Auth(format!("unable to reach SSH agent: {}", e)))?;

    let identities = agent
        .request_identities()
        .await
        .map_err(|e| Error::Auth(format!("unable to list agent identities: {}", e)))?;

    for identity in identities {
        // AgentClient is consumed per attempt; reconnect for each key
        let mut agent = AgentClient::connect_env()
            .await
            .map_err(|e| Error::Auth(format!("unable to reach SSH agent: {}", e)))?;

        match session
            .authenticate_publickey_with(user, identity, None, &mut agent)
            .await
        {
            Ok(result) if result.success() => return Ok(true),
            _ => continue,
        }
    }

    Ok(false)
}

async fn try_key(
    session: &mut Handle<ClientHandler>,
    user: &str,
    path: &std::path::Path,
) -> Result<bool> {
    // Encrypted keys cannot be unlocked here (no terminal); the agent
    // is the supported path for those.
    let key = load_secret_key(path, None)
        .map_err(|e| Error::Auth(format!("unable to load key {}: {}", path.display(), e)))?;

    let hash = session
        .best_supported_rsa_hash()
        .await
        .map_err(|e| Error::Auth(e.to_string()))?
        .flatten();

    let result = session
        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash))
        .await
        .map_err(|e| Error::Auth(e.to_string()))?;

    Ok(result.success())
}

async fn try_password(
    session: &mut Handle<ClientHandler>,
    user: &str,
    password: &str,
) -> Result<bool> {
    let result = session
        .authenticate_password(user, password)
        .await
        .map_err(|e| Error::Auth(e.to_string()))?;

    Ok(result.success())
}

/// Proxy one accepted local connection to the remote endpoint
async fn handle_connection(
    session: Arc<Handle<ClientHandler>>,
    mut local: TcpStream,
    peer: std::net::SocketAddr,
    remote_host: String,
    remote_port: u16,
    token: CancellationToken,
) {
    let channel = match session
        .channel_open_direct_tcpip(
            &remote_host,
            remote_port as u32,
            &peer.ip().to_string(),
            peer.port() as u32,
        )
        .await
    {
        Ok(channel) => channel,
        Err(e) => {
            debug!(
                "failed to dial remote {}:{}: {}",
                remote_host, remote_port, e
            );
            return;
        }
    };

    let (mut remote_read, mut remote_write) = tokio::io::split(channel.into_stream());
    let (mut local_read, mut local_write) = local.split();

    // The handler exits when the first copy finishes or the tunnel is
    // cancelled; both endpoints close on drop, which unblocks the
    // other direction.
    tokio::select! {
        _ = tokio::io::copy(&mut local_read, &mut remote_write) => {}
        _ = tokio::io::copy(&mut remote_read, &mut local_write) => {}
        _ = token.cancelled() => {}
    }

    debug!("forward connection from {} closed", peer);
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("invalid address {:?}: missing port", addr)))?;
    let port: u16 = port
        .parse()
        .map_err(|_| Error::Config(format!("invalid address {:?}: bad port", addr)))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("10.0.30.5:5432").unwrap(),
            ("10.0.30.5".to_string(), 5432)
        );
        assert_eq!(
            split_host_port("db.internal:80").unwrap(),
            ("db.internal".to_string(), 80)
        );
        assert!(split_host_port("no-port").is_err());
        assert!(split_host_port("host:notaport").is_err());
    }

    #[tokio::test]
    async fn test_run_fails_against_unreachable_bastion() {
        let spec = ForwardSpec {
            // Nothing listens on port 1
            addr: "127.0.0.1:1".to_string(),
            user: "nobody".to_string(),
            remote: "10.0.0.1:80".to_string(),
            local: "127.0.0.1:0".to_string(),
        };

        let err = run(
            CancellationToken::new(),
            spec,
            vec![AuthCapability::Password("x".to_string())],
        )
        .await
        .unwrap_err();

        assert!(
            err.to_string().contains("unable to connect to SSH server"),
            "unexpected error: {}",
            err
        );
    }

    #[tokio::test]
    async fn test_run_cancelled_while_connecting_is_normal() {
        // A listener that accepts but never speaks SSH keeps the
        // handshake pending; cancellation must end the forwarder
        // cleanly.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let spec = ForwardSpec {
            addr: addr.to_string(),
            user: "nobody".to_string(),
            remote: "10.0.0.1:80".to_string(),
            local: "127.0.0.1:0".to_string(),
        };

        let token = CancellationToken::new();
        let task = tokio::spawn(run(
            token.clone(),
            spec,
            vec![AuthCapability::Password("x".to_string())],
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("forwarder did not stop after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }
}
