// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// Common types shared between the daemon, the RPC client and the CLI

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed tunnel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    /// No forwarder task is running
    Disconnected,
    /// Forwarder spawned, SSH handshake in flight
    Connecting,
    /// Local listener bound, traffic is being forwarded
    Connected,
    /// Forwarder exited with a failure; see the last-error string
    Error,
}

impl TunnelState {
    /// A tunnel is active while its forwarder is live (a cancel handle exists)
    pub fn is_active(&self) -> bool {
        matches!(self, TunnelState::Connecting | TunnelState::Connected)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelState::Disconnected => "disconnected",
            TunnelState::Connecting => "connecting",
            TunnelState::Connected => "connected",
            TunnelState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Status change event emitted by the tunnel manager and broadcast to
/// subscribed clients as a `tunnel.statusChanged` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub name: String,
    pub status: TunnelState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}
