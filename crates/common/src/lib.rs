// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// Gurren - Common Library
// Shared types, configuration, wire protocol and the daemon RPC client

pub mod client;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod socket;
pub mod types;

pub use client::{connect_or_start, daemon_binary, is_running, is_running_at, spawn_daemon, Client};
pub use config::{AuthConfig, Config, TunnelConfig};
pub use error::{Error, Result};
pub use network::{join_host, parse_host};
pub use protocol::{
    classify_message, Incoming, Notification, PingResult, Request, Response, RpcError,
    StatusChangedParams, TunnelInfo, TunnelListResult, TunnelRegisterParams, TunnelRegisterResult,
    TunnelStartParams, TunnelStatusParams, TunnelStatusResult, TunnelStopParams,
};
pub use socket::socket_path;
pub use types::{StatusChange, TunnelState};
