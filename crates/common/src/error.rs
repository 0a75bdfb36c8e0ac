// Error types for gurren

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("tunnel {0:?} not found")]
    TunnelNotFound(String),

    #[error("tunnel {name:?} is already {status}")]
    TunnelActive { name: String, status: String },

    #[error("tunnel {0:?} is not running")]
    TunnelInactive(String),

    #[error("tunnel {0:?} is not ephemeral")]
    TunnelNotEphemeral(String),

    #[error("SSH connection error: {0}")]
    SshConnection(String),

    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
