// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// Configuration loading for gurren
//
// Combines input from the config file and environment. Config file
// locations, in order of precedence:
//   1. $GURREN_CONFIG
//   2. ~/.config/gurren/config.toml
//   3. ~/gurren.toml

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub tunnels: Vec<TunnelConfig>,
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// "auto", "agent", "publickey" or "password"
    #[serde(default = "default_auth_method")]
    pub method: String,
    /// Specific private key path for publickey auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    /// Pre-configured password. The daemon has no terminal, so password
    /// auth is only available when this is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: default_auth_method(),
            key_path: None,
            password: None,
        }
    }
}

fn default_auth_method() -> String {
    "auto".to_string()
}

/// A tunnel to a remote endpoint via an SSH bastion
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TunnelConfig {
    /// Friendly name, the primary key within the manager
    #[serde(default)]
    pub name: String,
    /// Bastion host: `[user@]host[:port]` or an alias from ~/.ssh/config
    pub host: String,
    /// Remote address to reach through the bastion (host:port)
    pub remote: String,
    /// Local bind address (host:port)
    pub local: String,
}

impl Config {
    /// Load configuration from the first config file found, or defaults
    /// when none exists.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("GURREN_CONFIG") {
            return Self::load_from(Path::new(&path));
        }

        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("unable to determine home directory".to_string()))?;

        let candidates = [
            home.join(".config").join("gurren").join("config.toml"),
            home.join("gurren.toml"),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load_from(path);
            }
        }

        // No config file is fine, run with defaults
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("error reading {}: {}", path.display(), e)))?;
        let cfg: Config = toml::from_str(&raw)?;
        Ok(cfg)
    }

    /// Look up a tunnel definition by name
    pub fn tunnel_by_name(&self, name: &str) -> Option<&TunnelConfig> {
        self.tunnels.iter().find(|t| t.name == name)
    }

    /// Names of all configured tunnels
    pub fn tunnel_names(&self) -> Vec<String> {
        self.tunnels.iter().map(|t| t.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[auth]
method = "publickey"
key_path = "/home/user/.ssh/id_ed25519"

[[tunnels]]
name = "db"
host = "ec2-user@bastion.example.com"
remote = "10.0.30.5:5432"
local = "127.0.0.1:15432"

[[tunnels]]
name = "redis"
host = "bastion-staging"
remote = "10.0.30.6:6379"
local = "127.0.0.1:16379"
"#
        )
        .unwrap();

        let cfg = Config::load_from(file.path()).unwrap();
        assert_eq!(cfg.auth.method, "publickey");
        assert_eq!(
            cfg.auth.key_path.as_deref(),
            Some(Path::new("/home/user/.ssh/id_ed25519"))
        );
        assert_eq!(cfg.tunnels.len(), 2);
        assert_eq!(cfg.tunnel_names(), vec!["db", "redis"]);

        let db = cfg.tunnel_by_name("db").unwrap();
        assert_eq!(db.host, "ec2-user@bastion.example.com");
        assert_eq!(db.remote, "10.0.30.5:5432");
        assert_eq!(db.local, "127.0.0.1:15432");

        assert!(cfg.tunnel_by_name("missing").is_none());
    }

    #[test]
    fn test_defaults_without_file() {
        let cfg = Config::default();
        assert_eq!(cfg.auth.method, "auto");
        assert!(cfg.auth.key_path.is_none());
        assert!(cfg.tunnels.is_empty());
    }

    #[test]
    fn test_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[tunnels]]
name = "api"
host = "bastion"
remote = "10.0.0.2:8080"
local = "127.0.0.1:8080"
"#
        )
        .unwrap();

        let cfg = Config::load_from(file.path()).unwrap();
        assert_eq!(cfg.auth.method, "auto");
        assert_eq!(cfg.tunnels.len(), 1);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "tunnels = 42").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }
}
