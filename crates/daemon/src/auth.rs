// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// SSH authentication capability discovery
//
// The daemon has no terminal, so only non-interactive material is
// collected here: the running SSH agent, private key files on disk,
// and a password taken from configuration. Capabilities are ordered
// by priority; the forwarder tries them in order and the first that
// the server accepts wins.

use std::path::PathBuf;

use gurren_common::config::AuthConfig;
use gurren_common::error::{Error, Result};

/// Key file names probed under ~/.ssh, in order of preference
const DEFAULT_KEY_NAMES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

/// One way of authenticating against the bastion
#[derive(Debug, Clone, PartialEq)]
pub enum AuthCapability {
    /// Identities offered by the SSH agent at $SSH_AUTH_SOCK
    Agent,
    /// A private key file
    Key(PathBuf),
    /// A password from configuration
    Password(String),
}

impl AuthCapability {
    pub fn name(&self) -> &'static str {
        match self {
            AuthCapability::Agent => "agent",
            AuthCapability::Key(_) => "publickey",
            AuthCapability::Password(_) => "password",
        }
    }
}

/// Build the ordered capability list for the configured auth method.
///
/// `extra_identities` come from SSH-config alias resolution and take
/// precedence over the default key probe. Method "auto" (or empty)
/// yields every available capability; a named method yields exactly
/// that one or an error when it is unavailable.
pub fn capabilities(auth: &AuthConfig, extra_identities: &[PathBuf]) -> Result<Vec<AuthCapability>> {
    build(agent_available(), auth, extra_identities, default_key_paths())
}

fn build(
    agent: bool,
    auth: &AuthConfig,
    extra_identities: &[PathBuf],
    default_keys: Vec<PathBuf>,
) -> Result<Vec<AuthCapability>> {
    let mut keys: Vec<PathBuf> = Vec::new();
    if let Some(configured) = &auth.key_path {
        keys.push(expand_tilde(configured));
    }
    keys.extend(extra_identities.iter().cloned());
    keys.extend(default_keys);
    keys.retain(|p| p.exists());
    keys.dedup();

    match auth.method.as_str() {
        "" | "auto" => {
            let mut caps = Vec::new();
            if agent {
                caps.push(AuthCapability::Agent);
            }
            caps.extend(keys.into_iter().map(AuthCapability::Key));
            if let Some(password) = &auth.password {
                caps.push(AuthCapability::Password(password.clone()));
            }
            if caps.is_empty() {
                return Err(Error::Auth(
                    "no authentication methods available".to_string(),
                ));
            }
            Ok(caps)
        }
        "agent" => {
            if !agent {
                return Err(Error::Auth(
                    "agent authentication is not available (SSH_AUTH_SOCK is unset)".to_string(),
                ));
            }
            Ok(vec![AuthCapability::Agent])
        }
        "publickey" => {
            if keys.is_empty() {
                return Err(Error::Auth("no private key found".to_string()));
            }
            Ok(keys.into_iter().map(AuthCapability::Key).collect())
        }
        "password" => match &auth.password {
            Some(password) => Ok(vec![AuthCapability::Password(password.clone())]),
            None => Err(Error::Auth(
                "password authentication requires a configured password".to_string(),
            )),
        },
        other => Err(Error::Auth(format!(
            "unknown authentication method: {:?}",
            other
        ))),
    }
}

fn agent_available() -> bool {
    std::env::var_os("SSH_AUTH_SOCK")
        .map(|s| !s.is_empty())
        .unwrap_or(false)
}

fn default_key_paths() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    let ssh_dir = home.join(".ssh");
    DEFAULT_KEY_NAMES
        .iter()
        .map(|name| ssh_dir.join(name))
        .collect()
}

/// Expand a leading `~` to the user's home directory
pub fn expand_tilde(path: &std::path::Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auto_config() -> AuthConfig {
        AuthConfig {
            method: "auto".to_string(),
            key_path: None,
            password: None,
        }
    }

    fn touch(dir: &std::path::Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "key material").unwrap();
        path
    }

    #[test]
    fn test_auto_prefers_agent_then_keys_then_password() {
        let dir = tempfile::tempdir().unwrap();
        let key = touch(dir.path(), "id_ed25519");

        let auth = AuthConfig {
            method: "auto".to_string(),
            key_path: None,
            password: Some("hunter2".to_string()),
        };

        let caps = build(true, &auth, &[], vec![key.clone()]).unwrap();
        assert_eq!(caps.len(), 3);
        assert_eq!(caps[0], AuthCapability::Agent);
        assert_eq!(caps[1], AuthCapability::Key(key));
        assert_eq!(caps[2], AuthCapability::Password("hunter2".to_string()));
    }

    #[test]
    fn test_auto_without_anything_is_an_error() {
        let missing = PathBuf::from("/nonexistent/id_rsa");
        let err = build(false, &auto_config(), &[], vec![missing]).unwrap_err();
        assert!(err.to_string().contains("no authentication methods"));
    }

    #[test]
    fn test_resolved_identities_precede_default_keys() {
        let dir = tempfile::tempdir().unwrap();
        let alias_key = touch(dir.path(), "bastion-staging");
        let default_key = touch(dir.path(), "id_rsa");

        let caps = build(
            false,
            &auto_config(),
            &[alias_key.clone()],
            vec![default_key.clone()],
        )
        .unwrap();
        assert_eq!(
            caps,
            vec![
                AuthCapability::Key(alias_key),
                AuthCapability::Key(default_key)
            ]
        );
    }

    #[test]
    fn test_named_method_filters() {
        let dir = tempfile::tempdir().unwrap();
        let key = touch(dir.path(), "id_ecdsa");

        let auth = AuthConfig {
            method: "publickey".to_string(),
            key_path: None,
            password: Some("unused".to_string()),
        };
        let caps = build(true, &auth, &[], vec![key.clone()]).unwrap();
        assert_eq!(caps, vec![AuthCapability::Key(key)]);

        let auth = AuthConfig {
            method: "agent".to_string(),
            key_path: None,
            password: None,
        };
        assert_eq!(
            build(true, &auth, &[], vec![]).unwrap(),
            vec![AuthCapability::Agent]
        );
        assert!(build(false, &auth, &[], vec![]).is_err());
    }

    #[test]
    fn test_password_method_requires_configured_password() {
        let auth = AuthConfig {
            method: "password".to_string(),
            key_path: None,
            password: None,
        };
        assert!(build(true, &auth, &[], vec![]).is_err());

        let auth = AuthConfig {
            password: Some("s3cret".to_string()),
            ..auth
        };
        assert_eq!(
            build(false, &auth, &[], vec![]).unwrap(),
            vec![AuthCapability::Password("s3cret".to_string())]
        );
    }

    #[test]
    fn test_unknown_method_is_an_error() {
        let auth = AuthConfig {
            method: "smartcard".to_string(),
            key_path: None,
            password: None,
        };
        let err = build(true, &auth, &[], vec![]).unwrap_err();
        assert!(err.to_string().contains("unknown authentication method"));
    }

    #[test]
    fn test_missing_key_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let present = touch(dir.path(), "id_rsa");
        let missing = dir.path().join("id_ed25519");

        let caps = build(false, &auto_config(), &[missing], vec![present.clone()]).unwrap();
        assert_eq!(caps, vec![AuthCapability::Key(present)]);
    }
}
