// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// Daemon socket location
//
// The daemon listens on a Unix socket under the user's runtime
// directory when one is available, otherwise under a hidden state
// directory in the user's home.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Resolve the daemon socket path and create its parent directory
/// with owner-only permissions.
///
/// `$XDG_RUNTIME_DIR/gurren/daemon.sock` when the runtime dir is set,
/// `$HOME/.local/state/.gurren/daemon.sock` otherwise.
pub fn socket_path() -> Result<PathBuf> {
    let (base, dir_name) = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime) if !runtime.is_empty() => (PathBuf::from(runtime), "gurren"),
        _ => {
            let home = dirs::home_dir()
                .ok_or_else(|| Error::Config("unable to determine home directory".to_string()))?;
            (home.join(".local").join("state"), ".gurren")
        }
    };

    let state_dir = base.join(dir_name);
    std::fs::create_dir_all(&state_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&state_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(state_dir.join("daemon.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_shape() {
        let path = socket_path().unwrap();
        assert!(path.ends_with("daemon.sock"));
        let dir = path.parent().unwrap();
        assert!(dir.is_dir());

        let name = dir.file_name().unwrap().to_string_lossy();
        assert!(name == "gurren" || name == ".gurren");
    }

    #[cfg(unix)]
    #[test]
    fn test_state_dir_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let path = socket_path().unwrap();
        let mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
