// Permissions hardening for daemon files

use std::path::Path;

use gurren_common::error::Result;
use tracing::debug;

/// Set a restrictive umask so files created by the daemon default to
/// owner-only access. Called early in main, before any file exists.
pub fn set_restrictive_umask() {
    #[cfg(unix)]
    {
        unsafe {
            libc::umask(0o077);
        }
        debug!("set restrictive umask: 0077");
    }
}

/// Tighten the listening socket to owner read/write only (0600)
pub fn set_socket_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        debug!("set socket permissions to 0600: {}", path.display());
    }
    Ok(())
}
