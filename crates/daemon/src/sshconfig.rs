// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// SSH config (~/.ssh/config) resolution for bastion host aliases
//
// Supports the subset of directives gurren needs: Host, HostName,
// User, Port, IdentityFile. The first obtained value wins for each
// parameter, matching OpenSSH semantics; wildcard blocks act as
// fallbacks for anything a more specific block did not set.

use std::io::BufRead;
use std::path::PathBuf;

use tracing::debug;

use gurren_common::parse_host;

use crate::auth::expand_tilde;

/// Connection details resolved from SSH config
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHost {
    /// Actual hostname to connect to (HostName directive, or the alias itself)
    pub hostname: String,
    /// Username from the User directive; empty when not specified
    pub user: String,
    /// SSH port, defaulting to 22
    pub port: u16,
    /// Private key paths from IdentityFile directives
    pub identity_files: Vec<PathBuf>,
}

impl ResolvedHost {
    /// The hostname:port string for connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Look up an alias in ~/.ssh/config.
///
/// An alias not present in the config resolves to itself with default
/// values: port 22, no user, no identity files.
pub fn resolve(alias: &str) -> ResolvedHost {
    let fallback = ResolvedHost {
        hostname: alias.to_string(),
        user: String::new(),
        port: 22,
        identity_files: Vec::new(),
    };

    let Some(home) = dirs::home_dir() else {
        return fallback;
    };
    let config_path = home.join(".ssh").join("config");
    let file = match std::fs::File::open(&config_path) {
        Ok(f) => f,
        Err(_) => {
            debug!("no SSH config at {}", config_path.display());
            return fallback;
        }
    };

    resolve_from(std::io::BufReader::new(file), alias)
}

/// Resolve a raw bastion host string into connection parameters.
///
/// `[user@]host:port` forms are taken literally. A bare name (no `@`,
/// no `:`) may be an SSH-config alias and is resolved through it; an
/// explicit `user@` prefix wins over the config's User directive.
/// Returns `(address, user, identity_files)`.
pub fn resolve_host(raw: &str) -> (String, String, Vec<PathBuf>) {
    let (user_part, rest) = match raw.split_once('@') {
        Some((user, rest)) => (Some(user.to_string()), rest),
        None => (None, raw),
    };

    if rest.contains(':') {
        // Explicit port; no alias lookup
        let (addr, user) = parse_host(raw);
        return (addr, user, Vec::new());
    }

    let resolved = resolve(rest);
    let address = resolved.address();
    let user = match user_part {
        Some(user) if !user.is_empty() => user,
        _ => resolved.user,
    };

    (address, user, resolved.identity_files)
}

/// Username to fall back to when neither the bastion string nor the
/// SSH config names one.
pub fn login_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

fn resolve_from(reader: impl BufRead, alias: &str) -> ResolvedHost {
    let mut hostname: Option<String> = None;
    let mut user: Option<String> = None;
    let mut port: Option<u16> = None;
    let mut identity_files: Vec<PathBuf> = Vec::new();
    let mut in_matching_block = false;

    for line in reader.lines() {
        let Ok(line) = line else { continue };
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((keyword, argument)) = split_directive(trimmed) else {
            continue;
        };

        if keyword.eq_ignore_ascii_case("Host") {
            in_matching_block = argument
                .split_whitespace()
                .any(|pattern| host_pattern_matches(pattern, alias));
            continue;
        }

        if !in_matching_block {
            continue;
        }

        // First value wins for each directive
        match keyword.to_ascii_lowercase().as_str() {
            "hostname" => {
                if hostname.is_none() {
                    hostname = Some(argument.to_string());
                }
            }
            "user" => {
                if user.is_none() {
                    user = Some(argument.to_string());
                }
            }
            "port" => {
                if port.is_none() {
                    port = argument.parse().ok();
                }
            }
            "identityfile" => {
                identity_files.push(expand_tilde(std::path::Path::new(argument)));
            }
            _ => {}
        }
    }

    ResolvedHost {
        hostname: hostname.unwrap_or_else(|| alias.to_string()),
        user: user.unwrap_or_default(),
        port: port.unwrap_or(22),
        identity_files,
    }
}

/// Split an SSH config line into (keyword, argument); both the
/// `Keyword value` and `Keyword=value` forms occur in the wild.
fn split_directive(line: &str) -> Option<(&str, &str)> {
    if let Some(eq_pos) = line.find('=') {
        let keyword = line[..eq_pos].trim();
        let argument = line[eq_pos + 1..].trim();
        if !keyword.is_empty() && !argument.is_empty() {
            return Some((keyword, argument));
        }
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let keyword = parts.next()?.trim();
    let argument = parts.next()?.trim();
    if keyword.is_empty() || argument.is_empty() {
        return None;
    }
    Some((keyword, argument))
}

/// Match a Host pattern against the alias. `*` and `?` globs are
/// supported; negated patterns are not.
fn host_pattern_matches(pattern: &str, target: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') && !pattern.contains('?') {
        return pattern == target;
    }
    glob_match(pattern.as_bytes(), target.as_bytes())
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let mut pi = 0;
    let mut ti = 0;
    let mut star_pi = usize::MAX;
    let mut star_ti = 0;

    while ti < text.len() {
        if pi < pattern.len() && (pattern[pi] == b'?' || pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < pattern.len() && pattern[pi] == b'*' {
            star_pi = pi;
            star_ti = ti;
            pi += 1;
        } else if star_pi != usize::MAX {
            pi = star_pi + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < pattern.len() && pattern[pi] == b'*' {
        pi += 1;
    }

    pi == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_simple_block() {
        let config = "\
Host bastion-staging
    HostName 35.86.41.10
    User ec2-user
    IdentityFile ~/.ssh/bastion-staging
";
        let resolved = resolve_from(config.as_bytes(), "bastion-staging");
        assert_eq!(resolved.hostname, "35.86.41.10");
        assert_eq!(resolved.user, "ec2-user");
        assert_eq!(resolved.port, 22);
        assert_eq!(resolved.identity_files.len(), 1);
        assert_eq!(resolved.address(), "35.86.41.10:22");
    }

    #[test]
    fn test_resolve_unknown_alias_falls_back() {
        let config = "\
Host other
    HostName other.example.com
";
        let resolved = resolve_from(config.as_bytes(), "bastion");
        assert_eq!(resolved.hostname, "bastion");
        assert_eq!(resolved.user, "");
        assert_eq!(resolved.port, 22);
        assert!(resolved.identity_files.is_empty());
    }

    #[test]
    fn test_resolve_first_value_wins_with_wildcard_fallback() {
        let config = "\
Host bastion
    User specific

Host *
    User fallback
    Port 2200
";
        let resolved = resolve_from(config.as_bytes(), "bastion");
        assert_eq!(resolved.user, "specific");
        assert_eq!(resolved.port, 2200);
    }

    #[test]
    fn test_resolve_equals_syntax_and_comments() {
        let config = "\
# staging access
Host bastion
    HostName=10.0.0.5
    Port=2222
";
        let resolved = resolve_from(config.as_bytes(), "bastion");
        assert_eq!(resolved.hostname, "10.0.0.5");
        assert_eq!(resolved.port, 2222);
    }

    #[test]
    fn test_resolve_glob_patterns() {
        let config = "\
Host bastion-*
    User ops
";
        assert_eq!(resolve_from(config.as_bytes(), "bastion-prod").user, "ops");
        assert_eq!(resolve_from(config.as_bytes(), "db-prod").user, "");
    }

    #[test]
    fn test_identity_file_tilde_expansion() {
        let config = "\
Host bastion
    IdentityFile ~/.ssh/special
";
        let resolved = resolve_from(config.as_bytes(), "bastion");
        let path = resolved.identity_files[0].to_string_lossy();
        assert!(!path.starts_with('~'), "tilde should be expanded: {}", path);
        assert!(path.ends_with(".ssh/special"));
    }

    #[test]
    fn test_resolve_host_explicit_forms_skip_lookup() {
        let (addr, user, ids) = resolve_host("root@10.0.0.1:2222");
        assert_eq!(addr, "10.0.0.1:2222");
        assert_eq!(user, "root");
        assert!(ids.is_empty());

        let (addr, user, _) = resolve_host("10.0.0.1:2222");
        assert_eq!(addr, "10.0.0.1:2222");
        assert_eq!(user, "");
    }

    #[test]
    fn test_resolve_host_bare_alias_defaults() {
        // Not expected to be in the real SSH config; resolution falls
        // back to the alias itself with port 22.
        let (addr, user, _) = resolve_host("gurren-test-nonexistent-alias");
        assert_eq!(addr, "gurren-test-nonexistent-alias:22");
        assert_eq!(user, "");
    }

    #[test]
    fn test_login_user_is_nonempty() {
        assert!(!login_user().is_empty());
    }
}
