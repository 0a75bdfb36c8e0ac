// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gurren Contributors

// Bastion host address parsing

/// Parse a bastion host string of the form `[user@]host[:port]`.
///
/// Returns `(address, user)` where the address always carries a port
/// (`:22` is appended when none is given) and the user is empty when
/// no `user@` prefix is present.
///
/// # Examples
/// ```
/// use gurren_common::parse_host;
///
/// assert_eq!(parse_host("root@10.0.0.1:2222"), ("10.0.0.1:2222".to_string(), "root".to_string()));
/// assert_eq!(parse_host("example.com"), ("example.com:22".to_string(), String::new()));
/// ```
pub fn parse_host(host: &str) -> (String, String) {
    let (user, addr) = match host.split_once('@') {
        Some((user, addr)) => (user.to_string(), addr.to_string()),
        None => (String::new(), host.to_string()),
    };

    let addr = if addr.contains(':') {
        addr
    } else {
        format!("{}:22", addr)
    };

    (addr, user)
}

/// Canonicalize `(user, host, port)` back into `[user@]host:port`.
/// `parse_host` is a left-inverse of this function.
pub fn join_host(user: &str, host: &str, port: u16) -> String {
    if user.is_empty() {
        format!("{}:{}", host, port)
    } else {
        format!("{}@{}:{}", user, host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host() {
        let cases = [
            ("example.com", "example.com:22", ""),
            ("admin@example.com", "example.com:22", "admin"),
            ("admin@example.com:2222", "example.com:2222", "admin"),
            ("example.com:2222", "example.com:2222", ""),
            ("192.168.1.100", "192.168.1.100:22", ""),
            ("root@192.168.1.100:22", "192.168.1.100:22", "root"),
        ];

        for (input, want_addr, want_user) in cases {
            let (addr, user) = parse_host(input);
            assert_eq!(addr, want_addr, "parse_host({:?}) address", input);
            assert_eq!(user, want_user, "parse_host({:?}) user", input);
        }
    }

    #[test]
    fn test_parse_host_splits_on_first_at() {
        let (addr, user) = parse_host("weird@name@host");
        assert_eq!(user, "weird");
        assert_eq!(addr, "name@host:22");
    }

    #[test]
    fn test_parse_is_left_inverse_of_join() {
        let cases = [("root", "10.0.0.1", 2222), ("", "example.com", 22), ("ec2-user", "bastion", 22)];

        for (user, host, port) in cases {
            let joined = join_host(user, host, port);
            let (addr, parsed_user) = parse_host(&joined);
            assert_eq!(addr, format!("{}:{}", host, port));
            assert_eq!(parsed_user, user);
        }
    }
}
