//! SSH endpoint parsing
//!
//! Host strings follow the familiar `user@host:port` shape, with the
//! current user and port 22 as defaults; IPv6 literals take the
//! `[addr]:port` bracket form. The identity file comes from a
//! `-i <path>` pair in the forward's extra arguments, falling back to
//! the usual keys under `~/.ssh`.

use std::path::PathBuf;

use pw_core::error::ConfigError;

const DEFAULT_SSH_PORT: u16 = 22;

/// Where and as whom an SSH forwarder connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshEndpoint {
    /// Login user
    pub user: String,
    /// Remote host
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Explicitly configured identity file, if any
    pub identity: Option<PathBuf>,
}

impl SshEndpoint {
    /// Parse a `user@host:port` string, applying defaults for the
    /// missing parts, and pick up an identity file from `-i` arguments
    pub fn parse(hostname: &str, args: &[String]) -> Result<Self, ConfigError> {
        let (user, rest) = match hostname.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (user.to_string(), rest),
            Some(_) => {
                return Err(ConfigError::Invalid(format!(
                    "empty user in SSH host {:?}",
                    hostname
                )))
            }
            None => (whoami::username(), hostname),
        };

        let (host, port) = split_host_port(rest, hostname)?;

        if host.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "empty host in SSH host {:?}",
                hostname
            )));
        }

        Ok(Self {
            user,
            host,
            port,
            identity: identity_from_args(args),
        })
    }

    /// The identity file to authenticate with: the configured one, or
    /// the first default key present under `~/.ssh`
    pub fn identity_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.identity {
            return Some(path.clone());
        }

        let ssh_dir = dirs::home_dir()?.join(".ssh");
        ["id_ed25519", "id_rsa", "id_ecdsa"]
            .iter()
            .map(|name| ssh_dir.join(name))
            .find(|path| path.exists())
    }

    /// `host:port` address for the TCP connection
    pub fn address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

/// Split the host part of an endpoint into host and port.
///
/// IPv6 literals use the `[addr]:port` bracket form; a bare literal
/// with multiple colons is taken whole with the default port, so
/// `::1` never loses its last group to port parsing.
fn split_host_port(rest: &str, hostname: &str) -> Result<(String, u16), ConfigError> {
    if let Some(bracketed) = rest.strip_prefix('[') {
        let Some((host, after)) = bracketed.split_once(']') else {
            return Err(ConfigError::Invalid(format!(
                "unterminated '[' in SSH host {:?}",
                hostname
            )));
        };
        let port = match after.strip_prefix(':') {
            Some(port) => port.parse::<u16>().map_err(|_| {
                ConfigError::Invalid(format!("invalid SSH port in {:?}", hostname))
            })?,
            None if after.is_empty() => DEFAULT_SSH_PORT,
            None => {
                return Err(ConfigError::Invalid(format!(
                    "unexpected text after ']' in SSH host {:?}",
                    hostname
                )))
            }
        };
        return Ok((host.to_string(), port));
    }

    if rest.matches(':').count() > 1 {
        return Ok((rest.to_string(), DEFAULT_SSH_PORT));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid(format!("invalid SSH port in {:?}", hostname)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), DEFAULT_SSH_PORT)),
    }
}

fn identity_from_args(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_form() {
        let endpoint = SshEndpoint::parse("deploy@bastion.corp:2222", &[]).unwrap();
        assert_eq!(endpoint.user, "deploy");
        assert_eq!(endpoint.host, "bastion.corp");
        assert_eq!(endpoint.port, 2222);
    }

    #[test]
    fn test_parse_defaults_user_and_port() {
        let endpoint = SshEndpoint::parse("bastion.corp", &[]).unwrap();
        assert_eq!(endpoint.user, whoami::username());
        assert_eq!(endpoint.host, "bastion.corp");
        assert_eq!(endpoint.port, 22);
    }

    #[test]
    fn test_parse_host_with_port_only() {
        let endpoint = SshEndpoint::parse("bastion.corp:2200", &[]).unwrap();
        assert_eq!(endpoint.user, whoami::username());
        assert_eq!(endpoint.port, 2200);
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        assert!(SshEndpoint::parse("host:notaport", &[]).is_err());
        assert!(SshEndpoint::parse("host:99999", &[]).is_err());
    }

    #[test]
    fn test_parse_rejects_empty_parts() {
        assert!(SshEndpoint::parse("@host", &[]).is_err());
        assert!(SshEndpoint::parse("user@:22", &[]).is_err());
    }

    #[test]
    fn test_parse_bare_ipv6_keeps_whole_address() {
        let endpoint = SshEndpoint::parse("::1", &[]).unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.port, 22);

        let endpoint = SshEndpoint::parse("root@fe80::2:1", &[]).unwrap();
        assert_eq!(endpoint.user, "root");
        assert_eq!(endpoint.host, "fe80::2:1");
        assert_eq!(endpoint.port, 22);
    }

    #[test]
    fn test_parse_bracketed_ipv6_with_port() {
        let endpoint = SshEndpoint::parse("[::1]:2222", &[]).unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.port, 2222);

        let endpoint = SshEndpoint::parse("deploy@[fe80::1]", &[]).unwrap();
        assert_eq!(endpoint.user, "deploy");
        assert_eq!(endpoint.host, "fe80::1");
        assert_eq!(endpoint.port, 22);
    }

    #[test]
    fn test_parse_rejects_malformed_brackets() {
        assert!(SshEndpoint::parse("[::1", &[]).is_err());
        assert!(SshEndpoint::parse("[::1]2222", &[]).is_err());
    }

    #[test]
    fn test_identity_from_args() {
        let args = vec!["-v".to_string(), "-i".to_string(), "/tmp/key".to_string()];
        let endpoint = SshEndpoint::parse("host", &args).unwrap();
        assert_eq!(endpoint.identity, Some(PathBuf::from("/tmp/key")));
        assert_eq!(endpoint.identity_file(), Some(PathBuf::from("/tmp/key")));
    }

    #[test]
    fn test_identity_absent_without_flag() {
        let endpoint = SshEndpoint::parse("host", &["-v".to_string()]).unwrap();
        assert_eq!(endpoint.identity, None);
    }
}
