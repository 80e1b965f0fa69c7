//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Identity of a concrete remote target (a pod, a host) matched by
/// scope and selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl TargetId {
    /// Create a new target ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A local-to-remote port pair, written `"local:remote"` in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port bound on the local machine
    pub local: u16,
    /// Port on the remote target
    pub remote: u16,
}

impl PortMapping {
    /// Create a new mapping
    pub fn new(local: u16, remote: u16) -> Self {
        Self { local, remote }
    }
}

impl FromStr for PortMapping {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (local, remote) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidPortMapping(s.to_string()))?;

        let local = local
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPortMapping(s.to_string()))?;
        let remote = remote
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPortMapping(s.to_string()))?;

        Ok(Self { local, remote })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}

/// Lifecycle state of a single tunnel session
///
/// Transitions only move forward; a replacement session is a new entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Session is resolving/negotiating its transport
    Connecting,
    /// Duplex stream is established and carrying traffic
    Streaming,
    /// Session was shut down cleanly
    Closed,
    /// Resolution or negotiation failed
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_mapping_parse() {
        let mapping: PortMapping = "8080:9090".parse().unwrap();
        assert_eq!(mapping.local, 8080);
        assert_eq!(mapping.remote, 9090);
        assert_eq!(mapping.to_string(), "8080:9090");
    }

    #[test]
    fn test_port_mapping_rejects_malformed() {
        assert!("8080".parse::<PortMapping>().is_err());
        assert!("web:8080".parse::<PortMapping>().is_err());
        assert!("8080:".parse::<PortMapping>().is_err());
        assert!("8080:9090:10".parse::<PortMapping>().is_err());
        assert!("99999:80".parse::<PortMapping>().is_err());
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(format!("{}", SessionState::Connecting), "connecting");
        assert_eq!(format!("{}", SessionState::Streaming), "streaming");
        assert_eq!(format!("{}", SessionState::Failed), "failed");
    }
}
