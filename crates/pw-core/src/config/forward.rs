//! Forward descriptors
//!
//! A descriptor is the immutable configuration value for one tunnel:
//! backend type, target selection, ports, and proxy routing options.
//! Descriptors are validated at construction; a runtime `Forwarder` is
//! built from one and never reused across configuration reloads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::types::PortMapping;

/// The closed set of tunnel backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ForwardType {
    /// Pod forwarding against a cluster reachable with local credentials
    Kubernetes,
    /// Pod forwarding with the cluster endpoint obtained through a gateway
    KubernetesRemote,
    /// SSH tunnel binding local ports to the remote side
    Ssh,
    /// SSH tunnel carrying remote-initiated traffic back to a local port
    SshRemote,
    /// Plain local TCP relay
    Proxy,
}

impl ForwardType {
    /// All known backend types
    pub const ALL: [ForwardType; 5] = [
        ForwardType::Kubernetes,
        ForwardType::KubernetesRemote,
        ForwardType::Ssh,
        ForwardType::SshRemote,
        ForwardType::Proxy,
    ];

    /// The wire name used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardType::Kubernetes => "kubernetes",
            ForwardType::KubernetesRemote => "kubernetes-remote",
            ForwardType::Ssh => "ssh",
            ForwardType::SshRemote => "ssh-remote",
            ForwardType::Proxy => "proxy",
        }
    }

    /// Whether forwards of this type route through the proxy hostname
    /// table by default.
    ///
    /// `ssh-remote` carries traffic initiated by the remote side, so it
    /// has no local port of its own to route to.
    pub fn is_proxified(&self) -> bool {
        !matches!(self, ForwardType::SshRemote)
    }
}

impl fmt::Display for ForwardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ForwardType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kubernetes" => Ok(ForwardType::Kubernetes),
            "kubernetes-remote" => Ok(ForwardType::KubernetesRemote),
            "ssh" => Ok(ForwardType::Ssh),
            "ssh-remote" => Ok(ForwardType::SshRemote),
            "proxy" => Ok(ForwardType::Proxy),
            other => Err(ConfigError::UnknownForwardType(other.to_string())),
        }
    }
}

impl TryFrom<String> for ForwardType {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ForwardType> for String {
    fn from(t: ForwardType) -> Self {
        t.as_str().to_string()
    }
}

/// One forward rule from the project configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardDescriptor {
    /// Identifier, unique within a project
    pub name: String,

    /// Backend type; unknown values are rejected while parsing
    #[serde(rename = "type")]
    pub forward_type: ForwardType,

    /// Backend-specific values
    #[serde(default)]
    pub values: ForwardValues,
}

impl ForwardDescriptor {
    /// Whether this forward is routed through the proxy hostname table
    pub fn is_proxified(&self) -> bool {
        self.forward_type.is_proxified() && !self.values.disable_proxy
    }

    /// Parse the configured `"local:remote"` port strings
    pub fn port_mappings(&self) -> Result<Vec<PortMapping>, ConfigError> {
        self.values.ports.iter().map(|p| p.parse()).collect()
    }

    /// Hostname under which the proxy router publishes this forward
    pub fn route_hostname(&self) -> &str {
        self.values
            .proxy_hostname
            .as_deref()
            .or(self.values.hostname.as_deref())
            .unwrap_or(&self.name)
    }

    /// Namespace/scope for target resolution, defaulting to `default`
    pub fn namespace(&self) -> &str {
        self.values.namespace.as_deref().unwrap_or("default")
    }
}

/// The recognized keys of a forward's `values` block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardValues {
    /// Connection context (cluster context name, gateway reference)
    pub context: Option<String>,

    /// Namespace or host scope for target resolution
    pub namespace: Option<String>,

    /// Label map resolved into a selector
    pub labels: HashMap<String, String>,

    /// Explicit hostname (shell host, or local route name)
    pub hostname: Option<String>,

    /// Override for the proxy route hostname
    pub proxy_hostname: Option<String>,

    /// Opt out of proxy routing for a proxified type
    pub disable_proxy: bool,

    /// Port mappings as `"local:remote"` strings
    pub ports: Vec<String>,

    /// Second-hop destination (`host[:port]`) for proxy and remote
    /// tunnels; without an explicit port each mapping uses its own
    /// remote port
    pub remote: Option<String>,

    /// Extra backend arguments
    pub args: Vec<String>,
}
