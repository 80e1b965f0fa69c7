//! Error types for the Portway tunnel engine

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the Portway ecosystem
#[derive(Error, Debug)]
pub enum PwError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Forwarding error
    #[error("Forward error: {0}")]
    Forward(#[from] ForwardError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
///
/// These are fatal at construction time and are never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Forward type is not one of the known backends
    #[error("Unknown forward type: {0}")]
    UnknownForwardType(String),

    /// Port mapping is not a valid "local:remote" pair
    #[error("Invalid port mapping {0:?}, expected \"local:remote\"")]
    InvalidPortMapping(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Errors surfaced by a forwarder
///
/// Per-session failures are absorbed and logged while sibling sessions
/// are alive; a forwarder only returns one of these when it never
/// established a session, or lost them all.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// The selector matched no remote entity at all. Terminal: this is
    /// almost always a configuration mistake.
    #[error("selector {selector:?} matched nothing in namespace {namespace:?}")]
    NoMatch { namespace: String, selector: String },

    /// A matching workload exists but has no ready instance yet.
    /// Retried with backoff within the resolution window.
    #[error("no ready target for selector {selector:?} in namespace {namespace:?}")]
    NoReadyTarget { namespace: String, selector: String },

    /// The remote endpoint did not honor the tunnel upgrade protocol.
    /// The response body is carried verbatim so operators can diagnose
    /// server-side misconfiguration.
    #[error("tunnel upgrade refused (status {status}): {body}")]
    UpgradeFailed { status: u16, body: String },

    /// An established session's transport closed unexpectedly
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Authentication was rejected by the remote end
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Remote platform API error (listing targets, negotiating streams)
    #[error("remote platform error: {0}")]
    Platform(String),

    /// The retry window elapsed with no session ever established
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForwardError {
    /// Whether the resolution/connection loop may retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ForwardError::NoReadyTarget { .. }
                | ForwardError::ConnectionLost(_)
                | ForwardError::Platform(_)
        )
    }
}
