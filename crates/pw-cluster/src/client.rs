//! Remote platform client abstraction
//!
//! The forwarder only needs three capabilities from the platform:
//! listing grouping workloads, listing ready targets, and opening one
//! upgraded duplex stream per (target, port). Keeping these behind a
//! trait lets tests substitute a fake without touching production
//! wiring.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use pw_core::error::ForwardError;
use pw_core::types::TargetId;

/// A duplex byte stream carrying one tunnel session
pub trait TunnelStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TunnelStream for T {}

/// A higher-level grouping entity (deployment) matched by a selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// Workload name
    pub name: String,
    /// Number of instances currently ready to serve
    pub ready_replicas: u32,
}

/// Capability set the cluster forwarder requires from the platform
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List workloads in `namespace` matching `selector`
    async fn list_workloads(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Workload>, ForwardError>;

    /// List live, ready targets in `namespace` matching `selector`
    async fn list_targets(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<TargetId>, ForwardError>;

    /// Open one upgraded duplex stream to `remote_port` on `target`.
    ///
    /// A response that does not perform the expected protocol upgrade
    /// must surface as `ForwardError::UpgradeFailed` carrying the
    /// response body verbatim.
    async fn open_stream(
        &self,
        namespace: &str,
        target: &TargetId,
        remote_port: u16,
    ) -> Result<Box<dyn TunnelStream>, ForwardError>;
}
