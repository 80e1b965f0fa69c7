//! pw-cluster: Kubernetes pod-forwarding backends
//!
//! Targets are resolved by label selector, then one tunnel session is
//! opened per (pod, port mapping) through the platform's streaming
//! upgrade endpoint. The `kubernetes` and `kubernetes-remote` types
//! share all session logic; they differ only in how the cluster
//! endpoint is obtained (local credentials vs. a gateway indirection),
//! which is isolated behind the `ConnectionProvider` capability.

mod client;
mod forwarder;
mod http;
mod provider;
mod selector;

pub use client::{ClusterClient, TunnelStream, Workload};
pub use forwarder::ClusterForwarder;
pub use http::HttpClusterClient;
pub use provider::{ClusterEndpoint, ConnectionProvider, GatewayProvider, KubeconfigProvider};
pub use selector::{build_selector, resolve_targets};
