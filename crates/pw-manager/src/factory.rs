//! Forwarder construction
//!
//! `build_forwarder` is the single place a descriptor's type is mapped
//! to a concrete backend. Everything a backend needs beyond its
//! descriptor (credentials paths, gateway coordinates, retry policy)
//! travels in `EngineSettings`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pw_cluster::{ClusterForwarder, ConnectionProvider, GatewayProvider, KubeconfigProvider};
use pw_core::config::{Config, ForwardDescriptor, ForwardType};
use pw_core::error::ConfigError;
use pw_core::retry::RetryConfig;
use pw_core::Forwarder;
use pw_proxy::{ProxyForwarder, ProxyRouter};
use pw_ssh::SshForwarder;

/// Grace given to a stopping forwarder before its sessions are
/// abandoned
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Engine-wide settings shared by every forwarder built from one
/// configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Cluster credentials file for the `kubernetes` type
    pub kubeconfig: Option<PathBuf>,

    /// Gateway base URL for the `kubernetes-remote` type
    pub gateway_url: Option<String>,

    /// Bearer token presented to the gateway
    pub gateway_token: Option<String>,

    /// Retry policy for resolution and reconnection
    pub retry: RetryConfig,

    /// Teardown grace per forwarder
    pub grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            gateway_url: None,
            gateway_token: None,
            retry: RetryConfig::default(),
            grace: DEFAULT_STOP_GRACE,
        }
    }
}

impl EngineSettings {
    /// Settings derived from the root configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            kubeconfig: config.kubeconfig.clone(),
            ..Self::default()
        }
    }
}

/// Build the runtime forwarder for one descriptor.
///
/// Construction failures are per-descriptor: the caller reports them
/// and keeps building siblings.
pub fn build_forwarder(
    descriptor: &ForwardDescriptor,
    settings: &EngineSettings,
    router: Arc<ProxyRouter>,
) -> Result<Arc<dyn Forwarder>, ConfigError> {
    match descriptor.forward_type {
        ForwardType::Kubernetes => {
            let path = settings
                .kubeconfig
                .clone()
                .unwrap_or_else(KubeconfigProvider::default_path);
            let provider: Arc<dyn ConnectionProvider> = Arc::new(KubeconfigProvider::new(path));
            Ok(Arc::new(ClusterForwarder::new(
                descriptor,
                provider,
                router,
                settings.retry.clone(),
                settings.grace,
            )?))
        }

        ForwardType::KubernetesRemote => {
            let gateway_url = settings
                .gateway_url
                .clone()
                .ok_or_else(|| ConfigError::MissingField("gateway_url".to_string()))?;
            let provider: Arc<dyn ConnectionProvider> = Arc::new(GatewayProvider::new(
                gateway_url,
                settings.gateway_token.clone(),
            ));
            Ok(Arc::new(ClusterForwarder::new(
                descriptor,
                provider,
                router,
                settings.retry.clone(),
                settings.grace,
            )?))
        }

        ForwardType::Ssh | ForwardType::SshRemote => Ok(Arc::new(SshForwarder::new(
            descriptor,
            router,
            settings.retry.clone(),
            settings.grace,
        )?)),

        ForwardType::Proxy => Ok(Arc::new(ProxyForwarder::new(
            descriptor,
            router,
            settings.grace,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pw_core::config::ForwardValues;

    fn descriptor(forward_type: ForwardType) -> ForwardDescriptor {
        ForwardDescriptor {
            name: "f".to_string(),
            forward_type,
            values: ForwardValues {
                hostname: Some("remote.host".to_string()),
                remote: Some("127.0.0.1".to_string()),
                ports: vec!["8080:8080".to_string()],
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_builds_every_type() {
        let settings = EngineSettings {
            gateway_url: Some("https://gw.example".to_string()),
            ..Default::default()
        };
        let router = Arc::new(ProxyRouter::new());

        for t in ForwardType::ALL {
            let forwarder =
                build_forwarder(&descriptor(t), &settings, Arc::clone(&router)).unwrap();
            assert_eq!(forwarder.forward_type(), t);
        }
    }

    #[test]
    fn test_remote_cluster_requires_gateway_url() {
        let err = build_forwarder(
            &descriptor(ForwardType::KubernetesRemote),
            &EngineSettings::default(),
            Arc::new(ProxyRouter::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "gateway_url"));
    }

    #[test]
    fn test_descriptor_errors_are_per_descriptor() {
        let mut bad = descriptor(ForwardType::Proxy);
        bad.values.ports = vec!["oops".to_string()];

        let err = build_forwarder(
            &bad,
            &EngineSettings::default(),
            Arc::new(ProxyRouter::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::InvalidPortMapping(_)));
    }
}
