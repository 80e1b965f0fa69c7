//! Cluster endpoint acquisition
//!
//! The local and remote variants share every byte of session logic;
//! the only difference is where the cluster endpoint comes from. That
//! difference lives behind `ConnectionProvider`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use pw_core::error::ForwardError;

/// A reachable cluster API endpoint
#[derive(Debug, Clone)]
pub struct ClusterEndpoint {
    /// Base URL of the API server
    pub server: String,
    /// Bearer token, if the credentials carry one
    pub token: Option<String>,
    /// Skip TLS verification (mirrors the credentials file flag)
    pub insecure_skip_tls_verify: bool,
}

/// Produces the endpoint a cluster forwarder connects through
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Resolve the endpoint for the given connection context
    async fn endpoint(&self, context: Option<&str>) -> Result<ClusterEndpoint, ForwardError>;
}

/// Reads the endpoint from a local kubeconfig file
pub struct KubeconfigProvider {
    path: PathBuf,
}

impl KubeconfigProvider {
    /// Use the given credentials file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default credentials location (`~/.kube/config`)
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kube")
            .join("config")
    }
}

#[async_trait]
impl ConnectionProvider for KubeconfigProvider {
    async fn endpoint(&self, context: Option<&str>) -> Result<ClusterEndpoint, ForwardError> {
        let kubeconfig = Kubeconfig::load(&self.path)?;
        kubeconfig.endpoint(context)
    }
}

/// Obtains the endpoint through a gateway indirection instead of local
/// cluster credentials
pub struct GatewayProvider {
    gateway_url: String,
    token: Option<String>,
}

impl GatewayProvider {
    /// Route cluster connections through the given gateway
    pub fn new(gateway_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            token,
        }
    }
}

#[async_trait]
impl ConnectionProvider for GatewayProvider {
    async fn endpoint(&self, context: Option<&str>) -> Result<ClusterEndpoint, ForwardError> {
        let base = self.gateway_url.trim_end_matches('/');
        let server = match context {
            Some(context) => format!("{}/clusters/{}", base, context),
            None => base.to_string(),
        };

        Ok(ClusterEndpoint {
            server,
            token: self.token.clone(),
            insecure_skip_tls_verify: false,
        })
    }
}

/// The subset of a kubeconfig file the engine needs
#[derive(Debug, Deserialize)]
struct Kubeconfig {
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextSpec,
}

#[derive(Debug, Deserialize)]
struct ContextSpec {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterSpec,
}

#[derive(Debug, Deserialize)]
struct ClusterSpec {
    server: String,
    #[serde(rename = "insecure-skip-tls-verify", default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserSpec,
}

#[derive(Debug, Default, Deserialize)]
struct UserSpec {
    #[serde(default)]
    token: Option<String>,
}

impl Kubeconfig {
    fn load(path: &Path) -> Result<Self, ForwardError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ForwardError::Platform(format!(
                "cannot read cluster credentials {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_yaml::from_str(&content)
            .map_err(|e| ForwardError::Platform(format!("malformed cluster credentials: {}", e)))
    }

    fn endpoint(&self, context: Option<&str>) -> Result<ClusterEndpoint, ForwardError> {
        let wanted = context
            .map(str::to_string)
            .or_else(|| self.current_context.clone())
            .ok_or_else(|| {
                ForwardError::Platform("no connection context configured or current".to_string())
            })?;

        let context = self
            .contexts
            .iter()
            .find(|c| c.name == wanted)
            .ok_or_else(|| ForwardError::Platform(format!("unknown context {:?}", wanted)))?;

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .ok_or_else(|| {
                ForwardError::Platform(format!("unknown cluster {:?}", context.context.cluster))
            })?;

        let token = context.context.user.as_ref().and_then(|user| {
            self.users
                .iter()
                .find(|u| &u.name == user)
                .and_then(|u| u.user.token.clone())
        });

        Ok(ClusterEndpoint {
            server: cluster.cluster.server.clone(),
            token,
            insecure_skip_tls_verify: cluster.cluster.insecure_skip_tls_verify,
        })
    }
}
