//! HTTP implementation of the cluster client
//!
//! Talks to the platform's REST API with `reqwest`: label-selector
//! queries for workloads and pods, and one streaming-upgrade request
//! per (pod, port). The upgrade contract is strict: anything but `101
//! Switching Protocols` is a failed session, and the response body is
//! carried verbatim in the error so operators can see what the server
//! actually said (wrong API version, auth failure rendered as text).

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use pw_core::error::ForwardError;
use pw_core::types::TargetId;

use crate::client::{ClusterClient, TunnelStream, Workload};
use crate::provider::ClusterEndpoint;

/// Cluster client backed by the platform's REST API
pub struct HttpClusterClient {
    endpoint: ClusterEndpoint,
    http: reqwest::Client,
}

impl HttpClusterClient {
    /// Build a client for the given endpoint
    pub fn new(endpoint: ClusterEndpoint) -> Result<Self, ForwardError> {
        let mut builder = reqwest::Client::builder();
        if endpoint.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| ForwardError::Platform(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self { endpoint, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.server.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.endpoint.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        selector: &str,
    ) -> Result<T, ForwardError> {
        let mut request = self.http.get(self.url(path));
        if !selector.is_empty() {
            request = request.query(&[("labelSelector", selector)]);
        }

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ForwardError::Platform(format!("{} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::Platform(format!(
                "{} returned {}",
                path, status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ForwardError::Platform(format!("{} returned malformed body: {}", path, e)))
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn list_workloads(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Workload>, ForwardError> {
        let path = format!("/apis/apps/v1/namespaces/{}/deployments", namespace);
        let list: DeploymentList = self.get_json(&path, selector).await?;

        Ok(list
            .items
            .into_iter()
            .map(|d| Workload {
                name: d.metadata.name,
                ready_replicas: d.status.map(|s| s.ready_replicas).unwrap_or(0),
            })
            .collect())
    }

    async fn list_targets(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<TargetId>, ForwardError> {
        let path = format!("/api/v1/namespaces/{}/pods", namespace);
        let list: PodList = self.get_json(&path, selector).await?;

        Ok(list
            .items
            .iter()
            .filter(|pod| is_ready(pod))
            .map(|pod| TargetId::new(pod.metadata.name.clone()))
            .collect())
    }

    async fn open_stream(
        &self,
        namespace: &str,
        target: &TargetId,
        remote_port: u16,
    ) -> Result<Box<dyn TunnelStream>, ForwardError> {
        let path = format!(
            "/api/v1/namespaces/{}/pods/{}/portforward",
            namespace, target
        );

        let request = self
            .http
            .post(self.url(&path))
            .query(&[("ports", remote_port.to_string())])
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "SPDY/3.1");

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ForwardError::Platform(format!("{} failed: {}", path, e)))?;

        let status = response.status();
        if status != StatusCode::SWITCHING_PROTOCOLS {
            // The server answered instead of upgrading; keep its words.
            let body = response.text().await.unwrap_or_default();
            return Err(ForwardError::UpgradeFailed {
                status: status.as_u16(),
                body,
            });
        }

        let upgraded = response
            .upgrade()
            .await
            .map_err(|e| ForwardError::Platform(format!("upgrade handshake failed: {}", e)))?;

        Ok(Box::new(upgraded))
    }
}

fn is_ready(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };

    match &status.conditions {
        Some(conditions) => conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True"),
        None => status.phase.as_deref() == Some("Running"),
    }
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: ObjectMeta,
    status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
    phase: Option<String>,
    conditions: Option<Vec<PodCondition>>,
}

#[derive(Debug, Deserialize)]
struct PodCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct DeploymentList {
    #[serde(default)]
    items: Vec<Deployment>,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    metadata: ObjectMeta,
    status: Option<DeploymentStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentStatus {
    #[serde(default)]
    ready_replicas: u32,
}
