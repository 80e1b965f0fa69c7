//! Label selector construction and target resolution

use std::collections::HashMap;

use pw_core::error::ForwardError;
use pw_core::types::TargetId;

use crate::client::ClusterClient;

/// Build a deterministic selector string from a label map.
///
/// Keys are sorted lexicographically before joining as `key=value`
/// pairs, so any insertion order yields the same selector. An empty
/// map yields the empty string, which the platform treats as "no
/// filter".
pub fn build_selector(labels: &HashMap<String, String>) -> String {
    let mut pairs: Vec<_> = labels.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Resolve a scope and selector into concrete live targets.
///
/// Distinguishes two zero-target outcomes: a matching workload with no
/// ready instance yet (`NoReadyTarget`, retryable) and a selector that
/// matches nothing at all (`NoMatch`, terminal).
pub async fn resolve_targets(
    client: &dyn ClusterClient,
    namespace: &str,
    selector: &str,
) -> Result<Vec<TargetId>, ForwardError> {
    let targets = client.list_targets(namespace, selector).await?;
    if !targets.is_empty() {
        return Ok(targets);
    }

    let workloads = client.list_workloads(namespace, selector).await?;
    if workloads.is_empty() {
        return Err(ForwardError::NoMatch {
            namespace: namespace.to_string(),
            selector: selector.to_string(),
        });
    }

    Err(ForwardError::NoReadyTarget {
        namespace: namespace.to_string(),
        selector: selector.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{TunnelStream, Workload};
    use async_trait::async_trait;

    struct FakeClient {
        workloads: Vec<Workload>,
        targets: Vec<TargetId>,
    }

    #[async_trait]
    impl ClusterClient for FakeClient {
        async fn list_workloads(
            &self,
            _namespace: &str,
            _selector: &str,
        ) -> Result<Vec<Workload>, ForwardError> {
            Ok(self.workloads.clone())
        }

        async fn list_targets(
            &self,
            _namespace: &str,
            _selector: &str,
        ) -> Result<Vec<TargetId>, ForwardError> {
            Ok(self.targets.clone())
        }

        async fn open_stream(
            &self,
            _namespace: &str,
            _target: &TargetId,
            _remote_port: u16,
        ) -> Result<Box<dyn TunnelStream>, ForwardError> {
            unimplemented!("not used by resolution tests")
        }
    }

    #[test]
    fn test_build_selector_sorts_keys() {
        let mut labels = HashMap::new();
        labels.insert("tier".to_string(), "web".to_string());
        labels.insert("app".to_string(), "x".to_string());
        assert_eq!(build_selector(&labels), "app=x,tier=web");

        // Insertion order never changes the result
        let mut reordered = HashMap::new();
        reordered.insert("app".to_string(), "x".to_string());
        reordered.insert("tier".to_string(), "web".to_string());
        assert_eq!(build_selector(&reordered), build_selector(&labels));
    }

    #[test]
    fn test_build_selector_single_label() {
        let mut labels = HashMap::new();
        labels.insert("app".to_string(), "my-test-app".to_string());
        assert_eq!(build_selector(&labels), "app=my-test-app");
    }

    #[test]
    fn test_build_selector_empty_map() {
        assert_eq!(build_selector(&HashMap::new()), "");
    }

    #[tokio::test]
    async fn test_resolve_returns_live_targets() {
        let client = FakeClient {
            workloads: vec![Workload {
                name: "my-test-app".to_string(),
                ready_replicas: 1,
            }],
            targets: vec![TargetId::new("my-test-app-bd4sk")],
        };

        let targets = resolve_targets(&client, "backend", "app=my-test-app")
            .await
            .unwrap();
        assert_eq!(targets, vec![TargetId::new("my-test-app-bd4sk")]);
    }

    #[tokio::test]
    async fn test_resolve_no_match_is_terminal() {
        let client = FakeClient {
            workloads: vec![],
            targets: vec![],
        };

        let err = resolve_targets(&client, "backend", "app=missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::NoMatch { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_resolve_workload_without_instances_is_retryable() {
        let client = FakeClient {
            workloads: vec![Workload {
                name: "my-test-app".to_string(),
                ready_replicas: 0,
            }],
            targets: vec![],
        };

        let err = resolve_targets(&client, "backend", "app=my-test-app")
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::NoReadyTarget { .. }));
        assert!(err.is_retryable());
    }
}
