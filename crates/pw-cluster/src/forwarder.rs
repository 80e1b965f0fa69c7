//! Cluster pod forwarder
//!
//! One forwarder per descriptor. `forward` resolves targets with a
//! bounded retry window, opens one tunnel session per (pod, port
//! mapping), and keeps sessions independent: a refused upgrade on one
//! pod never stops a streaming session on another. Losing every
//! session triggers re-resolution, since on this backend a dropped
//! transport usually means the target departed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use pw_core::config::{ForwardDescriptor, ForwardType};
use pw_core::error::{ConfigError, ForwardError};
use pw_core::retry::{ExponentialBackoff, RetryConfig, RetryWindow};
use pw_core::signal::{SessionGauge, SessionGuard, Signal};
use pw_core::types::{PortMapping, SessionState, TargetId};
use pw_proxy::ProxyRouter;

use crate::client::ClusterClient;
use crate::http::HttpClusterClient;
use crate::provider::ConnectionProvider;
use crate::selector::{build_selector, resolve_targets};

enum ClientSource {
    /// Production wiring: endpoint acquired per the variant's provider
    Provider(Arc<dyn ConnectionProvider>),
    /// Injected client, used by tests
    Injected(Arc<dyn ClusterClient>),
}

/// Forwarder for the `kubernetes` and `kubernetes-remote` types
pub struct ClusterForwarder {
    forward_type: ForwardType,
    name: String,
    context: Option<String>,
    namespace: String,
    ports: Vec<PortMapping>,
    labels: HashMap<String, String>,
    retry: RetryConfig,
    grace: Duration,
    source: ClientSource,
    route_hostname: Option<String>,
    router: Arc<ProxyRouter>,
    ready: Signal,
    stop: Signal,
    gauge: SessionGauge,
}

impl ClusterForwarder {
    /// Build a forwarder whose cluster endpoint comes from the given
    /// provider (local credentials or gateway indirection)
    pub fn new(
        descriptor: &ForwardDescriptor,
        provider: Arc<dyn ConnectionProvider>,
        router: Arc<ProxyRouter>,
        retry: RetryConfig,
        grace: Duration,
    ) -> Result<Self, ConfigError> {
        Self::build(descriptor, ClientSource::Provider(provider), router, retry, grace)
    }

    /// Build a forwarder around an already-constructed cluster client
    pub fn with_client(
        descriptor: &ForwardDescriptor,
        client: Arc<dyn ClusterClient>,
        router: Arc<ProxyRouter>,
        retry: RetryConfig,
        grace: Duration,
    ) -> Result<Self, ConfigError> {
        Self::build(descriptor, ClientSource::Injected(client), router, retry, grace)
    }

    fn build(
        descriptor: &ForwardDescriptor,
        source: ClientSource,
        router: Arc<ProxyRouter>,
        retry: RetryConfig,
        grace: Duration,
    ) -> Result<Self, ConfigError> {
        if !matches!(
            descriptor.forward_type,
            ForwardType::Kubernetes | ForwardType::KubernetesRemote
        ) {
            return Err(ConfigError::Invalid(format!(
                "cluster forwarder cannot serve type {}",
                descriptor.forward_type
            )));
        }

        let ports = descriptor.port_mappings()?;
        if ports.is_empty() {
            return Err(ConfigError::MissingField("ports".to_string()));
        }

        let route_hostname = descriptor
            .is_proxified()
            .then(|| descriptor.route_hostname().to_string());

        Ok(Self {
            forward_type: descriptor.forward_type,
            name: descriptor.name.clone(),
            context: descriptor.values.context.clone(),
            namespace: descriptor.namespace().to_string(),
            ports,
            labels: descriptor.values.labels.clone(),
            retry,
            grace,
            source,
            route_hostname,
            router,
            ready: Signal::new(),
            stop: Signal::new(),
            gauge: SessionGauge::new(),
        })
    }

    async fn client(&self) -> Result<Arc<dyn ClusterClient>, ForwardError> {
        match &self.source {
            ClientSource::Injected(client) => Ok(Arc::clone(client)),
            ClientSource::Provider(provider) => {
                let endpoint = provider.endpoint(self.context.as_deref()).await?;
                Ok(Arc::new(HttpClusterClient::new(endpoint)?))
            }
        }
    }

    /// Resolve targets, retrying retryable failures with backoff until
    /// the window elapses. Returns `None` when stop fired mid-flight;
    /// results arriving after that are discarded.
    async fn resolve_with_retry(
        &self,
        client: &dyn ClusterClient,
        selector: &str,
    ) -> Result<Option<Vec<TargetId>>, ForwardError> {
        let mut backoff = ExponentialBackoff::from_config(&self.retry);
        let window = RetryWindow::start(self.retry.window);

        loop {
            let attempt = tokio::select! {
                result = resolve_targets(client, &self.namespace, selector) => result,
                _ = self.stop.fired() => return Ok(None),
            };

            match attempt {
                Ok(targets) => return Ok(Some(targets)),
                Err(e) if e.is_retryable() && !window.expired() => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        forward = %self.name,
                        error = %e,
                        delay = ?delay,
                        "target resolution failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.stop.fired() => return Ok(None),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one session per (target, port mapping) until stop, or until
    /// every session has exited
    async fn run_sessions(
        &self,
        client: Arc<dyn ClusterClient>,
        targets: &[TargetId],
    ) -> Result<(), ForwardError> {
        let mut sessions: JoinSet<Result<(), ForwardError>> = JoinSet::new();

        for target in targets {
            for mapping in &self.ports {
                let route = self
                    .route_hostname
                    .clone()
                    .map(|hostname| (hostname, Arc::clone(&self.router)));

                sessions.spawn(run_session(
                    self.gauge.guard(),
                    Arc::clone(&client),
                    self.namespace.clone(),
                    target.clone(),
                    *mapping,
                    self.ready.clone(),
                    self.stop.clone(),
                    self.gauge.clone(),
                    self.name.clone(),
                    route,
                ));
            }
        }

        let mut last_err: Option<ForwardError> = None;
        while let Some(joined) = sessions.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(forward = %self.name, error = %e, "tunnel session ended");
                    last_err = Some(e);
                }
                Err(e) => {
                    tracing::error!(forward = %self.name, error = %e, "tunnel session task failed");
                }
            }
        }

        if self.stop.is_fired() {
            Ok(())
        } else {
            Err(last_err
                .unwrap_or_else(|| ForwardError::ConnectionLost("all tunnel sessions exited".into())))
        }
    }
}

#[async_trait]
impl pw_core::Forwarder for ClusterForwarder {
    fn forward_type(&self) -> ForwardType {
        self.forward_type
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> Signal {
        self.ready.clone()
    }

    fn stop_handle(&self) -> Signal {
        self.stop.clone()
    }

    async fn forward(&self) -> Result<(), ForwardError> {
        let client = self.client().await?;
        let selector = build_selector(&self.labels);

        let mut cycles = 0u32;
        loop {
            if self.stop.is_fired() {
                return Ok(());
            }

            let targets = match self.resolve_with_retry(client.as_ref(), &selector).await? {
                Some(targets) => targets,
                None => return Ok(()),
            };

            tracing::info!(
                forward = %self.name,
                namespace = %self.namespace,
                selector = %selector,
                targets = targets.len(),
                "resolved forwarding targets"
            );

            let outcome = self.run_sessions(Arc::clone(&client), &targets).await;

            if self.stop.is_fired() {
                return Ok(());
            }

            match outcome {
                Ok(()) => return Ok(()),
                // Nothing ever streamed: surface the failure as-is
                Err(e) if !self.ready.is_fired() => return Err(e),
                Err(e) => {
                    cycles += 1;
                    if cycles >= self.retry.max_attempts {
                        return Err(ForwardError::RetriesExhausted {
                            attempts: cycles,
                            last: e.to_string(),
                        });
                    }
                    tracing::warn!(
                        forward = %self.name,
                        error = %e,
                        "all sessions lost, re-resolving targets"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry.initial) => {}
                        _ = self.stop.fired() => return Ok(()),
                    }
                }
            }
        }
    }

    async fn stop(&self) {
        self.stop.fire();
        if tokio::time::timeout(self.grace, self.gauge.idle())
            .await
            .is_err()
        {
            tracing::warn!(
                forward = %self.name,
                "tunnel sessions did not drain within grace period"
            );
        }
        self.router.remove_owner(&self.name);
    }
}

/// One tunnel session: probe the upgrade path, expose the local port,
/// then open a fresh upgraded stream per accepted connection
#[allow(clippy::too_many_arguments)]
async fn run_session(
    guard: SessionGuard,
    client: Arc<dyn ClusterClient>,
    namespace: String,
    target: TargetId,
    mapping: PortMapping,
    ready: Signal,
    stop: Signal,
    gauge: SessionGauge,
    name: String,
    route: Option<(String, Arc<ProxyRouter>)>,
) -> Result<(), ForwardError> {
    let _guard = guard;

    let mut state = SessionState::Connecting;
    tracing::debug!(forward = %name, target = %target, state = %state, "opening tunnel session");

    // Verify the upgrade path before exposing the local port, so
    // readiness reflects a stream the platform actually accepted.
    let probe = tokio::select! {
        result = client.open_stream(&namespace, &target, mapping.remote) => result,
        _ = stop.fired() => return Ok(()),
    };
    match probe {
        Ok(stream) => drop(stream),
        Err(e) => {
            state = SessionState::Failed;
            tracing::debug!(forward = %name, target = %target, state = %state, "tunnel negotiation failed");
            return Err(e);
        }
    }

    let listener = TcpListener::bind(("127.0.0.1", mapping.local)).await?;

    state = SessionState::Streaming;
    tracing::info!(
        forward = %name,
        target = %target,
        local = mapping.local,
        remote = mapping.remote,
        state = %state,
        "tunnel session streaming"
    );

    if ready.fire() {
        if let Some((hostname, router)) = &route {
            router.bind_route(hostname.clone(), mapping.local, name.clone());
        }
    }

    loop {
        tokio::select! {
            _ = stop.fired() => {
                state = SessionState::Closed;
                tracing::debug!(forward = %name, target = %target, state = %state, "tunnel session closed");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((inbound, peer)) => {
                    tracing::debug!(forward = %name, target = %target, %peer, "accepted tunnel connection");
                    tokio::spawn(relay_connection(
                        gauge.guard(),
                        Arc::clone(&client),
                        namespace.clone(),
                        target.clone(),
                        mapping,
                        stop.clone(),
                        name.clone(),
                        inbound,
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Stream one accepted connection over its own upgraded stream
#[allow(clippy::too_many_arguments)]
async fn relay_connection(
    guard: SessionGuard,
    client: Arc<dyn ClusterClient>,
    namespace: String,
    target: TargetId,
    mapping: PortMapping,
    stop: Signal,
    name: String,
    mut inbound: TcpStream,
) {
    let _guard = guard;

    let stream = tokio::select! {
        result = client.open_stream(&namespace, &target, mapping.remote) => result,
        _ = stop.fired() => return,
    };

    let mut stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(forward = %name, target = %target, error = %e, "failed to open tunnel stream");
            return;
        }
    };

    tokio::select! {
        _ = stop.fired() => {}
        result = tokio::io::copy_bidirectional(&mut inbound, &mut stream) => {
            if let Err(e) = result {
                tracing::debug!(forward = %name, target = %target, error = %e, "tunnel stream closed with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{TunnelStream, Workload};
    use pw_core::config::ForwardValues;
    use pw_core::Forwarder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum StreamBehavior {
        Upgraded,
        Refused { status: u16, body: String },
    }

    struct FakeClusterClient {
        workloads: Vec<Workload>,
        targets: Vec<TargetId>,
        behavior: StreamBehavior,
        resolutions: AtomicUsize,
        hang_resolution: bool,
    }

    impl FakeClusterClient {
        fn with_pod(behavior: StreamBehavior) -> Self {
            Self {
                workloads: vec![Workload {
                    name: "my-test-app".to_string(),
                    ready_replicas: 1,
                }],
                targets: vec![TargetId::new("my-test-app-bd4sk")],
                behavior,
                resolutions: AtomicUsize::new(0),
                hang_resolution: false,
            }
        }

        fn empty() -> Self {
            Self {
                workloads: vec![],
                targets: vec![],
                behavior: StreamBehavior::Upgraded,
                resolutions: AtomicUsize::new(0),
                hang_resolution: false,
            }
        }
    }

    #[async_trait]
    impl ClusterClient for FakeClusterClient {
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
            self.resolutions.fetch_add(1, Ordering::SeqCst);
            if self.hang_resolution {
                std::future::pending::<()>().await;
            }
            Ok(self.targets.clone())
        }

        async fn open_stream(
            &self,
            _namespace: &str,
            _target: &TargetId,
            _remote_port: u16,
        ) -> Result<Box<dyn TunnelStream>, ForwardError> {
            match &self.behavior {
                StreamBehavior::Upgraded => {
                    let (ours, _theirs) = tokio::io::duplex(64);
                    Ok(Box::new(ours))
                }
                StreamBehavior::Refused { status, body } => Err(ForwardError::UpgradeFailed {
                    status: *status,
                    body: body.clone(),
                }),
            }
        }
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn descriptor(forward_type: ForwardType, ports: Vec<String>) -> ForwardDescriptor {
        let mut labels = HashMap::new();
        labels.insert("app".to_string(), "my-test-app".to_string());

        ForwardDescriptor {
            name: "test-forward".to_string(),
            forward_type,
            values: ForwardValues {
                context: Some("context-test".to_string()),
                namespace: Some("backend".to_string()),
                labels,
                ports,
                ..Default::default()
            },
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
            multiplier: 2.0,
            jitter: 0.0,
            window: Duration::ZERO,
            max_attempts: 2,
        }
    }

    fn forwarder_with(
        client: FakeClusterClient,
        forward_type: ForwardType,
        ports: Vec<String>,
    ) -> Arc<ClusterForwarder> {
        Arc::new(
            ClusterForwarder::with_client(
                &descriptor(forward_type, ports),
                Arc::new(client),
                Arc::new(ProxyRouter::new()),
                fast_retry(),
                Duration::from_secs(2),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_forward_type_accessor() {
        for t in [ForwardType::Kubernetes, ForwardType::KubernetesRemote] {
            let forwarder = forwarder_with(
                FakeClusterClient::with_pod(StreamBehavior::Upgraded),
                t,
                vec!["8080:8080".to_string()],
            );
            assert_eq!(forwarder.forward_type(), t);
            assert_eq!(forwarder.name(), "test-forward");
        }
    }

    #[test]
    fn test_rejects_non_cluster_types() {
        let built = ClusterForwarder::with_client(
            &descriptor(ForwardType::Proxy, vec!["8080:8080".to_string()]),
            Arc::new(FakeClusterClient::empty()),
            Arc::new(ProxyRouter::new()),
            fast_retry(),
            Duration::from_secs(1),
        );
        match built {
            Err(ConfigError::Invalid(_)) => {}
            Err(other) => panic!("expected Invalid, got {other:?}"),
            Ok(_) => panic!("proxy descriptor accepted by cluster forwarder"),
        }
    }

    #[tokio::test]
    async fn test_refused_upgrade_surfaces_response_body() {
        // Reference scenario: one matching pod in namespace "backend",
        // selector app=my-test-app, endpoint answers 200 with a plain
        // body instead of upgrading.
        let forwarder = forwarder_with(
            FakeClusterClient::with_pod(StreamBehavior::Refused {
                status: 200,
                body: "ok, port forward is asked".to_string(),
            }),
            ForwardType::Kubernetes,
            vec!["8080:8080".to_string()],
        );

        let err = forwarder.forward().await.unwrap_err();
        assert!(err.to_string().contains("ok, port forward is asked"));
        assert!(!forwarder.ready().is_fired());
    }

    #[tokio::test]
    async fn test_no_match_is_terminal() {
        let forwarder = forwarder_with(
            FakeClusterClient::empty(),
            ForwardType::Kubernetes,
            vec!["8080:8080".to_string()],
        );

        let err = forwarder.forward().await.unwrap_err();
        assert!(matches!(err, ForwardError::NoMatch { .. }));
    }

    #[tokio::test]
    async fn test_no_ready_target_escalates_after_window() {
        let mut client = FakeClusterClient::empty();
        client.workloads = vec![Workload {
            name: "my-test-app".to_string(),
            ready_replicas: 0,
        }];

        // Zero-length window: the first retryable failure escalates
        let forwarder = forwarder_with(
            client,
            ForwardType::Kubernetes,
            vec!["8080:8080".to_string()],
        );

        let err = forwarder.forward().await.unwrap_err();
        assert!(matches!(err, ForwardError::NoReadyTarget { .. }));
    }

    #[tokio::test]
    async fn test_streams_fire_ready_and_release_port_on_stop() {
        let local = free_port();
        let forwarder = forwarder_with(
            FakeClusterClient::with_pod(StreamBehavior::Upgraded),
            ForwardType::Kubernetes,
            vec![format!("{local}:8080")],
        );

        let task = {
            let forwarder = Arc::clone(&forwarder);
            tokio::spawn(async move { forwarder.forward().await })
        };

        forwarder.ready().fired().await;

        forwarder.stop().await;
        assert!(task.await.unwrap().is_ok());

        // The local port must be rebindable as soon as stop returns
        assert!(TcpListener::bind(("127.0.0.1", local)).await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_discards_inflight_resolution() {
        let mut client = FakeClusterClient::with_pod(StreamBehavior::Upgraded);
        client.hang_resolution = true;

        let forwarder = forwarder_with(
            client,
            ForwardType::Kubernetes,
            vec!["8080:8080".to_string()],
        );

        let task = {
            let forwarder = Arc::clone(&forwarder);
            tokio::spawn(async move { forwarder.forward().await })
        };

        // Give the resolution request a moment to be in flight
        tokio::time::sleep(Duration::from_millis(20)).await;
        forwarder.stop().await;

        assert!(task.await.unwrap().is_ok());
        assert!(!forwarder.ready().is_fired());
    }
}
