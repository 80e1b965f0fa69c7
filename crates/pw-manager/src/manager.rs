//! Forwarder lifecycle supervision
//!
//! The manager owns the forwarder set built from one configuration.
//! Each `forward` loop runs as an independent task whose failure is
//! logged, never propagated to siblings. A manager is single-use: a
//! configuration reload builds a fresh one with fresh forwarders.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use pw_core::config::ForwardDescriptor;
use pw_core::error::ConfigError;
use pw_core::signal::Signal;
use pw_core::Forwarder;
use pw_proxy::ProxyRouter;

use crate::factory::{build_forwarder, EngineSettings};

/// Owns and supervises the forwarders of one configuration generation
pub struct ForwardManager {
    settings: EngineSettings,
    router: Arc<ProxyRouter>,
    forwarders: Vec<Arc<dyn Forwarder>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ForwardManager {
    /// Create an empty manager
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            router: Arc::new(ProxyRouter::new()),
            forwarders: Vec::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The route table shared by this manager's forwarders
    pub fn router(&self) -> Arc<ProxyRouter> {
        Arc::clone(&self.router)
    }

    /// Build and register a forwarder per descriptor.
    ///
    /// Construction failures are collected and returned; a bad
    /// descriptor never prevents its siblings from registering.
    pub fn register(&mut self, descriptors: &[ForwardDescriptor]) -> Vec<(String, ConfigError)> {
        let mut failures = Vec::new();

        for descriptor in descriptors {
            match build_forwarder(descriptor, &self.settings, Arc::clone(&self.router)) {
                Ok(forwarder) => {
                    tracing::debug!(
                        forward = %descriptor.name,
                        kind = %descriptor.forward_type,
                        "registered forwarder"
                    );
                    self.forwarders.push(forwarder);
                }
                Err(e) => {
                    tracing::error!(
                        forward = %descriptor.name,
                        error = %e,
                        "cannot build forwarder"
                    );
                    failures.push((descriptor.name.clone(), e));
                }
            }
        }

        failures
    }

    /// Registered forwarder names, in registration order
    pub fn names(&self) -> Vec<String> {
        self.forwarders
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Look up a registered forwarder by name
    pub fn forwarder(&self, name: &str) -> Option<Arc<dyn Forwarder>> {
        self.forwarders
            .iter()
            .find(|f| f.name() == name)
            .map(Arc::clone)
    }

    /// Readiness signal of a registered forwarder
    pub fn ready(&self, name: &str) -> Option<Signal> {
        self.forwarder(name).map(|f| f.ready())
    }

    /// Stop signal of a registered forwarder
    pub fn stop_handle(&self, name: &str) -> Option<Signal> {
        self.forwarder(name).map(|f| f.stop_handle())
    }

    /// Spawn every registered forwarder's forward loop
    pub async fn start_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for forwarder in &self.forwarders {
            let forwarder = Arc::clone(forwarder);
            tasks.push(tokio::spawn(async move {
                if let Err(e) = forwarder.forward().await {
                    tracing::error!(
                        forward = %forwarder.name(),
                        error = %e,
                        "forward loop ended with error"
                    );
                }
            }));
        }
    }

    /// Wait until the named forwarder is ready; `false` if unknown
    pub async fn wait_ready(&self, name: &str) -> bool {
        match self.ready(name) {
            Some(signal) => {
                signal.fired().await;
                true
            }
            None => false,
        }
    }

    /// Wait until every registered forwarder is ready, or the timeout
    /// elapses
    pub async fn wait_all_ready(&self, timeout: Duration) -> bool {
        let all = futures::future::join_all(self.forwarders.iter().map(|f| {
            let signal = f.ready();
            async move { signal.fired().await }
        }));

        tokio::time::timeout(timeout, all).await.is_ok()
    }

    /// Stop every forwarder, clear the route table, and abort any task
    /// that outlives its forwarder's grace period
    pub async fn stop_all(&self) {
        futures::future::join_all(self.forwarders.iter().map(|f| f.stop())).await;

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }

        self.router.clear();
        tracing::info!(count = self.forwarders.len(), "all forwarders stopped");
    }
}
