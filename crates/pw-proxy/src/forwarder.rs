//! Local TCP relay forwarder
//!
//! The proxy forward type terminates traffic locally: it binds the
//! configured local ports and relays accepted connections to the
//! configured destination host over plain TCP, with no remote platform
//! or shell hop involved.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use pw_core::config::{ForwardDescriptor, ForwardType};
use pw_core::error::{ConfigError, ForwardError};
use pw_core::signal::{SessionGauge, SessionGuard, Signal};
use pw_core::types::PortMapping;

use crate::router::ProxyRouter;

/// Forwarder exposing local listening ports that relay to a fixed
/// destination host
#[derive(Debug)]
pub struct ProxyForwarder {
    name: String,
    ports: Vec<PortMapping>,
    remote_host: String,
    /// Explicit destination port; each mapping's remote port otherwise
    remote_port: Option<u16>,
    route_hostname: Option<String>,
    router: Arc<ProxyRouter>,
    grace: Duration,
    ready: Signal,
    stop: Signal,
    gauge: SessionGauge,
}

impl ProxyForwarder {
    /// Build a proxy forwarder from its descriptor
    pub fn new(
        descriptor: &ForwardDescriptor,
        router: Arc<ProxyRouter>,
        grace: Duration,
    ) -> Result<Self, ConfigError> {
        if descriptor.forward_type != ForwardType::Proxy {
            return Err(ConfigError::Invalid(format!(
                "proxy forwarder cannot serve type {}",
                descriptor.forward_type
            )));
        }

        let ports = descriptor.port_mappings()?;
        if ports.is_empty() {
            return Err(ConfigError::MissingField("ports".to_string()));
        }

        let remote = descriptor
            .values
            .remote
            .as_deref()
            .or(descriptor.values.hostname.as_deref())
            .ok_or_else(|| ConfigError::MissingField("remote".to_string()))?;

        // `remote` is `host[:port]`; without an explicit port each
        // mapping relays to its own remote port.
        let (remote_host, remote_port) = match remote.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ConfigError::Invalid(format!("invalid port in remote {:?}", remote))
                })?;
                (host.to_string(), Some(port))
            }
            None => (remote.to_string(), None),
        };
        if remote_host.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "empty host in remote {:?}",
                remote
            )));
        }

        let route_hostname = descriptor
            .is_proxified()
            .then(|| descriptor.route_hostname().to_string());

        Ok(Self {
            name: descriptor.name.clone(),
            ports,
            remote_host,
            remote_port,
            route_hostname,
            router,
            grace,
            ready: Signal::new(),
            stop: Signal::new(),
            gauge: SessionGauge::new(),
        })
    }
}

#[async_trait]
impl pw_core::Forwarder for ProxyForwarder {
    fn forward_type(&self) -> ForwardType {
        ForwardType::Proxy
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
        let mut listeners = Vec::new();
        let mut last_err: Option<ForwardError> = None;

        for mapping in &self.ports {
            match TcpListener::bind(("127.0.0.1", mapping.local)).await {
                Ok(listener) => listeners.push((*mapping, listener)),
                Err(e) => {
                    tracing::warn!(
                        forward = %self.name,
                        port = mapping.local,
                        error = %e,
                        "failed to bind local port"
                    );
                    last_err = Some(e.into());
                }
            }
        }

        if listeners.is_empty() {
            return Err(last_err
                .unwrap_or_else(|| ForwardError::ConnectionLost("no local port bound".into())));
        }

        if self.ready.fire() {
            tracing::info!(forward = %self.name, remote = %self.remote_host, "proxy ready");
            if let Some(hostname) = &self.route_hostname {
                self.router
                    .bind_route(hostname.clone(), listeners[0].0.local, self.name.clone());
            }
        }

        let mut sessions = JoinSet::new();
        for (mapping, listener) in listeners {
            let dest = format!(
                "{}:{}",
                self.remote_host,
                self.remote_port.unwrap_or(mapping.remote)
            );
            sessions.spawn(serve_listener(
                self.gauge.guard(),
                listener,
                mapping,
                dest,
                self.stop.clone(),
                self.gauge.clone(),
                self.name.clone(),
            ));
        }

        while sessions.join_next().await.is_some() {}

        if self.stop.is_fired() {
            Ok(())
        } else {
            Err(ForwardError::ConnectionLost(
                "all proxy listeners exited".into(),
            ))
        }
    }

    async fn stop(&self) {
        self.stop.fire();
        if tokio::time::timeout(self.grace, self.gauge.idle())
            .await
            .is_err()
        {
            tracing::warn!(forward = %self.name, "proxy sessions did not drain within grace period");
        }
        if let Some(hostname) = &self.route_hostname {
            self.router.remove_route(hostname);
        }
        self.router.remove_owner(&self.name);
    }
}

/// Accept loop for one local port
async fn serve_listener(
    guard: SessionGuard,
    listener: TcpListener,
    mapping: PortMapping,
    dest: String,
    stop: Signal,
    gauge: SessionGauge,
    name: String,
) {
    let _guard = guard;

    loop {
        tokio::select! {
            _ = stop.fired() => {
                tracing::debug!(forward = %name, port = mapping.local, "proxy listener closed");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((inbound, peer)) => {
                    tracing::debug!(forward = %name, %peer, "accepted proxy connection");
                    tokio::spawn(relay(gauge.guard(), inbound, dest.clone(), stop.clone(), name.clone()));
                }
                Err(e) => {
                    tracing::warn!(forward = %name, error = %e, "accept failed, closing listener");
                    return;
                }
            }
        }
    }
}

/// Stream one accepted connection to the destination
async fn relay(guard: SessionGuard, mut inbound: TcpStream, dest: String, stop: Signal, name: String) {
    let _guard = guard;

    let mut outbound = match TcpStream::connect(&dest).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(forward = %name, %dest, error = %e, "failed to reach destination");
            return;
        }
    };

    tokio::select! {
        _ = stop.fired() => {}
        result = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => {
            if let Err(e) = result {
                tracing::debug!(forward = %name, %dest, error = %e, "relay closed with error");
            }
        }
    }
}
