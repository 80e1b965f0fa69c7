//! SSH tunnel forwarder
//!
//! One forwarder per descriptor, one SSH connection at a time. The
//! `ssh` type binds local listeners and opens a `direct-tcpip` channel
//! per accepted connection; `ssh-remote` requests remote forwarding and
//! connects server-opened channels back to the configured local port.
//! A dropped connection reconnects with jittered backoff up to the
//! configured attempt count.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::Disconnect;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use pw_core::config::{ForwardDescriptor, ForwardType};
use pw_core::error::{ConfigError, ForwardError};
use pw_core::retry::{ReconnectPolicy, RetryConfig};
use pw_core::signal::{SessionGauge, SessionGuard, Signal};
use pw_core::types::PortMapping;
use pw_proxy::ProxyRouter;

use crate::endpoint::SshEndpoint;
use crate::handler::{ClientHandler, ForwardedConnection};

/// Buffer for server-opened forwarded channels between the SSH handler
/// and the forwarder loop. Remote forwards arrive one connection at a
/// time, so a small buffer is plenty.
const FORWARDED_CHANNEL_CAPACITY: usize = 32;

/// Forwarder for the `ssh` and `ssh-remote` types
#[derive(Debug)]
pub struct SshForwarder {
    forward_type: ForwardType,
    name: String,
    endpoint: SshEndpoint,
    ports: Vec<PortMapping>,
    retry: RetryConfig,
    grace: Duration,
    route_hostname: Option<String>,
    router: Arc<ProxyRouter>,
    ready: Signal,
    stop: Signal,
    gauge: SessionGauge,
}

impl SshForwarder {
    /// Build an SSH forwarder from its descriptor
    pub fn new(
        descriptor: &ForwardDescriptor,
        router: Arc<ProxyRouter>,
        retry: RetryConfig,
        grace: Duration,
    ) -> Result<Self, ConfigError> {
        if !matches!(
            descriptor.forward_type,
            ForwardType::Ssh | ForwardType::SshRemote
        ) {
            return Err(ConfigError::Invalid(format!(
                "ssh forwarder cannot serve type {}",
                descriptor.forward_type
            )));
        }

        let hostname = descriptor
            .values
            .hostname
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("hostname".to_string()))?;
        let endpoint = SshEndpoint::parse(hostname, &descriptor.values.args)?;

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
            endpoint,
            ports,
            retry,
            grace,
            route_hostname,
            router,
            ready: Signal::new(),
            stop: Signal::new(),
            gauge: SessionGauge::new(),
        })
    }

    /// Connect and authenticate, producing a live session handle and
    /// the stream of server-opened forwarded channels
    async fn connect(
        &self,
    ) -> Result<(Handle<ClientHandler>, mpsc::Receiver<ForwardedConnection>), ForwardError> {
        let config = Arc::new(client::Config::default());
        let (forwarded_tx, forwarded_rx) = mpsc::channel(FORWARDED_CHANNEL_CAPACITY);
        let handler = ClientHandler::new(forwarded_tx);

        tracing::debug!(
            forward = %self.name,
            host = %self.endpoint.host,
            port = self.endpoint.port,
            "connecting"
        );
        let mut session = client::connect(config, self.endpoint.address(), handler)
            .await
            .map_err(|e| {
                ForwardError::ConnectionLost(format!(
                    "cannot reach {}:{}: {}",
                    self.endpoint.host, self.endpoint.port, e
                ))
            })?;

        let identity = self.endpoint.identity_file().ok_or_else(|| {
            ForwardError::AuthenticationFailed("no usable identity file found".to_string())
        })?;
        let key = russh_keys::load_secret_key(&identity, None).map_err(|e| {
            ForwardError::AuthenticationFailed(format!(
                "cannot load identity {}: {}",
                identity.display(),
                e
            ))
        })?;

        let authenticated = session
            .authenticate_publickey(&self.endpoint.user, Arc::new(key))
            .await
            .map_err(|e| {
                ForwardError::ConnectionLost(format!("authentication exchange failed: {}", e))
            })?;

        if !authenticated {
            return Err(ForwardError::AuthenticationFailed(format!(
                "server rejected key for user {:?}",
                self.endpoint.user
            )));
        }

        tracing::debug!(forward = %self.name, user = %self.endpoint.user, "authenticated");
        Ok((session, forwarded_rx))
    }

    /// One connection lifetime. Returns `Ok` only when stop fired.
    /// `served` is set once the connection actually carried forwards,
    /// so the reconnect budget only counts consecutive failures.
    async fn run_connection(&self, served: &mut bool) -> Result<(), ForwardError> {
        let (session, forwarded_rx) = tokio::select! {
            connected = self.connect() => connected?,
            _ = self.stop.fired() => return Ok(()),
        };

        match self.forward_type {
            ForwardType::Ssh => self.run_local(session, forwarded_rx, served).await,
            ForwardType::SshRemote => self.run_remote(session, forwarded_rx, served).await,
            // Rejected at construction
            other => Err(ForwardError::Platform(format!(
                "unsupported ssh forward type {}",
                other
            ))),
        }
    }

    /// `ssh`: local listeners feeding `direct-tcpip` channels
    async fn run_local(
        &self,
        session: Handle<ClientHandler>,
        mut forwarded_rx: mpsc::Receiver<ForwardedConnection>,
        served: &mut bool,
    ) -> Result<(), ForwardError> {
        let session = Arc::new(session);

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
        *served = true;

        if self.ready.fire() {
            tracing::info!(
                forward = %self.name,
                host = %self.endpoint.host,
                "ssh tunnel ready"
            );
            if let Some(hostname) = &self.route_hostname {
                self.router
                    .bind_route(hostname.clone(), listeners[0].0.local, self.name.clone());
            }
        }

        let mut tasks = JoinSet::new();
        for (mapping, listener) in listeners {
            tasks.spawn(serve_listener(
                self.gauge.guard(),
                listener,
                mapping,
                Arc::clone(&session),
                self.stop.clone(),
                self.gauge.clone(),
                self.name.clone(),
            ));
        }

        // The handler's sender drops when the session task dies, so a
        // closed receiver means the transport is gone.
        let outcome = loop {
            tokio::select! {
                _ = self.stop.fired() => {
                    let _ = session
                        .disconnect(Disconnect::ByApplication, "closing", "en")
                        .await;
                    break Ok(());
                }
                forwarded = forwarded_rx.recv() => match forwarded {
                    Some(_) => {
                        tracing::warn!(forward = %self.name, "dropping unrequested forwarded channel");
                    }
                    None => break Err(ForwardError::ConnectionLost("ssh transport closed".into())),
                }
            }
        };

        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        outcome
    }

    /// `ssh-remote`: remote forwarding back to the configured local port
    async fn run_remote(
        &self,
        mut session: Handle<ClientHandler>,
        mut forwarded_rx: mpsc::Receiver<ForwardedConnection>,
        served: &mut bool,
    ) -> Result<(), ForwardError> {
        for mapping in &self.ports {
            let granted = session
                .tcpip_forward("127.0.0.1", mapping.remote as u32)
                .await
                .map(|_| true)
                .map_err(|e| {
                    ForwardError::ConnectionLost(format!("remote forward request failed: {}", e))
                })?;
            if !granted {
                return Err(ForwardError::Platform(format!(
                    "server refused remote forward of port {}",
                    mapping.remote
                )));
            }
        }
        *served = true;

        if self.ready.fire() {
            tracing::info!(
                forward = %self.name,
                host = %self.endpoint.host,
                "remote forwarding established"
            );
        }

        loop {
            tokio::select! {
                _ = self.stop.fired() => {
                    let _ = session
                        .disconnect(Disconnect::ByApplication, "closing", "en")
                        .await;
                    return Ok(());
                }
                forwarded = forwarded_rx.recv() => match forwarded {
                    Some(forwarded) => {
                        let local = self.local_port_for(forwarded.connected_port);
                        tokio::spawn(relay_remote(
                            self.gauge.guard(),
                            forwarded,
                            local,
                            self.stop.clone(),
                            self.name.clone(),
                        ));
                    }
                    None => {
                        return Err(ForwardError::ConnectionLost("ssh transport closed".into()));
                    }
                }
            }
        }
    }

    /// Local destination for a server-forwarded connection
    fn local_port_for(&self, connected_port: u32) -> u16 {
        self.ports
            .iter()
            .find(|m| m.remote as u32 == connected_port)
            .map(|m| m.local)
            .unwrap_or(self.ports[0].local)
    }
}

#[async_trait]
impl pw_core::Forwarder for SshForwarder {
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
        let mut policy = ReconnectPolicy::new(self.retry.clone());

        loop {
            if self.stop.is_fired() {
                return Ok(());
            }

            let mut served = false;
            let result = self.run_connection(&mut served).await;
            if served {
                policy.record_success();
            }

            if self.stop.is_fired() {
                return Ok(());
            }

            match result {
                Ok(()) => return Ok(()),
                // Auth rejections never improve on retry
                Err(e @ ForwardError::AuthenticationFailed(_)) => return Err(e),
                Err(e) => {
                    let Some(delay) = policy.next_retry() else {
                        return Err(ForwardError::RetriesExhausted {
                            attempts: policy.attempts(),
                            last: e.to_string(),
                        });
                    };
                    tracing::warn!(
                        forward = %self.name,
                        error = %e,
                        delay = ?delay,
                        "ssh connection failed, reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
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
            tracing::warn!(forward = %self.name, "ssh sessions did not drain within grace period");
        }
        self.router.remove_owner(&self.name);
    }
}

/// Accept loop for one local port
async fn serve_listener(
    guard: SessionGuard,
    listener: TcpListener,
    mapping: PortMapping,
    session: Arc<Handle<ClientHandler>>,
    stop: Signal,
    gauge: SessionGauge,
    name: String,
) {
    let _guard = guard;

    loop {
        tokio::select! {
            _ = stop.fired() => {
                tracing::debug!(forward = %name, port = mapping.local, "ssh listener closed");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((inbound, peer)) => {
                    tracing::debug!(forward = %name, %peer, "accepted tunnel connection");
                    tokio::spawn(relay_local(
                        gauge.guard(),
                        Arc::clone(&session),
                        inbound,
                        mapping,
                        stop.clone(),
                        name.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(forward = %name, error = %e, "accept failed, closing listener");
                    return;
                }
            }
        }
    }
}

/// Carry one accepted connection over a fresh `direct-tcpip` channel
async fn relay_local(
    guard: SessionGuard,
    session: Arc<Handle<ClientHandler>>,
    mut inbound: TcpStream,
    mapping: PortMapping,
    stop: Signal,
    name: String,
) {
    let _guard = guard;

    let channel = tokio::select! {
        opened = session.channel_open_direct_tcpip(
            "127.0.0.1",
            mapping.remote as u32,
            "127.0.0.1",
            0,
        ) => opened,
        _ = stop.fired() => return,
    };

    let channel = match channel {
        Ok(channel) => channel,
        Err(e) => {
            tracing::warn!(forward = %name, error = %e, "failed to open direct-tcpip channel");
            return;
        }
    };

    let mut stream = channel.into_stream();
    tokio::select! {
        _ = stop.fired() => {}
        result = tokio::io::copy_bidirectional(&mut inbound, &mut stream) => {
            if let Err(e) = result {
                tracing::debug!(forward = %name, error = %e, "tunnel stream closed with error");
            }
        }
    }
}

/// Connect one server-forwarded channel back to the local port
async fn relay_remote(
    guard: SessionGuard,
    forwarded: ForwardedConnection,
    local_port: u16,
    stop: Signal,
    name: String,
) {
    let _guard = guard;

    let mut outbound = match TcpStream::connect(("127.0.0.1", local_port)).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(
                forward = %name,
                port = local_port,
                error = %e,
                "local destination unreachable for forwarded connection"
            );
            return;
        }
    };

    let mut stream = forwarded.channel.into_stream();
    tokio::select! {
        _ = stop.fired() => {}
        result = tokio::io::copy_bidirectional(&mut stream, &mut outbound) => {
            if let Err(e) = result {
                tracing::debug!(forward = %name, error = %e, "forwarded stream closed with error");
            }
        }
    }
}
