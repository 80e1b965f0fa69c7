//! russh client handler
//!
//! The handler's only jobs are host key acceptance and funneling
//! server-initiated `forwarded-tcpip` channels to the forwarder. Its
//! senders drop with the session task, so a closed receiver doubles as
//! the connection-lost signal.

use async_trait::async_trait;
use russh::client::{self, Msg, Session};
use russh::Channel;
use russh_keys::key::PublicKey;
use tokio::sync::mpsc;

/// A channel the server opened for a remote forward
pub(crate) struct ForwardedConnection {
    pub channel: Channel<Msg>,
    pub connected_port: u32,
}

pub(crate) struct ClientHandler {
    forwarded_tx: mpsc::Sender<ForwardedConnection>,
}

impl ClientHandler {
    pub(crate) fn new(forwarded_tx: mpsc::Sender<ForwardedConnection>) -> Self {
        Self { forwarded_tx }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept and log; forwards target hosts the operator configured
        // explicitly, the shell layer is not the trust boundary here.
        tracing::debug!(
            fingerprint = %server_public_key.fingerprint(),
            "accepting server host key"
        );
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(
            connected = %format!("{}:{}", connected_address, connected_port),
            originator = %format!("{}:{}", originator_address, originator_port),
            "server opened forwarded channel"
        );

        let _ = self
            .forwarded_tx
            .send(ForwardedConnection {
                channel,
                connected_port,
            })
            .await;

        Ok(())
    }
}
