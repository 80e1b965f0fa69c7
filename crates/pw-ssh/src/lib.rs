//! SSH tunnel forwarders
//!
//! Implements the `ssh` and `ssh-remote` forward types over `russh`.
//! `ssh` binds local ports and carries each accepted connection over a
//! `direct-tcpip` channel; `ssh-remote` requests remote forwarding and
//! pipes server-initiated channels back to a local port.

mod endpoint;
mod forwarder;
mod handler;

pub use endpoint::SshEndpoint;
pub use forwarder::SshForwarder;
