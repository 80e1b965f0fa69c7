//! pw-proxy: Hostname routing and the local TCP relay forwarder
//!
//! The proxy router is the only state shared across forwarders: a
//! hostname→local-port table that lets tools reference a stable
//! hostname while the underlying tunnel's local port changes.

mod forwarder;
mod router;

pub use forwarder::ProxyForwarder;
pub use router::{ProxyRouter, Route};
