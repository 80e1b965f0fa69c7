//! Capability traits shared across backends

mod forwarder;

pub use forwarder::Forwarder;
