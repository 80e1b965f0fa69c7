//! pw-manager: Forwarder construction and lifecycle supervision
//!
//! The factory turns forward descriptors into runtime forwarders; the
//! manager owns the resulting set, runs each `forward` loop as an
//! independent task, exposes readiness, and tears everything down with
//! bounded grace on stop.

mod factory;
mod manager;

pub use factory::{build_forwarder, EngineSettings};
pub use manager::ForwardManager;
