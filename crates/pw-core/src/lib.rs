//! pw-core: Core abstractions and configuration for Portway
//!
//! This crate provides the forward descriptors, error taxonomy, one-shot
//! lifecycle signals, and the `Forwarder` trait shared by every tunnel
//! backend and by the forward manager.

pub mod config;
pub mod error;
pub mod retry;
pub mod signal;
pub mod traits;
pub mod types;

pub use error::{ConfigError, ForwardError, PwError};
pub use signal::{SessionGauge, SessionGuard, Signal};
pub use traits::Forwarder;
pub use types::{PortMapping, TargetId};
