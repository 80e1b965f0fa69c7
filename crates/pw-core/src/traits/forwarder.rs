//! The polymorphic forwarder contract

use async_trait::async_trait;

use crate::config::ForwardType;
use crate::error::ForwardError;
use crate::signal::Signal;

/// One tunnel's lifecycle: connect, signal readiness, stream, stop.
///
/// Every backend implements the same capability set so the forward
/// manager can supervise them uniformly. A forwarder is built from one
/// descriptor, runs until stopped or failed, and is then discarded; it
/// is never reused across configuration reloads.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// The configured backend type
    fn forward_type(&self) -> ForwardType;

    /// Forward name, unique within a project
    fn name(&self) -> &str;

    /// One-shot signal fired when the first tunnel session starts
    /// streaming. Waiters may arrive at any time and observe the same
    /// outcome.
    fn ready(&self) -> Signal;

    /// One-shot signal that triggers teardown. Once fired, no new
    /// session is created; in-flight resolution results are discarded.
    fn stop_handle(&self) -> Signal;

    /// Establish tunnel sessions for all currently resolvable targets
    /// and stream until stopped.
    ///
    /// Returns an error only when establishment fails in a way that
    /// leaves zero sessions active. Per-session failures while at least
    /// one sibling session is alive are logged, not returned, so a
    /// partial failure never stops working tunnels.
    async fn forward(&self) -> Result<(), ForwardError>;

    /// Fire the stop signal and tear down all sessions, releasing local
    /// ports before returning.
    async fn stop(&self);
}
