//! One-shot lifecycle signals
//!
//! A `Signal` is a monotonic flag: it only ever transitions unset→set,
//! and it notifies every waiter exactly once no matter when they start
//! waiting. Forwarders expose two of these (ready and stop) so that the
//! process supervisor can gate application startup on tunnel readiness
//! and trigger teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A one-shot, monotonic broadcast signal
///
/// Cloning yields a handle to the same signal. `fire` is idempotent;
/// only the first call reports the unset→set transition.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    fired: Arc<AtomicBool>,
    token: CancellationToken,
}

impl Signal {
    /// Create a new unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal, waking all current and future waiters.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn fire(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::SeqCst);
        self.token.cancel();
        first
    }

    /// Whether the signal has been set
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Wait until the signal is set. Returns immediately if it already is.
    pub async fn fired(&self) {
        self.token.cancelled().await;
    }
}

/// Counts live sessions owned by a forwarder so `stop` can wait for
/// their teardown (and the release of their local ports) to complete.
#[derive(Debug, Clone)]
pub struct SessionGauge {
    tx: watch::Sender<usize>,
}

impl Default for SessionGauge {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGauge {
    /// Create a gauge with no live sessions
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Register one live session. The returned guard decrements the
    /// gauge when dropped; hold it for the lifetime of the session task.
    pub fn guard(&self) -> SessionGuard {
        self.tx.send_modify(|c| *c += 1);
        SessionGuard {
            tx: self.tx.clone(),
        }
    }

    /// Number of live sessions
    pub fn count(&self) -> usize {
        *self.tx.borrow()
    }

    /// Wait until every session guard has been dropped
    pub async fn idle(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for checks the current value first, so an already-idle
        // gauge returns immediately
        let _ = rx.wait_for(|&c| c == 0).await;
    }
}

/// Drop guard registered for one live session
#[derive(Debug)]
pub struct SessionGuard {
    tx: watch::Sender<usize>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.tx.send_modify(|c| *c -= 1);
    }
}
