//! Session bootstrap gate
//!
//! A single-use hand-off between the session controller, which learns the
//! outcome of an attempt asynchronously, and the caller waiting for it. The
//! opener side releases the gate at most once; every later attempt to open it
//! is ignored.

use peerview_core::PeerViewError;
use std::num::NonZeroU64;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Identifier of an established peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(NonZeroU64);

impl ConnectionHandle {
    /// Wrap a native handle; zero means "no connection"
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Raw native value
    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection#{}", self.0)
    }
}

/// How a session attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The peer connection is open
    Connected(ConnectionHandle),
    /// The attempt failed or was closed first
    Failed(String),
}

impl ConnectionOutcome {
    /// Raw form: the native handle, or -1 on failure
    pub fn as_raw(&self) -> i64 {
        match self {
            ConnectionOutcome::Connected(handle) => i64::try_from(handle.get()).unwrap_or(i64::MAX),
            ConnectionOutcome::Failed(_) => -1,
        }
    }

    /// Whether a connection was established
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionOutcome::Connected(_))
    }

    /// The handle, if connected
    pub fn handle(&self) -> Option<ConnectionHandle> {
        match self {
            ConnectionOutcome::Connected(handle) => Some(*handle),
            ConnectionOutcome::Failed(_) => None,
        }
    }
}

/// Create a connected opener/waiter pair
pub fn session_gate() -> (GateOpener, GateWaiter) {
    let (tx, rx) = oneshot::channel();
    (GateOpener { tx: Some(tx) }, GateWaiter { rx })
}

/// Releasing side of the gate
#[derive(Debug)]
pub struct GateOpener {
    tx: Option<oneshot::Sender<ConnectionOutcome>>,
}

impl GateOpener {
    /// Release the gate; returns `false` if it was already released
    pub fn open(&mut self, outcome: ConnectionOutcome) -> bool {
        match self.tx.take() {
            Some(tx) => {
                debug!("Opening session gate: {:?}", outcome);
                if tx.send(outcome).is_err() {
                    debug!("Session gate waiter is gone");
                }
                true
            }
            None => {
                warn!("Session gate already opened, ignoring {:?}", outcome);
                false
            }
        }
    }

    /// Whether the gate is still closed
    pub fn is_pending(&self) -> bool {
        self.tx.is_some()
    }
}

/// Waiting side of the gate
#[derive(Debug)]
pub struct GateWaiter {
    rx: oneshot::Receiver<ConnectionOutcome>,
}

impl GateWaiter {
    /// Wait for the outcome
    ///
    /// An opener dropped without releasing the gate counts as a failure.
    pub async fn wait(self) -> ConnectionOutcome {
        self.rx.await.unwrap_or_else(|_| Self::abandoned())
    }

    /// Wait for the outcome, at most `duration`
    pub async fn wait_timeout(self, duration: Duration) -> Result<ConnectionOutcome, PeerViewError> {
        tokio::time::timeout(duration, self.wait())
            .await
            .map_err(|_| PeerViewError::Timeout {
                operation: "peer session start".to_string(),
                duration,
            })
    }

    /// Block the current thread until the outcome is known
    ///
    /// Must not be called from an async context or from the thread that
    /// delivers peer connection callbacks.
    pub fn wait_blocking(self) -> ConnectionOutcome {
        self.rx.blocking_recv().unwrap_or_else(|_| Self::abandoned())
    }

    fn abandoned() -> ConnectionOutcome {
        ConnectionOutcome::Failed("session dropped before completion".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn test_gate_opens_once() {
        let (mut opener, waiter) = session_gate();
        let mut wait = task::spawn(waiter.wait());
        assert_pending!(wait.poll());

        let handle = ConnectionHandle::new(42).unwrap();
        assert!(opener.open(ConnectionOutcome::Connected(handle)));
        assert!(!opener.open(ConnectionOutcome::Failed("late".to_string())));
        assert!(!opener.is_pending());

        assert!(wait.is_woken());
        assert_ready_eq!(wait.poll(), ConnectionOutcome::Connected(handle));
    }

    #[test]
    fn test_dropped_opener_fails_waiter() {
        let (opener, waiter) = session_gate();
        drop(opener);
        let outcome = waiter.wait_blocking();
        assert_eq!(outcome.as_raw(), -1);
        assert!(!outcome.is_connected());
    }

    #[test]
    fn test_zero_handle_is_rejected() {
        assert!(ConnectionHandle::new(0).is_none());
        let outcome = ConnectionOutcome::Connected(ConnectionHandle::new(7).unwrap());
        assert_eq!(outcome.as_raw(), 7);
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let (_opener, waiter) = session_gate();
        let err = waiter
            .wait_timeout(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "TIMEOUT");
    }
}
