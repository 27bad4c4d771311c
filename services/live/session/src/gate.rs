//! Single-fire handshake gate.

use std::sync::Arc;
use tokio::sync::watch;

use crate::error::SetupError;

#[derive(Debug, Clone)]
enum GateState {
    Pending,
    Open,
    Failed(SetupError),
}

/// Resolved exactly once per connection, by whoever observes the handshake
/// outcome first; awaited by any number of consumers
#[derive(Debug, Clone)]
pub struct HandshakeGate {
    state: Arc<watch::Sender<GateState>>,
}

impl Default for HandshakeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeGate {
    /// Create a pending gate
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Pending);
        Self {
            state: Arc::new(state),
        }
    }

    /// Open the gate; returns false if it was already resolved
    pub fn open(&self) -> bool {
        self.resolve(GateState::Open)
    }

    /// Fail the gate; returns false if it was already resolved
    pub fn fail(&self, error: SetupError) -> bool {
        self.resolve(GateState::Failed(error))
    }

    /// Whether neither `open` nor `fail` has happened yet
    pub fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), GateState::Pending)
    }

    /// Wait until the gate resolves
    pub async fn wait(&self) -> Result<(), SetupError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, GateState::Pending))
            .await
            .map_err(|_| SetupError::Cancelled)?;

        match &*state {
            GateState::Failed(error) => Err(error.clone()),
            _ => Ok(()),
        }
    }

    fn resolve(&self, next: GateState) -> bool {
        // The check and the write happen under the watch lock
        self.state.send_if_modified(|state| {
            if matches!(state, GateState::Pending) {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolves_exactly_once() {
        let gate = HandshakeGate::new();
        assert!(gate.is_pending());

        assert!(gate.open());
        assert!(!gate.open());
        assert!(!gate.fail(SetupError::Cancelled));

        assert!(!gate.is_pending());
        assert_eq!(gate.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let gate = HandshakeGate::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(gate.fail(SetupError::Cancelled));

        for waiter in waiters {
            let result = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(result, Err(SetupError::Cancelled));
        }
    }

    #[tokio::test]
    async fn test_wait_after_resolution_returns_immediately() {
        let gate = HandshakeGate::new();
        gate.fail(SetupError::Cancelled);
        assert!(!gate.open());
        assert_eq!(gate.wait().await, Err(SetupError::Cancelled));
    }
}
