//! Sticky join-outcome flags.
//!
//! Network event handlers latch `connected` or `failed`; the join worker
//! clears both before an attempt and then waits, bounded, for either one.
//! The two flags are never set together.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time;

/// Latched flag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagState {
    pub connected: bool,
    pub failed: bool,
}

impl FlagState {
    fn is_resolved(&self) -> bool {
        self.connected || self.failed
    }
}

/// Result of waiting on the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Connected,
    Failed,
    Timeout,
}

/// Shared handle to the flags.
#[derive(Debug, Clone)]
pub struct JoinFlags {
    tx: std::sync::Arc<watch::Sender<FlagState>>,
}

impl Default for JoinFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinFlags {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(FlagState::default());
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn clear(&self) {
        self.tx.send_replace(FlagState::default());
    }

    pub fn set_connected(&self) {
        self.tx.send_replace(FlagState {
            connected: true,
            failed: false,
        });
    }

    pub fn set_failed(&self) {
        self.tx.send_replace(FlagState {
            connected: false,
            failed: true,
        });
    }

    pub fn snapshot(&self) -> FlagState {
        *self.tx.borrow()
    }

    /// Put back a previously taken snapshot.
    pub fn restore(&self, state: FlagState) {
        self.tx.send_replace(state);
    }

    /// Neither flag is set: an association attempt is still in flight.
    pub fn is_mid_join(&self) -> bool {
        !self.snapshot().is_resolved()
    }

    /// Wait until either flag is set, for at most `timeout`.
    pub async fn wait(&self, timeout: Duration) -> JoinOutcome {
        let mut rx = self.tx.subscribe();
        let waited = time::timeout(timeout, async move {
            rx.wait_for(FlagState::is_resolved).await.map(|state| *state)
        })
        .await;

        match waited {
            Ok(Ok(state)) if state.connected => JoinOutcome::Connected,
            Ok(Ok(_)) => JoinOutcome::Failed,
            // The sender lives in self, so the channel cannot close here
            Ok(Err(_)) => JoinOutcome::Failed,
            Err(_) => JoinOutcome::Timeout,
        }
    }
}
