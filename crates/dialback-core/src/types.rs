//! Core domain types

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Unique identifier for a connected agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    /// Create a new agent ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for an interactive session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One-shot completion signal for a session.
///
/// Transition from open to closed is one-way. Concurrent teardown paths may
/// all call [`DoneLatch::close`]; the compare-and-swap guarantees exactly one
/// of them observes `true`. Tasks waiting on [`DoneLatch::cancelled`] are
/// released as soon as the latch closes.
#[derive(Debug, Default)]
pub struct DoneLatch {
    closed: AtomicBool,
    token: CancellationToken,
}

impl DoneLatch {
    /// Create a new open latch
    pub fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    /// Close the latch. Returns `true` only for the call that performed
    /// the open → closed transition.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.token.cancel();
            true
        } else {
            false
        }
    }

    /// Whether the latch has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until the latch closes. Resolves immediately if already closed.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_agent_id_roundtrip() {
        let id = AgentId::new("laptop-home");
        assert_eq!(id.as_str(), "laptop-home");
        assert_eq!(format!("{}", id), "laptop-home");
        assert_eq!(AgentId::from("laptop-home"), id);
    }

    #[test]
    fn test_latch_closes_once() {
        let latch = DoneLatch::new();
        assert!(!latch.is_closed());
        assert!(latch.close());
        assert!(latch.is_closed());
        assert!(!latch.close());
    }

    #[tokio::test]
    async fn test_latch_releases_waiters() {
        let latch = Arc::new(DoneLatch::new());

        let waiter = {
            let latch = Arc::clone(&latch);
            tokio::spawn(async move {
                latch.cancelled().await;
            })
        };

        latch.close();
        waiter.await.unwrap();

        // Waiting on an already-closed latch resolves immediately.
        latch.cancelled().await;
    }

    #[test]
    fn test_latch_concurrent_close_exactly_once() {
        let latch = Arc::new(DoneLatch::new());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let latch = Arc::clone(&latch);
            handles.push(std::thread::spawn(move || latch.close()));
        }

        let transitions: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(transitions, 1, "exactly one closer must win");
        assert!(latch.is_closed());
    }
}
