//! Agent and session records
//!
//! One [`AgentRecord`] per registered agent, holding the channel back to
//! it and the sessions currently routed through it. One [`HubSession`]
//! per active session: the (session id, agent id, client back-reference)
//! triple is the only per-session state the hub keeps.
//!
//! The back-reference is non-owning in lifetime terms: a session never
//! keeps its client alive. When the client's transport closes, forwards
//! to it fail and the session is torn down on the next attempt.

use std::collections::HashMap;
use std::time::Instant;

use std::sync::Arc;
use tokio::sync::RwLock;

use dialback_core::{AgentId, DoneLatch, SessionId};
use dialback_protocol::RpcConn;

/// A session as the hub sees it
pub struct HubSession {
    /// Session ID, supplied by the client
    pub id: SessionId,
    /// Agent this session runs on
    pub agent_id: AgentId,
    /// Channel to the client that initiated the session (the return path)
    pub client: RpcConn,
    /// One-shot teardown signal
    pub done: DoneLatch,
}

impl HubSession {
    /// Create a session record
    pub fn new(id: SessionId, agent_id: AgentId, client: RpcConn) -> Arc<Self> {
        Arc::new(Self {
            id,
            agent_id,
            client,
            done: DoneLatch::new(),
        })
    }
}

/// A connected, registered agent
pub struct AgentRecord {
    /// Agent ID, unique across the hub
    pub id: AgentId,
    /// Friendly name
    pub name: String,
    /// Channel to the agent
    pub conn: RpcConn,
    /// When the agent registered; the eviction ordering key
    pub connected_at: Instant,
    /// Sessions currently routed through this agent
    sessions: RwLock<HashMap<SessionId, Arc<HubSession>>>,
}

impl AgentRecord {
    /// Create a record for a freshly registered agent
    pub fn new(id: AgentId, name: impl Into<String>, conn: RpcConn) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            conn,
            connected_at: Instant::now(),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Add a session to this agent
    pub async fn add_session(&self, session: Arc<HubSession>) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    /// Look up a session by ID
    pub async fn get_session(&self, id: &SessionId) -> Option<Arc<HubSession>> {
        self.sessions.read().await.get(id).map(Arc::clone)
    }

    /// Remove a session. Closes its done latch iff it was still open;
    /// returns the removed record, if any.
    pub async fn remove_session(&self, id: &SessionId) -> Option<Arc<HubSession>> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(id) {
            session.done.close();
        }
        sessions.remove(id)
    }

    /// Number of active sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of session IDs
    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Close every session latch and empty the map
    pub async fn drain_sessions(&self) {
        let mut sessions = self.sessions.write().await;
        for session in sessions.values() {
            session.done.close();
        }
        sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialback_protocol::stream::memory_pair;
    use dialback_protocol::{Handler, Inbound};

    struct NullHandler;

    #[async_trait::async_trait]
    impl Handler for NullHandler {
        async fn handle(&self, _conn: &RpcConn, _inbound: Inbound) {}
    }

    fn dummy_conn() -> RpcConn {
        let ((sink, source), _other) = memory_pair();
        RpcConn::spawn(sink, source, Arc::new(NullHandler))
    }

    #[tokio::test]
    async fn test_session_add_get_remove() {
        let record = AgentRecord::new(AgentId::new("A1"), "laptop", dummy_conn());

        let session = HubSession::new(SessionId::new("S1"), AgentId::new("A1"), dummy_conn());
        record.add_session(Arc::clone(&session)).await;

        assert_eq!(record.session_count().await, 1);
        assert!(record.get_session(&SessionId::new("S1")).await.is_some());

        let removed = record.remove_session(&SessionId::new("S1")).await.unwrap();
        assert!(removed.done.is_closed());
        assert_eq!(record.session_count().await, 0);
        assert!(record.get_session(&SessionId::new("S1")).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_twice_closes_latch_once() {
        let record = AgentRecord::new(AgentId::new("A1"), "laptop", dummy_conn());
        let session = HubSession::new(SessionId::new("S1"), AgentId::new("A1"), dummy_conn());
        record.add_session(Arc::clone(&session)).await;

        assert!(record.remove_session(&SessionId::new("S1")).await.is_some());
        assert!(record.remove_session(&SessionId::new("S1")).await.is_none());
        assert!(session.done.is_closed());
    }

    #[tokio::test]
    async fn test_concurrent_removal_has_exactly_one_winner() {
        let record = AgentRecord::new(AgentId::new("A1"), "laptop", dummy_conn());
        let session = HubSession::new(SessionId::new("S1"), AgentId::new("A1"), dummy_conn());
        record.add_session(Arc::clone(&session)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let record = Arc::clone(&record);
            handles.push(tokio::spawn(async move {
                record.remove_session(&SessionId::new("S1")).await.is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "the record must be removed exactly once");
        assert!(session.done.is_closed());
        assert_eq!(record.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_drain_closes_all_latches() {
        let record = AgentRecord::new(AgentId::new("A1"), "laptop", dummy_conn());

        let mut sessions = Vec::new();
        for i in 0..5 {
            let session = HubSession::new(
                SessionId::new(format!("S{i}")),
                AgentId::new("A1"),
                dummy_conn(),
            );
            record.add_session(Arc::clone(&session)).await;
            sessions.push(session);
        }

        record.drain_sessions().await;
        assert_eq!(record.session_count().await, 0);
        assert!(sessions.iter().all(|s| s.done.is_closed()));
    }
}
