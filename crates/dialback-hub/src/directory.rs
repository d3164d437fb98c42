//! The agent directory
//!
//! A single readers-writer lock guards the map from agent id to record.
//! Lookups and listings take the read side; registration, removal and the
//! eviction that keeps the directory under its cap all run under the
//! write side, so a listing can never observe a half-evicted directory.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use dialback_core::AgentId;
use dialback_protocol::messages::{AgentInfo, SessionInfo};
use dialback_protocol::RpcConn;

use crate::record::AgentRecord;

/// Maximum number of simultaneously connected agents
pub const MAX_AGENTS: usize = 10_000;

/// Directory of connected agents
pub struct Directory {
    agents: RwLock<HashMap<AgentId, Arc<AgentRecord>>>,
    max_agents: usize,
}

impl Directory {
    /// Create a directory with the default agent cap
    pub fn new() -> Self {
        Self::with_capacity(MAX_AGENTS)
    }

    /// Create a directory with a custom agent cap
    pub fn with_capacity(max_agents: usize) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            max_agents,
        }
    }

    /// Insert a record, evicting the oldest agent if the directory is at
    /// its cap. Returns `false` without inserting when the id is already
    /// registered; the first registration is retained.
    pub async fn add_agent(&self, record: Arc<AgentRecord>) -> bool {
        let mut agents = self.agents.write().await;

        if agents.contains_key(&record.id) {
            return false;
        }

        if agents.len() >= self.max_agents {
            let oldest = agents
                .values()
                .min_by_key(|r| r.connected_at)
                .map(|r| r.id.clone());

            if let Some(oldest_id) = oldest {
                if let Some(old) = agents.remove(&oldest_id) {
                    old.drain_sessions().await;
                    old.conn.close();
                    tracing::warn!(
                        agent_id = %oldest_id,
                        total_agents = agents.len(),
                        "evicted oldest agent: directory at capacity"
                    );
                }
            }
        }

        agents.insert(record.id.clone(), record);
        true
    }

    /// Look up an agent by id
    pub async fn get_agent(&self, id: &AgentId) -> Option<Arc<AgentRecord>> {
        self.agents.read().await.get(id).map(Arc::clone)
    }

    /// Remove an agent from the directory. The sessions inside the
    /// returned record are the caller's problem.
    pub async fn remove_agent(&self, id: &AgentId) -> Option<Arc<AgentRecord>> {
        self.agents.write().await.remove(id)
    }

    /// Snapshot of registered agent ids
    pub async fn list_agent_ids(&self) -> Vec<AgentId> {
        self.agents.read().await.keys().cloned().collect()
    }

    /// Number of registered agents
    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Snapshot for `agent.list`: each agent's lock is held only for the
    /// duration of one append, so listings stay O(agents) without
    /// blocking session mutations on unrelated agents.
    pub async fn snapshot_agents(&self) -> Vec<AgentInfo> {
        let agents = self.agents.read().await;
        let mut infos = Vec::with_capacity(agents.len());
        for record in agents.values() {
            infos.push(AgentInfo {
                id: record.id.to_string(),
                name: record.name.clone(),
                session_count: record.session_count().await,
            });
        }
        infos
    }

    /// Snapshot for `session.list`
    pub async fn snapshot_sessions(&self) -> Vec<SessionInfo> {
        let agents = self.agents.read().await;
        let mut infos = Vec::new();
        for record in agents.values() {
            for session_id in record.session_ids().await {
                infos.push(SessionInfo {
                    session_id: session_id.to_string(),
                    agent_id: record.id.to_string(),
                });
            }
        }
        infos
    }

    /// Full teardown of a disconnected agent: close every session latch,
    /// close the channel, remove the directory entry. Safe to call exactly
    /// once per agent on disconnect. The entry is removed only if it still
    /// holds this record, so cleaning up an evicted agent cannot take out
    /// a newer registration that reused the id.
    pub async fn cleanup_agent(&self, record: &Arc<AgentRecord>, conn: &RpcConn) {
        record.drain_sessions().await;
        conn.close();

        let mut agents = self.agents.write().await;
        if let Some(current) = agents.get(&record.id) {
            if Arc::ptr_eq(current, record) {
                agents.remove(&record.id);
            }
        }

        tracing::info!(agent_id = %record.id, "agent disconnected and cleaned up");
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}
