//! The agent and its connection loop
//!
//! An [`Agent`] dials the hub, performs the version handshake and
//! registration, then parks on the disconnect event. [`Agent::run`] wraps
//! that in the reconnect-forever loop: failures sleep under exponential
//! backoff, successful connects reset it.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::RwLock;

use dialback_core::{version, AgentId, SessionId};
use dialback_protocol::messages::{
    RegisterParams, RegisterResult, VersionCheckParams, VersionCheckResult,
    METHOD_AGENT_REGISTER, METHOD_VERSION_CHECK,
};
use dialback_protocol::{ws, RpcConn};

use crate::backoff::ExponentialBackoff;
use crate::handler::AgentHandler;
use crate::session::PtySession;

/// A worker endpoint that dials the hub and serves shell sessions
pub struct Agent {
    /// This agent's hub-wide identifier
    pub id: AgentId,
    /// Friendly name shown in listings
    pub name: String,
    /// Hub WebSocket URL
    server_url: String,
    /// Shared security key, if the hub requires one
    security_key: Option<String>,
    /// Shells this agent will spawn
    allowed_shells: Vec<String>,
    /// Active sessions
    sessions: RwLock<HashMap<SessionId, Arc<PtySession>>>,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        id: impl Into<AgentId>,
        name: impl Into<String>,
        server_url: impl Into<String>,
        security_key: Option<String>,
        allowed_shells: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            name: name.into(),
            server_url: server_url.into(),
            security_key,
            allowed_shells,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Whether a shell path is on the allow-list
    pub fn shell_allowed(&self, shell: &str) -> bool {
        self.allowed_shells.iter().any(|s| s == shell)
    }

    /// Register a session
    pub async fn add_session(&self, session: Arc<PtySession>) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    /// Look up a session by ID
    pub async fn get_session(&self, id: &SessionId) -> Option<Arc<PtySession>> {
        self.sessions.read().await.get(id).map(Arc::clone)
    }

    /// Remove a session. The done latch closes before the record leaves
    /// the map; returns the removed session, if any.
    pub async fn remove_session(&self, id: &SessionId) -> Option<Arc<PtySession>> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(id) {
            session.close();
        }
        sessions.remove(id)
    }

    /// Number of active sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Tear down every session. Called when the hub connection drops.
    pub async fn teardown_all(&self) {
        let drained: Vec<Arc<PtySession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            session.close();
        }
    }

    /// Open the hub connection, handshake, and block until it drops.
    ///
    /// Returns `Ok(())` on a clean disconnect and an error when the dial
    /// or handshake fails; either way all local sessions are torn down.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        tracing::info!(server = %self.server_url, "connecting to hub");

        let (sink, source) = ws::dial(
            &self.server_url,
            version::version(),
            self.security_key.as_deref(),
        )
        .await
        .context("connection error")?;

        let handler = Arc::new(AgentHandler::new(Arc::clone(self)));
        let conn = RpcConn::spawn(sink, source, handler);

        if let Err(e) = self.handshake(&conn).await {
            conn.close();
            self.teardown_all().await;
            return Err(e);
        }

        tracing::info!(agent_id = %self.id, "connected to hub");

        conn.disconnected().await;
        self.teardown_all().await;
        tracing::info!("disconnected from hub");

        Ok(())
    }

    async fn handshake(&self, conn: &RpcConn) -> Result<()> {
        let version_result: VersionCheckResult = conn
            .call(
                METHOD_VERSION_CHECK,
                &VersionCheckParams {
                    version: version::version().to_string(),
                    git_commit: version::git_commit().map(str::to_string),
                },
            )
            .await
            .context("version check failed")?;

        if !version_result.compatible {
            bail!(
                "version mismatch: {}",
                version_result.message.unwrap_or_default()
            );
        }

        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        let register_result: RegisterResult = conn
            .call(
                METHOD_AGENT_REGISTER,
                &RegisterParams {
                    agent_id: self.id.to_string(),
                    name: self.name.clone(),
                    hostname: Some(hostname),
                    platform: Some(std::env::consts::OS.to_string()),
                },
            )
            .await
            .context("registration failed")?;

        if !register_result.success {
            bail!(
                "registration rejected: {}",
                register_result.message.unwrap_or_default()
            );
        }

        tracing::info!(agent_id = %self.id, "registered with hub");
        Ok(())
    }

    /// Run forever, reconnecting after every disconnect.
    pub async fn run(self: &Arc<Self>) {
        let mut backoff = ExponentialBackoff::standard();

        loop {
            match self.connect().await {
                Ok(()) => {
                    backoff.reset();
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!("connection error: {:#}; retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialback_core::config::DEFAULT_ALLOWED_SHELLS;

    fn test_agent() -> Arc<Agent> {
        Agent::new(
            "A1",
            "test",
            "ws://localhost:0/ws",
            None,
            DEFAULT_ALLOWED_SHELLS.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_default_allow_list() {
        let agent = test_agent();
        assert!(agent.shell_allowed("/bin/bash"));
        assert!(agent.shell_allowed("/bin/sh"));
        assert!(agent.shell_allowed("/bin/zsh"));
        assert!(agent.shell_allowed("/usr/bin/fish"));
        assert!(!agent.shell_allowed("/usr/bin/python3"));
        assert!(!agent.shell_allowed("bash"));
    }

    #[tokio::test]
    async fn test_remove_session_closes_latch_first() {
        use portable_pty::{native_pty_system, CommandBuilder, PtySize};

        let agent = test_agent();

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .unwrap();
        let mut cmd = CommandBuilder::new("/bin/sh");
        cmd.env("TERM", "xterm-256color");
        let child = pair.slave.spawn_command(cmd).unwrap();
        drop(pair.slave);
        let writer = pair.master.take_writer().unwrap();
        let session = Arc::new(PtySession::new(
            SessionId::new("S1"),
            pair.master,
            writer,
            child,
        ));

        agent.add_session(Arc::clone(&session)).await;
        assert_eq!(agent.session_count().await, 1);

        let removed = agent.remove_session(&SessionId::new("S1")).await.unwrap();
        assert!(removed.is_closed());
        assert_eq!(agent.session_count().await, 0);

        // A second removal is a no-op.
        assert!(agent.remove_session(&SessionId::new("S1")).await.is_none());
    }
}
