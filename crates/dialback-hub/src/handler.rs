//! Per-connection message routing
//!
//! Every inbound connection, agent or client alike, gets one
//! [`HubHandler`]. Registration, listings and the version check are
//! answered locally. Session-scoped notifications route by the presence
//! of `agent_id` in the params: present means forward direction (strip
//! it, deliver to that agent), absent means return direction (resolve the
//! session on this connection's registered agent, deliver to the client
//! back-reference). File transfers are proxied synchronously: the hub
//! calls upstream while holding the client's reply slot open and forwards
//! whichever result it gets.
//!
//! Beyond the (session id, agent id, client back-reference) triple the
//! hub keeps no per-session state; a dropped message costs a warning, not
//! a connection.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use dialback_core::{version, AgentId, SessionId};
use dialback_protocol::messages::{
    FileDownloadParams, FileDownloadResult, FileUploadParams, FileUploadResult, ListAgentsResult,
    ListSessionsResult, RegisterParams, RegisterResult, SessionDataParams, SessionResizeParams,
    SessionStartParams, SessionStopParams, VersionCheckParams, VersionCheckResult,
    METHOD_AGENT_LIST, METHOD_AGENT_REGISTER, METHOD_FILE_DOWNLOAD, METHOD_FILE_UPLOAD,
    METHOD_SESSION_DATA, METHOD_SESSION_LIST, METHOD_SESSION_RESIZE, METHOD_SESSION_START,
    METHOD_SESSION_STOP, METHOD_VERSION_CHECK,
};
use dialback_protocol::{Handler, Inbound, RpcConn};

use crate::directory::Directory;
use crate::record::{AgentRecord, HubSession};

/// Handles all traffic on one hub connection
pub struct HubHandler {
    directory: Arc<Directory>,
    /// Set once the connection registers as an agent; never set for
    /// client connections.
    agent: OnceLock<Arc<AgentRecord>>,
}

impl HubHandler {
    /// Create a handler bound to the hub directory
    pub fn new(directory: Arc<Directory>) -> Self {
        Self {
            directory,
            agent: OnceLock::new(),
        }
    }

    /// The agent record this connection registered, if any
    pub fn registered_agent(&self) -> Option<&Arc<AgentRecord>> {
        self.agent.get()
    }

    async fn handle_version_check(&self, conn: &RpcConn, inbound: Inbound) {
        let Some(id) = inbound.id else {
            tracing::warn!("version.check without call id");
            return;
        };

        let hub_version = version::version();
        let params: VersionCheckParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("error decoding version.check: {}", e);
                let _ = conn
                    .reply(
                        id,
                        &VersionCheckResult {
                            compatible: false,
                            version: hub_version.to_string(),
                            message: Some("invalid parameters".to_string()),
                        },
                    )
                    .await;
                return;
            }
        };

        let compatible = params.version == hub_version;
        let message = if compatible {
            tracing::info!(version = hub_version, "version check passed");
            None
        } else {
            tracing::warn!(
                hub_version,
                agent_version = %params.version,
                "version mismatch detected"
            );
            Some(format!(
                "version mismatch: hub={}, agent={}",
                hub_version, params.version
            ))
        };

        let _ = conn
            .reply(
                id,
                &VersionCheckResult {
                    compatible,
                    version: hub_version.to_string(),
                    message,
                },
            )
            .await;
    }

    async fn handle_register(&self, conn: &RpcConn, inbound: Inbound) {
        let Some(id) = inbound.id else {
            tracing::warn!("agent.register without call id");
            return;
        };

        let params: RegisterParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("error decoding agent.register: {}", e);
                let _ = conn
                    .reply(
                        id,
                        &RegisterResult {
                            success: false,
                            message: Some("invalid parameters".to_string()),
                        },
                    )
                    .await;
                return;
            }
        };

        let record = AgentRecord::new(
            AgentId::new(params.agent_id.clone()),
            params.name.clone(),
            conn.clone(),
        );

        if !self.directory.add_agent(Arc::clone(&record)).await {
            tracing::error!(agent_id = %params.agent_id, "agent id already registered");
            let _ = conn
                .reply(
                    id,
                    &RegisterResult {
                        success: false,
                        message: Some("agent id already registered".to_string()),
                    },
                )
                .await;
            return;
        }

        if self.agent.set(Arc::clone(&record)).is_err() {
            // This connection already registered under another id.
            self.directory.remove_agent(&record.id).await;
            let _ = conn
                .reply(
                    id,
                    &RegisterResult {
                        success: false,
                        message: Some("connection already registered".to_string()),
                    },
                )
                .await;
            return;
        }

        tracing::info!(
            agent_id = %params.agent_id,
            name = %params.name,
            hostname = params.hostname.as_deref().unwrap_or(""),
            platform = params.platform.as_deref().unwrap_or(""),
            "agent registered"
        );

        let _ = conn
            .reply(
                id,
                &RegisterResult {
                    success: true,
                    message: Some("agent successfully registered".to_string()),
                },
            )
            .await;
    }

    async fn handle_agent_list(&self, conn: &RpcConn, inbound: Inbound) {
        let Some(id) = inbound.id else {
            return;
        };

        let agents = self.directory.snapshot_agents().await;
        let result = ListAgentsResult {
            count: agents.len(),
            agents,
        };
        let _ = conn.reply(id, &result).await;
    }

    async fn handle_session_list(&self, conn: &RpcConn, inbound: Inbound) {
        let Some(id) = inbound.id else {
            return;
        };

        let sessions = self.directory.snapshot_sessions().await;
        let result = ListSessionsResult {
            count: sessions.len(),
            sessions,
        };
        let _ = conn.reply(id, &result).await;
    }

    async fn handle_session_start(&self, conn: &RpcConn, inbound: Inbound) {
        let params: SessionStartParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("error decoding session.start: {}", e);
                return;
            }
        };

        let Some(agent_id) = non_empty(params.agent_id.as_deref()) else {
            tracing::warn!("session.start without agent_id");
            return;
        };

        let target_id = AgentId::new(agent_id);
        let Some(target) = self.directory.get_agent(&target_id).await else {
            tracing::warn!(agent_id = %target_id, "agent not found for session start");
            return;
        };

        // Register the session before forwarding so return-direction
        // traffic has somewhere to land.
        let session_id = SessionId::new(params.session_id.clone());
        let session = HubSession::new(session_id.clone(), target_id.clone(), conn.clone());
        target.add_session(session).await;

        tracing::info!(%session_id, agent_id = %target_id, "session created on hub");

        let forward = SessionStartParams {
            agent_id: None,
            session_id: params.session_id,
            shell: params.shell,
        };
        if let Err(e) = target.conn.notify(METHOD_SESSION_START, &forward).await {
            tracing::error!("error forwarding session.start to agent: {}", e);
            target.remove_session(&session_id).await;
        }
    }

    async fn handle_session_data(&self, inbound: Inbound) {
        let params: SessionDataParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("error decoding session.data: {}", e);
                return;
            }
        };

        // Forward direction: client -> hub -> agent.
        if let Some(agent_id) = non_empty(params.agent_id.as_deref()) {
            let target_id = AgentId::new(agent_id);
            let Some(target) = self.directory.get_agent(&target_id).await else {
                tracing::warn!(agent_id = %target_id, "agent not found for session data");
                return;
            };

            let forward = SessionDataParams {
                agent_id: None,
                session_id: params.session_id,
                payload: params.payload,
            };
            if let Err(e) = target.conn.notify(METHOD_SESSION_DATA, &forward).await {
                tracing::error!("error forwarding session.data to agent: {}", e);
            }
            return;
        }

        // Return direction: agent -> hub -> client.
        let Some(record) = self.agent.get() else {
            tracing::warn!("session data from an unregistered connection");
            return;
        };

        let session_id = SessionId::new(params.session_id.clone());
        let Some(session) = record.get_session(&session_id).await else {
            tracing::warn!(%session_id, "session not found for data");
            return;
        };

        let forward = SessionDataParams {
            agent_id: None,
            session_id: params.session_id,
            payload: params.payload,
        };
        if let Err(e) = session.client.notify(METHOD_SESSION_DATA, &forward).await {
            // The client is gone; the session dies with it.
            tracing::warn!(%session_id, "client unreachable, tearing down session: {}", e);
            record.remove_session(&session_id).await;
        }
    }

    async fn handle_session_stop(&self, inbound: Inbound) {
        let params: SessionStopParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("error decoding session.stop: {}", e);
                return;
            }
        };

        // Forward direction: the agent tears down locally and reports
        // back with its own stop, which is when the hub record goes away.
        if let Some(agent_id) = non_empty(params.agent_id.as_deref()) {
            let target_id = AgentId::new(agent_id);
            let Some(target) = self.directory.get_agent(&target_id).await else {
                tracing::warn!(agent_id = %target_id, "agent not found for session stop");
                return;
            };

            let forward = SessionStopParams {
                agent_id: None,
                session_id: params.session_id,
            };
            if let Err(e) = target.conn.notify(METHOD_SESSION_STOP, &forward).await {
                tracing::error!("error forwarding session.stop to agent: {}", e);
            }
            return;
        }

        // Return direction: the session ended on the agent.
        let Some(record) = self.agent.get() else {
            return;
        };

        let session_id = SessionId::new(params.session_id.clone());
        tracing::info!(%session_id, "session ended by agent");

        if let Some(session) = record.get_session(&session_id).await {
            let forward = SessionStopParams {
                agent_id: None,
                session_id: params.session_id,
            };
            if let Err(e) = session.client.notify(METHOD_SESSION_STOP, &forward).await {
                tracing::warn!(%session_id, "error notifying client of session stop: {}", e);
            }
            record.remove_session(&session_id).await;
        }
    }

    async fn handle_session_resize(&self, inbound: Inbound) {
        let params: SessionResizeParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("error decoding session.resize: {}", e);
                return;
            }
        };

        let Some(agent_id) = non_empty(params.agent_id.as_deref()) else {
            tracing::warn!("session.resize without agent_id");
            return;
        };

        let target_id = AgentId::new(agent_id);
        let Some(target) = self.directory.get_agent(&target_id).await else {
            tracing::warn!(agent_id = %target_id, "agent not found for session resize");
            return;
        };

        let forward = SessionResizeParams {
            agent_id: None,
            session_id: params.session_id,
            rows: params.rows,
            cols: params.cols,
        };
        if let Err(e) = target.conn.notify(METHOD_SESSION_RESIZE, &forward).await {
            tracing::error!("error forwarding session.resize to agent: {}", e);
        }
    }

    async fn handle_file_download(&self, conn: &RpcConn, inbound: Inbound) {
        let Some(id) = inbound.id else {
            tracing::warn!("file.download without call id");
            return;
        };

        let params: FileDownloadParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("error decoding file.download: {}", e);
                let _ = conn
                    .reply(id, &FileDownloadResult::failure("invalid parameters"))
                    .await;
                return;
            }
        };

        tracing::info!(
            agent_id = %params.agent_id,
            path = %params.remote_path,
            "routing file download request"
        );

        let Some(target) = self
            .directory
            .get_agent(&AgentId::new(params.agent_id.clone()))
            .await
        else {
            tracing::warn!(agent_id = %params.agent_id, "agent not found for file download");
            let _ = conn
                .reply(id, &FileDownloadResult::failure("agent not found"))
                .await;
            return;
        };

        let result: FileDownloadResult =
            match target.conn.call(METHOD_FILE_DOWNLOAD, &params).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("error calling agent: {}", e);
                    FileDownloadResult::failure(e.to_string())
                }
            };

        let _ = conn.reply(id, &result).await;
    }

    async fn handle_file_upload(&self, conn: &RpcConn, inbound: Inbound) {
        let Some(id) = inbound.id else {
            tracing::warn!("file.upload without call id");
            return;
        };

        let params: FileUploadParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("error decoding file.upload: {}", e);
                let _ = conn
                    .reply(id, &FileUploadResult::failure("invalid parameters"))
                    .await;
                return;
            }
        };

        tracing::info!(
            agent_id = %params.agent_id,
            path = %params.remote_path,
            "routing file upload request"
        );

        let Some(target) = self
            .directory
            .get_agent(&AgentId::new(params.agent_id.clone()))
            .await
        else {
            tracing::warn!(agent_id = %params.agent_id, "agent not found for file upload");
            let _ = conn
                .reply(id, &FileUploadResult::failure("agent not found"))
                .await;
            return;
        };

        let result: FileUploadResult = match target.conn.call(METHOD_FILE_UPLOAD, &params).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("error calling agent: {}", e);
                FileUploadResult::failure(e.to_string())
            }
        };

        let _ = conn.reply(id, &result).await;
    }
}

#[async_trait]
impl Handler for HubHandler {
    async fn handle(&self, conn: &RpcConn, inbound: Inbound) {
        match inbound.method.as_str() {
            METHOD_VERSION_CHECK => self.handle_version_check(conn, inbound).await,
            METHOD_AGENT_REGISTER => self.handle_register(conn, inbound).await,
            METHOD_AGENT_LIST => self.handle_agent_list(conn, inbound).await,
            METHOD_SESSION_LIST => self.handle_session_list(conn, inbound).await,
            METHOD_SESSION_START => self.handle_session_start(conn, inbound).await,
            METHOD_SESSION_DATA => self.handle_session_data(inbound).await,
            METHOD_SESSION_STOP => self.handle_session_stop(inbound).await,
            METHOD_SESSION_RESIZE => self.handle_session_resize(inbound).await,
            METHOD_FILE_DOWNLOAD => self.handle_file_download(conn, inbound).await,
            METHOD_FILE_UPLOAD => self.handle_file_upload(conn, inbound).await,
            other => tracing::warn!(method = other, "unknown method"),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    match value {
        Some(s) if !s.is_empty() => Some(s),
        _ => None,
    }
}
