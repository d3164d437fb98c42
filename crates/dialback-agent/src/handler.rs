//! Hub message handlers and the PTY output pump
//!
//! `session.start` is a notification, so every failure mode in here
//! (disallowed shell, spawn failure) is logged and dropped; the client
//! observes only the absence of output. File transfers are requests and
//! always get a reply, successful or not.
//!
//! The output pump is split in two. An inner thread blocks on PTY reads
//! and hands 1 KiB chunks to a small bounded channel; an outer task
//! selects across that channel and the session's done latch. Teardown can
//! therefore proceed while a read is parked in the kernel: the outer task
//! stops waiting, the teardown path drops the PTY master, and the inner
//! thread unblocks on the read error and exits.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::FutureExt;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use dialback_core::config::DEFAULT_SHELL;
use dialback_core::SessionId;
use dialback_protocol::messages::{
    decode_payload, encode_payload, FileDownloadParams, FileDownloadResult, FileUploadParams,
    FileUploadResult, SessionDataParams, SessionResizeParams, SessionStartParams,
    SessionStopParams, METHOD_FILE_DOWNLOAD, METHOD_FILE_UPLOAD, METHOD_SESSION_DATA,
    METHOD_SESSION_RESIZE, METHOD_SESSION_START, METHOD_SESSION_STOP,
};
use dialback_protocol::{Handler, Inbound, RpcConn};

use crate::agent::Agent;
use crate::session::PtySession;

/// PTY read chunk size
const PTY_READ_CHUNK: usize = 1024;

/// Hand-off queue between the blocking PTY reader and the forwarder
const PTY_CHUNK_QUEUE: usize = 10;

/// Handles messages arriving from the hub on the agent's connection
pub struct AgentHandler {
    agent: Arc<Agent>,
}

impl AgentHandler {
    /// Create a handler for the given agent
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }

    async fn handle_session_start(&self, conn: &RpcConn, inbound: Inbound) {
        let params: SessionStartParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("error decoding session.start: {}", e);
                return;
            }
        };

        let session_id = SessionId::new(params.session_id);
        tracing::info!(%session_id, "starting session");

        let shell = params.shell.unwrap_or_else(|| DEFAULT_SHELL.to_string());
        if !self.agent.shell_allowed(&shell) {
            tracing::error!(%shell, "requested shell is not allowed");
            return;
        }

        let (master, writer, reader, child) = match spawn_shell(&shell) {
            Ok(handles) => handles,
            Err(e) => {
                tracing::error!("failed to start {}: {:#}", shell, e);
                return;
            }
        };

        let session = Arc::new(PtySession::new(session_id, master, writer, child));
        self.agent.add_session(Arc::clone(&session)).await;

        spawn_output_pump(conn.clone(), Arc::clone(&self.agent), session, reader);
    }

    async fn handle_session_data(&self, inbound: Inbound) {
        let params: SessionDataParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("error decoding session.data: {}", e);
                return;
            }
        };

        let session_id = SessionId::new(params.session_id);
        let Some(session) = self.agent.get_session(&session_id).await else {
            tracing::warn!(%session_id, "session not found");
            return;
        };

        let data = match decode_payload(&params.payload) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(%session_id, "invalid payload encoding: {}", e);
                return;
            }
        };

        // Awaited so that consecutive chunks keep their arrival order.
        match tokio::task::spawn_blocking(move || session.write(&data)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(%session_id, "error writing to pty: {}", e),
            Err(e) => tracing::error!(%session_id, "pty write task failed: {}", e),
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

        let session_id = SessionId::new(params.session_id);
        tracing::info!(%session_id, "ending session");
        self.agent.remove_session(&session_id).await;
    }

    async fn handle_session_resize(&self, inbound: Inbound) {
        let params: SessionResizeParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("error decoding session.resize: {}", e);
                return;
            }
        };

        let session_id = SessionId::new(params.session_id);
        let Some(session) = self.agent.get_session(&session_id).await else {
            return;
        };

        if let Err(e) = session.resize(params.rows, params.cols) {
            tracing::error!(%session_id, "error resizing terminal: {}", e);
        }
    }

    async fn handle_file_download(&self, conn: &RpcConn, inbound: Inbound) {
        let Some(id) = inbound.id else {
            tracing::warn!("file.download without call id");
            return;
        };

        let params: FileDownloadParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(_) => {
                let _ = conn
                    .reply(id, &FileDownloadResult::failure("invalid parameters"))
                    .await;
                return;
            }
        };

        let result = match tokio::fs::read(&params.remote_path).await {
            Ok(content) => {
                let filename = Path::new(&params.remote_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                FileDownloadResult {
                    success: true,
                    filename,
                    size: content.len() as u64,
                    content: encode_payload(&content),
                    error: None,
                }
            }
            Err(e) => FileDownloadResult::failure(e.to_string()),
        };

        if let Err(e) = conn.reply(id, &result).await {
            tracing::warn!("failed to send file download result: {}", e);
        }
    }

    async fn handle_file_upload(&self, conn: &RpcConn, inbound: Inbound) {
        let Some(id) = inbound.id else {
            tracing::warn!("file.upload without call id");
            return;
        };

        let params: FileUploadParams = match inbound.parse_params() {
            Ok(p) => p,
            Err(_) => {
                let _ = conn
                    .reply(id, &FileUploadResult::failure("invalid parameters"))
                    .await;
                return;
            }
        };

        let result = match write_upload(&params).await {
            Ok(size) => FileUploadResult {
                success: true,
                size,
                error: None,
            },
            Err(e) => FileUploadResult::failure(format!("{:#}", e)),
        };

        if let Err(e) = conn.reply(id, &result).await {
            tracing::warn!("failed to send file upload result: {}", e);
        }
    }
}

#[async_trait]
impl Handler for AgentHandler {
    async fn handle(&self, conn: &RpcConn, inbound: Inbound) {
        match inbound.method.as_str() {
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

type ShellHandles = (
    Box<dyn MasterPty + Send>,
    Box<dyn std::io::Write + Send>,
    Box<dyn Read + Send>,
    Box<dyn Child + Send + Sync>,
);

/// Spawn a shell on a fresh PTY. If any step after the spawn fails, the
/// child is killed and the PTY dropped before the error propagates.
fn spawn_shell(shell: &str) -> Result<ShellHandles> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .context("failed to open PTY")?;

    let mut cmd = CommandBuilder::new(shell);
    cmd.env("TERM", "xterm-256color");

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .with_context(|| format!("failed to spawn {shell}"))?;
    drop(pair.slave);

    let reader = match pair.master.try_clone_reader() {
        Ok(r) => r,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e).context("failed to clone PTY reader");
        }
    };

    let writer = match pair.master.take_writer() {
        Ok(w) => w,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e).context("failed to take PTY writer");
        }
    };

    Ok((pair.master, writer, reader, child))
}

/// Launch the two-task output pump for a session.
///
/// The outer task always runs teardown, even if the forwarding loop
/// panics: the session leaves the agent's map, the PTY and child are
/// closed, and one final `session.stop` goes upstream.
fn spawn_output_pump(
    conn: RpcConn,
    agent: Arc<Agent>,
    session: Arc<PtySession>,
    reader: Box<dyn Read + Send>,
) {
    let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(PTY_CHUNK_QUEUE);

    std::thread::spawn(move || {
        let mut reader = reader;
        let mut buf = [0u8; PTY_READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if chunk_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    tokio::spawn(async move {
        let pump = std::panic::AssertUnwindSafe(forward_output(&conn, &session, chunk_rx));
        if pump.catch_unwind().await.is_err() {
            tracing::error!(session_id = %session.id, "output pump panicked");
        }

        agent.remove_session(&session.id).await;

        let stop = SessionStopParams {
            agent_id: None,
            session_id: session.id.to_string(),
        };
        if let Err(e) = conn.notify(METHOD_SESSION_STOP, &stop).await {
            tracing::warn!("failed to notify session stop: {}", e);
        }

        tracing::info!(session_id = %session.id, "session ended");
    });
}

async fn forward_output(
    conn: &RpcConn,
    session: &PtySession,
    mut chunk_rx: mpsc::Receiver<Vec<u8>>,
) {
    loop {
        tokio::select! {
            maybe = chunk_rx.recv() => match maybe {
                Some(chunk) => {
                    let params = SessionDataParams {
                        agent_id: None,
                        session_id: session.id.to_string(),
                        payload: encode_payload(&chunk),
                    };
                    if let Err(e) = conn.notify(METHOD_SESSION_DATA, &params).await {
                        tracing::error!("error sending session data: {}", e);
                        break;
                    }
                }
                // The PTY reader hit EOF or a read error.
                None => break,
            },
            _ = session.done.cancelled() => break,
        }
    }
}

async fn write_upload(params: &FileUploadParams) -> Result<u64> {
    let content = decode_payload(&params.content).context("invalid base64 content")?;

    tokio::fs::write(&params.remote_path, &content)
        .await
        .with_context(|| format!("failed to write {}", params.remote_path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if params.mode > 0 { params.mode } else { 0o644 };
        tokio::fs::set_permissions(
            &params.remote_path,
            std::fs::Permissions::from_mode(mode),
        )
        .await
        .with_context(|| format!("failed to set mode on {}", params.remote_path))?;
    }

    Ok(content.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialback_core::config::DEFAULT_ALLOWED_SHELLS;
    use dialback_protocol::stream::memory_pair;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every inbound method seen on the far end of the connection.
    struct MethodRecorder {
        methods: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Handler for MethodRecorder {
        async fn handle(&self, _conn: &RpcConn, inbound: Inbound) {
            self.methods.lock().unwrap().push(inbound.method);
        }
    }

    fn wired_agent() -> (Arc<Agent>, RpcConn, RpcConn, Arc<MethodRecorder>) {
        let agent = Agent::new(
            "A1",
            "test",
            "ws://localhost:0/ws",
            None,
            DEFAULT_ALLOWED_SHELLS.iter().map(|s| s.to_string()).collect(),
        );
        let recorder = Arc::new(MethodRecorder {
            methods: Mutex::new(Vec::new()),
        });

        let ((hub_sink, hub_source), (agent_sink, agent_source)) = memory_pair();
        let agent_conn = RpcConn::spawn(
            agent_sink,
            agent_source,
            Arc::new(AgentHandler::new(Arc::clone(&agent))),
        );
        let hub_conn = RpcConn::spawn(hub_sink, hub_source, Arc::clone(&recorder) as _);

        (agent, agent_conn, hub_conn, recorder)
    }

    #[tokio::test]
    async fn test_disallowed_shell_leaves_map_unchanged() {
        let (agent, _agent_conn, hub_conn, recorder) = wired_agent();

        hub_conn
            .notify(
                METHOD_SESSION_START,
                &SessionStartParams {
                    agent_id: None,
                    session_id: "S1".into(),
                    shell: Some("/usr/bin/python3".into()),
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(agent.session_count().await, 0);
        assert!(
            recorder.methods.lock().unwrap().is_empty(),
            "a rejected start must emit no upstream traffic"
        );
    }

    #[tokio::test]
    async fn test_session_lifecycle_start_then_stop() {
        let (agent, _agent_conn, hub_conn, recorder) = wired_agent();

        hub_conn
            .notify(
                METHOD_SESSION_START,
                &SessionStartParams {
                    agent_id: None,
                    session_id: "S1".into(),
                    shell: Some("/bin/sh".into()),
                },
            )
            .await
            .unwrap();

        // Wait for the session to appear.
        tokio::time::timeout(Duration::from_secs(10), async {
            while agent.session_count().await != 1 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session never started");

        hub_conn
            .notify(
                METHOD_SESSION_STOP,
                &SessionStopParams {
                    agent_id: None,
                    session_id: "S1".into(),
                },
            )
            .await
            .unwrap();

        // The map empties and the pump reports the stop upstream.
        tokio::time::timeout(Duration::from_secs(10), async {
            while agent.session_count().await != 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session never stopped");

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if recorder
                    .methods
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|m| m == METHOD_SESSION_STOP)
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("no upstream session.stop observed");
    }

    #[tokio::test]
    async fn test_second_stop_is_a_noop() {
        let (agent, _agent_conn, hub_conn, _recorder) = wired_agent();

        hub_conn
            .notify(
                METHOD_SESSION_START,
                &SessionStartParams {
                    agent_id: None,
                    session_id: "S1".into(),
                    shell: Some("/bin/sh".into()),
                },
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            while agent.session_count().await != 1 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session never started");

        for _ in 0..2 {
            hub_conn
                .notify(
                    METHOD_SESSION_STOP,
                    &SessionStopParams {
                        agent_id: None,
                        session_id: "S1".into(),
                    },
                )
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(agent.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_file_round_trip_preserves_bytes_and_mode() {
        let (_agent, _agent_conn, hub_conn, _recorder) = wired_agent();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x");
        let path_str = path.to_str().unwrap().to_string();

        let upload: FileUploadResult = hub_conn
            .call(
                METHOD_FILE_UPLOAD,
                &FileUploadParams {
                    agent_id: "A1".into(),
                    remote_path: path_str.clone(),
                    content: encode_payload(b"hello"),
                    mode: 0o600,
                },
            )
            .await
            .unwrap();
        assert!(upload.success);
        assert_eq!(upload.size, 5);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let download: FileDownloadResult = hub_conn
            .call(
                METHOD_FILE_DOWNLOAD,
                &FileDownloadParams {
                    agent_id: "A1".into(),
                    remote_path: path_str,
                },
            )
            .await
            .unwrap();
        assert!(download.success);
        assert_eq!(download.filename, "x");
        assert_eq!(decode_payload(&download.content).unwrap(), b"hello");
        assert_eq!(download.size, 5);
    }

    #[tokio::test]
    async fn test_download_missing_file_reports_failure() {
        let (_agent, _agent_conn, hub_conn, _recorder) = wired_agent();

        let result: FileDownloadResult = hub_conn
            .call(
                METHOD_FILE_DOWNLOAD,
                &FileDownloadParams {
                    agent_id: "A1".into(),
                    remote_path: "/nonexistent/definitely/missing".into(),
                },
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
