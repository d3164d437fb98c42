//! `dialback connect <agent-id>`: the interactive client
//!
//! The terminal goes raw for the duration of the session; every stdin
//! byte is relayed to the agent's PTY and every output chunk is written
//! straight to stdout. SIGWINCH re-sends the window size. Output is
//! buffered through a large bounded queue: when a slow terminal lets it
//! fill up, arrivals are dropped with a critical log instead of stalling
//! the hub connection.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use crossterm::terminal;
use tokio::sync::mpsc;
use uuid::Uuid;

use dialback_core::config::ConnectConfig;
use dialback_core::{version, DoneLatch};
use dialback_protocol::messages::{
    decode_payload, encode_payload, SessionDataParams, SessionResizeParams, SessionStartParams,
    SessionStopParams, METHOD_SESSION_DATA, METHOD_SESSION_RESIZE, METHOD_SESSION_START,
    METHOD_SESSION_STOP,
};
use dialback_protocol::{ws, Handler, Inbound, RpcConn};

/// Inbound session-output queue depth. When full, arrivals are dropped
/// rather than back-pressuring the hub's writer.
const OUTPUT_QUEUE: usize = 100_000;

/// Occupancy at which a warning is logged
const OUTPUT_QUEUE_WARN: usize = OUTPUT_QUEUE * 8 / 10;

/// Stdin hand-off queue between the blocking reader thread and the pump
const STDIN_QUEUE: usize = 10;

/// Upper bound on the best-effort final `session.stop`
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Clamp a terminal dimension into the range the wire format carries
fn clamp_dimension(value: u32) -> u16 {
    value.min(u16::MAX as u32) as u16
}

/// Restores the terminal on every exit path
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to set raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!("failed to restore terminal: {}", e);
        }
    }
}

/// Routes session traffic from the hub into the output queue
struct SessionHandler {
    session_id: String,
    output_tx: mpsc::Sender<Vec<u8>>,
    done: Arc<DoneLatch>,
}

#[async_trait]
impl Handler for SessionHandler {
    async fn handle(&self, _conn: &RpcConn, inbound: Inbound) {
        match inbound.method.as_str() {
            METHOD_SESSION_DATA => {
                let Ok(params) = inbound.parse_params::<SessionDataParams>() else {
                    return;
                };
                if params.session_id != self.session_id {
                    return;
                }
                let Ok(data) = decode_payload(&params.payload) else {
                    tracing::warn!("dropping output chunk with invalid encoding");
                    return;
                };

                match self.output_tx.try_send(data) {
                    Ok(()) => {
                        let used = OUTPUT_QUEUE - self.output_tx.capacity();
                        if used > OUTPUT_QUEUE_WARN {
                            tracing::warn!(
                                buffered = used,
                                capacity = OUTPUT_QUEUE,
                                "session output buffer is over 80% full"
                            );
                        }
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::error!(
                            "CRITICAL: session output buffer full ({OUTPUT_QUEUE} items), \
                             dropping data"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
            METHOD_SESSION_STOP => {
                self.done.close();
            }
            _ => {}
        }
    }
}

/// Run an interactive session against the named agent.
///
/// Returns `Ok(())` on any clean end of session, including the hub or
/// agent going away mid-session.
pub async fn run(
    config: ConnectConfig,
    agent_id: &str,
    server: Option<String>,
    security_key: Option<String>,
    shell: Option<String>,
) -> Result<()> {
    let server = server.unwrap_or(config.server);
    let security_key = security_key.or(config.security_key).filter(|k| !k.is_empty());
    let shell = shell.unwrap_or(config.shell);

    let session_id = Uuid::new_v4().to_string();

    let (sink, source) = ws::dial(&server, version::version(), security_key.as_deref())
        .await
        .context("failed to connect to hub")?;

    let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_QUEUE);
    let done = Arc::new(DoneLatch::new());

    let handler = Arc::new(SessionHandler {
        session_id: session_id.clone(),
        output_tx,
        done: Arc::clone(&done),
    });
    let conn = RpcConn::spawn(sink, source, handler);

    conn.notify(
        METHOD_SESSION_START,
        &SessionStartParams {
            agent_id: Some(agent_id.to_string()),
            session_id: session_id.clone(),
            shell: Some(shell),
        },
    )
    .await
    .context("failed to start session")?;

    println!("Connected to agent '{agent_id}' (session: {session_id})");
    println!("Press Ctrl+D or type 'exit' to disconnect\n");

    // Tell the agent how big the terminal really is before going raw.
    if let Ok((cols, rows)) = terminal::size() {
        let resize = SessionResizeParams {
            agent_id: Some(agent_id.to_string()),
            session_id: session_id.clone(),
            rows: clamp_dimension(rows as u32),
            cols: clamp_dimension(cols as u32),
        };
        if let Err(e) = conn.notify(METHOD_SESSION_RESIZE, &resize).await {
            tracing::warn!("failed to send initial terminal size: {}", e);
        }
    }

    let _raw = RawModeGuard::enable()?;

    spawn_resize_task(
        conn.clone(),
        Arc::clone(&done),
        agent_id.to_string(),
        session_id.clone(),
    );
    spawn_stdin_pump(
        conn.clone(),
        Arc::clone(&done),
        agent_id.to_string(),
        session_id.clone(),
    );

    // Main loop: agent output to stdout until the session or the
    // connection ends.
    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            maybe = output_rx.recv() => match maybe {
                Some(data) => {
                    if let Err(e) = stdout.write_all(&data).and_then(|_| stdout.flush()) {
                        tracing::warn!("failed to write to stdout: {}", e);
                    }
                }
                None => break,
            },
            _ = done.cancelled() => {
                print!("\r\nSession ended\r\n");
                break;
            }
            _ = conn.disconnected() => {
                print!("\r\nConnection lost\r\n");
                break;
            }
        }
    }

    done.close();
    conn.close();
    Ok(())
}

/// Re-send the terminal size on every SIGWINCH
fn spawn_resize_task(conn: RpcConn, done: Arc<DoneLatch>, agent_id: String, session_id: String) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut winch = match signal(SignalKind::window_change()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("failed to install SIGWINCH handler: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = winch.recv() => {
                    if let Ok((cols, rows)) = terminal::size() {
                        let resize = SessionResizeParams {
                            agent_id: Some(agent_id.clone()),
                            session_id: session_id.clone(),
                            rows: clamp_dimension(rows as u32),
                            cols: clamp_dimension(cols as u32),
                        };
                        if let Err(e) = conn.notify(METHOD_SESSION_RESIZE, &resize).await {
                            tracing::warn!("failed to send terminal resize: {}", e);
                        }
                    }
                }
                _ = done.cancelled() => break,
            }
        }
    });
}

/// Relay stdin to the agent. A dedicated thread blocks on the read; the
/// async half forwards chunks and sends one best-effort stop on exit.
fn spawn_stdin_pump(conn: RpcConn, done: Arc<DoneLatch>, agent_id: String, session_id: String) {
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(STDIN_QUEUE);

    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdin_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe = stdin_rx.recv() => match maybe {
                    Some(data) => {
                        let params = SessionDataParams {
                            agent_id: Some(agent_id.clone()),
                            session_id: session_id.clone(),
                            payload: encode_payload(&data),
                        };
                        if conn.notify(METHOD_SESSION_DATA, &params).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = done.cancelled() => break,
            }
        }

        // Best-effort stop, bounded; then release everything waiting on
        // the latch.
        let stop = SessionStopParams {
            agent_id: Some(agent_id.clone()),
            session_id: session_id.clone(),
        };
        let _ = tokio::time::timeout(STOP_TIMEOUT, conn.notify(METHOD_SESSION_STOP, &stop)).await;
        done.close();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_dimension() {
        assert_eq!(clamp_dimension(0), 0);
        assert_eq!(clamp_dimension(40), 40);
        assert_eq!(clamp_dimension(65_535), 65_535);
        assert_eq!(clamp_dimension(65_536), 65_535);
        assert_eq!(clamp_dimension(1_000_000), 65_535);
    }

    #[tokio::test]
    async fn test_full_output_queue_drops_without_corruption() {
        let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(2);
        let handler = SessionHandler {
            session_id: "S1".into(),
            output_tx,
            done: Arc::new(DoneLatch::new()),
        };

        let ((sink, source), _peer) = dialback_protocol::stream::memory_pair();
        let conn = RpcConn::spawn(sink, source, Arc::new(NoopHandler));

        for i in 0..5 {
            let inbound = Inbound {
                id: None,
                method: METHOD_SESSION_DATA.to_string(),
                params: Some(
                    serde_json::to_value(SessionDataParams {
                        agent_id: None,
                        session_id: "S1".into(),
                        payload: encode_payload(format!("{i}").as_bytes()),
                    })
                    .unwrap(),
                ),
            };
            handler.handle(&conn, inbound).await;
        }

        // The first two chunks survive in order; the overflow was dropped.
        assert_eq!(output_rx.recv().await.unwrap(), b"0");
        assert_eq!(output_rx.recv().await.unwrap(), b"1");
        assert!(output_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_foreign_session_data_is_ignored() {
        let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(8);
        let handler = SessionHandler {
            session_id: "S1".into(),
            output_tx,
            done: Arc::new(DoneLatch::new()),
        };

        let ((sink, source), _peer) = dialback_protocol::stream::memory_pair();
        let conn = RpcConn::spawn(sink, source, Arc::new(NoopHandler));

        let inbound = Inbound {
            id: None,
            method: METHOD_SESSION_DATA.to_string(),
            params: Some(
                serde_json::to_value(SessionDataParams {
                    agent_id: None,
                    session_id: "other".into(),
                    payload: encode_payload(b"nope"),
                })
                .unwrap(),
            ),
        };
        handler.handle(&conn, inbound).await;

        assert!(output_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_closes_the_latch() {
        let (output_tx, _output_rx) = mpsc::channel::<Vec<u8>>(8);
        let done = Arc::new(DoneLatch::new());
        let handler = SessionHandler {
            session_id: "S1".into(),
            output_tx,
            done: Arc::clone(&done),
        };

        let ((sink, source), _peer) = dialback_protocol::stream::memory_pair();
        let conn = RpcConn::spawn(sink, source, Arc::new(NoopHandler));

        let inbound = Inbound {
            id: None,
            method: METHOD_SESSION_STOP.to_string(),
            params: Some(
                serde_json::to_value(SessionStopParams {
                    agent_id: None,
                    session_id: "S1".into(),
                })
                .unwrap(),
            ),
        };
        handler.handle(&conn, inbound).await;
        assert!(done.is_closed());
    }

    struct NoopHandler;

    #[async_trait]
    impl Handler for NoopHandler {
        async fn handle(&self, _conn: &RpcConn, _inbound: Inbound) {}
    }
}
