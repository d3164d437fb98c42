//! HTTP/WebSocket front door
//!
//! A single `/ws` route accepts both agents and clients. The security-key
//! and client-version headers are validated *before* the upgrade: a bad
//! key is 401, a version skew is 412, and neither ever reaches the
//! message layer. TLS is optional and requires both a certificate and a
//! private key.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;

use dialback_core::version;
use dialback_protocol::ws::{HEADER_CLIENT_VERSION, HEADER_SECURITY_KEY};
use dialback_protocol::{Handler, ObjectSink, ObjectSource, ProtocolError, RpcConn};

use crate::directory::Directory;
use crate::handler::HubHandler;

/// Shared state behind the axum router
struct HubState {
    directory: Arc<Directory>,
    security_key: Option<String>,
}

/// The hub's accept side
pub struct HubServer {
    state: Arc<HubState>,
}

impl HubServer {
    /// Create a hub. A `None` security key disables authentication.
    pub fn new(security_key: Option<String>) -> Self {
        Self {
            state: Arc::new(HubState {
                directory: Arc::new(Directory::new()),
                security_key,
            }),
        }
    }

    /// The agent directory, shared with the router
    pub fn directory(&self) -> Arc<Directory> {
        Arc::clone(&self.state.directory)
    }

    /// Build the axum router serving `/ws`
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve plaintext WebSocket on an already-bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr().context("listener has no address")?;
        tracing::info!(address = %format!("ws://{addr}/ws"), "hub started");

        axum::serve(listener, self.router())
            .await
            .context("hub server failed")
    }

    /// Serve WebSocket over TLS
    pub async fn serve_tls(&self, addr: SocketAddr, cert: &Path, key: &Path) -> Result<()> {
        let config = RustlsConfig::from_pem_file(cert, key)
            .await
            .context("failed to load TLS certificate/key")?;

        tracing::info!(address = %format!("wss://{addr}/ws"), "hub started (TLS)");

        axum_server::bind_rustls(addr, config)
            .serve(self.router().into_make_service())
            .await
            .context("hub TLS server failed")
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<HubState>>,
) -> Response {
    if let Some(expected) = &state.security_key {
        let provided = headers
            .get(HEADER_SECURITY_KEY)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            tracing::warn!("unauthorized: invalid security key");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }

    let client_version = headers
        .get(HEADER_CLIENT_VERSION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if client_version != version::version() {
        tracing::warn!(
            client_version,
            hub_version = version::version(),
            "version mismatch"
        );
        return (StatusCode::PRECONDITION_FAILED, "Version mismatch").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one upgraded connection until it disconnects, then clean up any
/// agent it registered.
async fn handle_socket(socket: WebSocket, state: Arc<HubState>) {
    tracing::info!("new connection");

    let (sink, source) = socket.split();
    let handler = Arc::new(HubHandler::new(Arc::clone(&state.directory)));
    let conn = RpcConn::spawn(
        AcceptedSink(sink),
        AcceptedSource(source),
        Arc::clone(&handler) as Arc<dyn Handler>,
    );

    conn.disconnected().await;

    if let Some(record) = handler.registered_agent() {
        state.directory.cleanup_agent(record, &conn).await;
    } else {
        tracing::info!("connection closed");
    }
}

/// Write half of an accepted connection
struct AcceptedSink(SplitSink<WebSocket, Message>);

/// Read half of an accepted connection
struct AcceptedSource(SplitStream<WebSocket>);

#[async_trait]
impl ObjectSink for AcceptedSink {
    async fn send(&mut self, text: String) -> Result<(), ProtocolError> {
        self.0
            .send(Message::Text(text))
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.send(Message::Close(None)).await;
        let _ = self.0.close().await;
    }
}

#[async_trait]
impl ObjectSource for AcceptedSource {
    async fn recv(&mut self) -> Option<Result<String, ProtocolError>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(ProtocolError::Transport(e.to_string()))),
            }
        }
    }
}
