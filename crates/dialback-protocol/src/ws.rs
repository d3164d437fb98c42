//! Outbound WebSocket dialing
//!
//! Agents and clients connect to the hub with `X-Client-Version` and,
//! when configured, `X-Security-Key` headers on the upgrade request. The
//! hub answers 401 or 412 before upgrading when either check fails; both
//! are mapped to dedicated errors here so callers can print something
//! better than a bare HTTP status.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ProtocolError;
use crate::stream::{ObjectSink, ObjectSource};

/// Security key header name
pub const HEADER_SECURITY_KEY: &str = "X-Security-Key";
/// Client version header name
pub const HEADER_CLIENT_VERSION: &str = "X-Client-Version";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a dialed connection
pub struct DialedSink {
    sink: SplitSink<WsStream, Message>,
}

/// Read half of a dialed connection
pub struct DialedSource {
    source: SplitStream<WsStream>,
}

/// Dial the hub, presenting the version and optional security key.
///
/// `wss://` URLs negotiate TLS transparently. Returns the split halves
/// ready to hand to [`crate::RpcConn::spawn`].
pub async fn dial(
    url: &str,
    version: &str,
    security_key: Option<&str>,
) -> Result<(DialedSink, DialedSource), ProtocolError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ProtocolError::Transport(format!("invalid URL {url}: {e}")))?;

    let headers = request.headers_mut();
    headers.insert(
        HEADER_CLIENT_VERSION,
        HeaderValue::from_str(version)
            .map_err(|e| ProtocolError::Transport(format!("invalid version header: {e}")))?,
    );
    if let Some(key) = security_key {
        headers.insert(
            HEADER_SECURITY_KEY,
            HeaderValue::from_str(key)
                .map_err(|e| ProtocolError::Transport(format!("invalid security key: {e}")))?,
        );
    }

    let (stream, _response) = connect_async(request).await.map_err(map_handshake_error)?;
    let (sink, source) = stream.split();

    Ok((DialedSink { sink }, DialedSource { source }))
}

fn map_handshake_error(err: tungstenite::Error) -> ProtocolError {
    match err {
        tungstenite::Error::Http(response) => match response.status().as_u16() {
            401 => ProtocolError::Handshake("security key rejected (401)".to_string()),
            412 => ProtocolError::Handshake(
                "version mismatch: hub requires an identical client version (412)".to_string(),
            ),
            status => ProtocolError::Handshake(format!("hub answered HTTP {status}")),
        },
        other => ProtocolError::Transport(other.to_string()),
    }
}

#[async_trait]
impl ObjectSink for DialedSink {
    async fn send(&mut self, text: String) -> Result<(), ProtocolError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

#[async_trait]
impl ObjectSource for DialedSource {
    async fn recv(&mut self) -> Option<Result<String, ProtocolError>> {
        loop {
            match self.source.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Ping/pong are answered by tungstenite; binary frames are
                // not part of this protocol.
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed)
                | Err(tungstenite::Error::AlreadyClosed) => return None,
                Err(e) => return Some(Err(ProtocolError::Transport(e.to_string()))),
            }
        }
    }
}
