//! Object stream abstraction
//!
//! The RPC layer is written against one-JSON-object-per-frame semantics,
//! not against a concrete WebSocket type. The hub accepts sockets through
//! axum while agents and clients dial out through tokio-tungstenite; each
//! side adapts its socket halves to these two traits.

use async_trait::async_trait;

use crate::error::ProtocolError;

/// Write half of an object stream.
///
/// Implementations do not need to serialize concurrent callers; the RPC
/// connection funnels every outbound object through a single writer task.
#[async_trait]
pub trait ObjectSink: Send + 'static {
    /// Send one JSON object as a single text frame
    async fn send(&mut self, text: String) -> Result<(), ProtocolError>;

    /// Close the stream. Best-effort; errors are swallowed.
    async fn close(&mut self);
}

/// Read half of an object stream
#[async_trait]
pub trait ObjectSource: Send + 'static {
    /// Receive the next JSON object.
    ///
    /// Returns `None` on clean close; control frames are handled internally
    /// and never surface here.
    async fn recv(&mut self) -> Option<Result<String, ProtocolError>>;
}

/// Write half of an in-memory object stream
pub struct MemorySink(tokio::sync::mpsc::UnboundedSender<String>);

/// Read half of an in-memory object stream
pub struct MemorySource(tokio::sync::mpsc::UnboundedReceiver<String>);

#[async_trait]
impl ObjectSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), ProtocolError> {
        self.0.send(text).map_err(|_| ProtocolError::Disconnected)
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl ObjectSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<String, ProtocolError>> {
        self.0.recv().await.map(Ok)
    }
}

/// Build two connected in-memory stream endpoints.
///
/// Everything sent on the first endpoint's sink arrives at the second
/// endpoint's source and vice versa. Used by tests that exercise protocol
/// and handler logic without a socket.
pub fn memory_pair() -> ((MemorySink, MemorySource), (MemorySink, MemorySource)) {
    let (a_tx, a_rx) = tokio::sync::mpsc::unbounded_channel();
    let (b_tx, b_rx) = tokio::sync::mpsc::unbounded_channel();
    (
        (MemorySink(a_tx), MemorySource(b_rx)),
        (MemorySink(b_tx), MemorySource(a_rx)),
    )
}
