//! Protocol error types

use thiserror::Error;

/// Errors surfaced by the protocol layer
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON serialization or deserialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The underlying stream failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection is closed
    #[error("Connection closed")]
    Disconnected,

    /// The peer replied with a JSON-RPC error object
    #[error("Remote error {code}: {message}")]
    Remote {
        /// JSON-RPC error code
        code: i64,
        /// Human-readable message
        message: String,
    },

    /// The WebSocket handshake was rejected
    #[error("Handshake rejected: {0}")]
    Handshake(String),
}
