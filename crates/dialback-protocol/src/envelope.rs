//! JSON-RPC 2.0 envelope
//!
//! One envelope per WebSocket text frame. A `method` marks a request
//! (with `id`) or a notification (without); `result`/`error` mark a reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Protocol version string carried in every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// One wire message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Envelope {
    /// Build a request expecting a reply
    pub fn request<P: Serialize>(
        id: u64,
        method: &str,
        params: &P,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: Some(method.to_string()),
            params: Some(serde_json::to_value(params)?),
            result: None,
            error: None,
        })
    }

    /// Build a notification (no reply expected)
    pub fn notification<P: Serialize>(method: &str, params: &P) -> Result<Self, ProtocolError> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: Some(method.to_string()),
            params: Some(serde_json::to_value(params)?),
            result: None,
            error: None,
        })
    }

    /// Build a successful reply to `id`
    pub fn response<R: Serialize>(id: u64, result: &R) -> Result<Self, ProtocolError> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(serde_json::to_value(result)?),
            error: None,
        })
    }

    /// Build an error reply to `id`
    pub fn error_response(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Whether this envelope is a request or notification
    pub fn is_call(&self) -> bool {
        self.method.is_some()
    }

    /// Whether this envelope is a reply to one of our requests
    pub fn is_reply(&self) -> bool {
        self.method.is_none() && self.id.is_some()
    }
}
