//! Message catalogue
//!
//! Twelve methods cover the whole system: a version handshake, agent
//! registration, two listings, four session notifications and two file
//! transfer requests. Field names are stable; they are the wire contract.
//!
//! Session-scoped parameter objects carry an optional `agent_id`. Its
//! presence marks the forward direction (client → hub → agent); the hub
//! strips it before forwarding. Its absence marks the return direction
//! (agent → hub → client).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Compatibility handshake (agent → hub, request)
pub const METHOD_VERSION_CHECK: &str = "version.check";
/// Claim an agent id and name (agent → hub, request)
pub const METHOD_AGENT_REGISTER: &str = "agent.register";
/// Enumerate connected agents (client → hub, request)
pub const METHOD_AGENT_LIST: &str = "agent.list";
/// Enumerate all active sessions (client → hub, request)
pub const METHOD_SESSION_LIST: &str = "session.list";
/// Begin an interactive session (notification)
pub const METHOD_SESSION_START: &str = "session.start";
/// One chunk of terminal I/O (notification, both directions)
pub const METHOD_SESSION_DATA: &str = "session.data";
/// Terminate a session (notification, either direction)
pub const METHOD_SESSION_STOP: &str = "session.stop";
/// Update the PTY window size (notification)
pub const METHOD_SESSION_RESIZE: &str = "session.resize";
/// Fetch file bytes from an agent (request)
pub const METHOD_FILE_DOWNLOAD: &str = "file.download";
/// Store file bytes on an agent (request)
pub const METHOD_FILE_UPLOAD: &str = "file.upload";

/// Encode a terminal I/O chunk for the `payload` field.
///
/// PTY output is raw bytes and may split multibyte sequences across chunks,
/// so the JSON string carries base64 to keep the byte stream exact.
pub fn encode_payload(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode the `payload` field back into raw bytes
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(payload)
}

/// Parameters for `version.check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCheckParams {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
}

/// Result of `version.check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCheckResult {
    pub compatible: bool,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Parameters for `agent.register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterParams {
    pub agent_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// Result of `agent.register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Parameters for `agent.list` (none)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAgentsParams {}

/// One connected agent in a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub session_count: usize,
}

/// Result of `agent.list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAgentsResult {
    pub agents: Vec<AgentInfo>,
    pub count: usize,
}

/// Parameters for `session.list` (none)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSessionsParams {}

/// One active session in a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub agent_id: String,
}

/// Result of `session.list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSessionsResult {
    pub sessions: Vec<SessionInfo>,
    pub count: usize,
}

/// Parameters for `session.start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

/// Parameters for `session.data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDataParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub session_id: String,
    /// Base64-encoded chunk of terminal bytes
    pub payload: String,
}

/// Parameters for `session.stop`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStopParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub session_id: String,
}

/// Parameters for `session.resize`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResizeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub session_id: String,
    pub rows: u16,
    pub cols: u16,
}

/// Parameters for `file.download`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDownloadParams {
    pub agent_id: String,
    pub remote_path: String,
}

/// Result of `file.download`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDownloadResult {
    pub success: bool,
    pub filename: String,
    /// Base64-encoded file content
    pub content: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileDownloadResult {
    /// A failed download carrying only an error message
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            filename: String::new(),
            content: String::new(),
            size: 0,
            error: Some(error.into()),
        }
    }
}

/// Parameters for `file.upload`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadParams {
    pub agent_id: String,
    pub remote_path: String,
    /// Base64-encoded file content
    pub content: String,
    /// File permissions; zero means the default (0644)
    #[serde(default)]
    pub mode: u32,
}

/// Result of `file.upload`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadResult {
    pub success: bool,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileUploadResult {
    /// A failed upload carrying only an error message
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            size: 0,
            error: Some(error.into()),
        }
    }
}
