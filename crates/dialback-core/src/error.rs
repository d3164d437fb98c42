//! Core error types for dialback

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the dialback ecosystem
#[derive(Error, Debug)]
pub enum DialbackError {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The hub rejected the security key
    #[error("Unauthorized: security key rejected by hub")]
    Unauthorized,

    /// The hub rejected the client version
    #[error("Version mismatch: hub requires an identical client version")]
    VersionMismatch,

    /// Connection refused or failed to establish
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Connection lost mid-stream
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Target agent is not connected
    #[error("Agent not found: {0}")]
    AgentNotFound(String),
}

/// Session-related errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Session not found
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Session already torn down
    #[error("Session closed: {0}")]
    Closed(String),

    /// PTY allocation failed
    #[error("PTY allocation failed: {0}")]
    PtyAllocation(String),

    /// Requested shell is not on the allow-list
    #[error("Shell not allowed: {0}")]
    ShellNotAllowed(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// YAML parse error
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}
