//! Core types shared across the dialback crates
//!
//! This crate holds the domain identifiers, the error taxonomy, the YAML
//! configuration loader and the version string. It deliberately has no
//! knowledge of the wire protocol or any transport.

pub mod config;
pub mod error;
pub mod types;
pub mod version;

pub use error::{ConfigError, ConnectionError, DialbackError, SessionError};
pub use types::{AgentId, DoneLatch, SessionId};
