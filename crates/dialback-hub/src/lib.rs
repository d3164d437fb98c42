//! The dialback hub
//!
//! A pure relay. Agents dial in and register; clients dial in and ask for
//! sessions, listings or file transfers against a named agent. The hub
//! owns the agent directory and the session table, forwards every
//! session-scoped message between its two endpoints, and holds no payload
//! state of its own.

pub mod directory;
pub mod handler;
pub mod record;
pub mod server;

pub use directory::Directory;
pub use record::{AgentRecord, HubSession};
pub use server::HubServer;
