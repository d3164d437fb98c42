//! Wire protocol for the dialback hub, agent and client
//!
//! Every connection carries a single bidirectional stream of JSON-RPC 2.0
//! objects, one per WebSocket text frame. This crate defines the message
//! catalogue ([`messages`]), the envelope ([`envelope`]), the connection
//! abstraction with request/reply and notification support ([`conn`]), and
//! the client-side WebSocket dialer ([`ws`]).

pub mod conn;
pub mod envelope;
pub mod error;
pub mod messages;
pub mod stream;
pub mod ws;

pub use conn::{Handler, Inbound, RpcConn};
pub use envelope::{Envelope, RpcError};
pub use error::ProtocolError;
pub use stream::{ObjectSink, ObjectSource};
