//! Agent-side runtime
//!
//! The agent dials outbound to the hub, holds the channel open forever, and
//! services session and file requests against its local host: it owns the
//! PTYs, the child shells and the files. It listens on nothing.

pub mod agent;
pub mod backoff;
pub mod handler;
pub mod session;

pub use agent::Agent;
pub use backoff::ExponentialBackoff;
pub use session::PtySession;
