//! One module per subcommand

pub mod agent;
pub mod connect;
pub mod devices;
pub mod disconnect;
pub mod download;
pub mod server;
pub mod sessions;
pub mod upload;
