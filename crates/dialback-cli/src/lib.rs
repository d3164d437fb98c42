//! Command implementations for the `dialback` binary

pub mod client;
pub mod commands;
pub mod output;
