//! One-shot hub connections
//!
//! The listing, disconnect and file commands all follow the same shape:
//! dial the hub, issue a single call or notification, close. This module
//! owns the dial step so every command presents the same headers.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use dialback_core::version;
use dialback_protocol::{ws, Handler, Inbound, RpcConn};

/// Discards all inbound traffic; one-shot commands never expect any.
struct IgnoreHandler;

#[async_trait]
impl Handler for IgnoreHandler {
    async fn handle(&self, _conn: &RpcConn, inbound: Inbound) {
        tracing::debug!(method = %inbound.method, "ignoring unsolicited message");
    }
}

/// Dial the hub for a one-shot command
pub async fn connect(server: &str, security_key: Option<&str>) -> Result<RpcConn> {
    let (sink, source) = ws::dial(server, version::version(), security_key)
        .await
        .context("failed to connect to hub")?;

    Ok(RpcConn::spawn(sink, source, Arc::new(IgnoreHandler)))
}
