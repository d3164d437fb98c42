//! `dialback sessions`: list active sessions

use anyhow::{Context, Result};

use dialback_core::config::EndpointConfig;
use dialback_protocol::messages::{ListSessionsParams, ListSessionsResult, METHOD_SESSION_LIST};

use crate::client;
use crate::output::format_sessions;

/// List every active session across all agents
pub async fn run(
    config: EndpointConfig,
    server: Option<String>,
    security_key: Option<String>,
) -> Result<()> {
    let server = server.unwrap_or(config.server);
    let security_key = security_key.or(config.security_key).filter(|k| !k.is_empty());

    let conn = client::connect(&server, security_key.as_deref()).await?;

    let result: ListSessionsResult = conn
        .call(METHOD_SESSION_LIST, &ListSessionsParams {})
        .await
        .context("failed to list sessions")?;
    conn.close();

    if result.count == 0 {
        println!("No active sessions.");
        return Ok(());
    }

    println!("Active sessions: {}\n", result.count);
    println!("{}", format_sessions(&result.sessions));

    Ok(())
}
