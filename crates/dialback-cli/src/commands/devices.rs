//! `dialback devices`: list connected agents

use anyhow::{Context, Result};

use dialback_core::config::EndpointConfig;
use dialback_protocol::messages::{ListAgentsParams, ListAgentsResult, METHOD_AGENT_LIST};

use crate::client;
use crate::output::format_agents;

/// List every agent currently registered with the hub
pub async fn run(
    config: EndpointConfig,
    server: Option<String>,
    security_key: Option<String>,
) -> Result<()> {
    let server = server.unwrap_or(config.server);
    let security_key = security_key.or(config.security_key).filter(|k| !k.is_empty());

    let conn = client::connect(&server, security_key.as_deref()).await?;

    let result: ListAgentsResult = conn
        .call(METHOD_AGENT_LIST, &ListAgentsParams {})
        .await
        .context("failed to list agents")?;
    conn.close();

    if result.count == 0 {
        println!("No devices connected.");
        return Ok(());
    }

    println!("Connected devices: {}\n", result.count);
    println!("{}", format_agents(&result.agents));

    Ok(())
}
