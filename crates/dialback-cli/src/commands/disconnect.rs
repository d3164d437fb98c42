//! `dialback disconnect <session-id>`: stop a session by id

use anyhow::{Context, Result};

use dialback_core::config::EndpointConfig;
use dialback_protocol::messages::{SessionStopParams, METHOD_SESSION_STOP};

use crate::client;

/// Send a stop for the given session
pub async fn run(
    config: EndpointConfig,
    session_id: &str,
    server: Option<String>,
    security_key: Option<String>,
) -> Result<()> {
    let server = server.unwrap_or(config.server);
    let security_key = security_key.or(config.security_key).filter(|k| !k.is_empty());

    let conn = client::connect(&server, security_key.as_deref()).await?;

    conn.notify(
        METHOD_SESSION_STOP,
        &SessionStopParams {
            agent_id: None,
            session_id: session_id.to_string(),
        },
    )
    .await
    .context("failed to stop session")?;
    conn.close();

    println!("Session '{session_id}' disconnected");

    Ok(())
}
