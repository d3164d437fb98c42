//! `dialback agent`: run a worker endpoint

use anyhow::Result;

use dialback_agent::Agent;
use dialback_core::config::AgentConfig;

/// Run the agent with its reconnect-forever loop
pub async fn run(
    config: AgentConfig,
    server: Option<String>,
    id: Option<String>,
    name: Option<String>,
    security_key: Option<String>,
    allowed_shells: Vec<String>,
) -> Result<()> {
    let server = server.unwrap_or(config.server);
    let security_key = security_key.or(config.security_key).filter(|k| !k.is_empty());

    let id = match id.or(config.id) {
        Some(id) => id,
        None => {
            let id = machine_id();
            tracing::info!(%id, "using machine ID as agent ID");
            id
        }
    };

    let name = match name.or(config.name) {
        Some(name) => name,
        None => {
            let hostname = gethostname::gethostname().to_string_lossy().into_owned();
            tracing::info!(%hostname, "using hostname as device name");
            hostname
        }
    };

    let allowed_shells = if allowed_shells.is_empty() {
        config.allowed_shells
    } else {
        allowed_shells
    };

    tracing::info!(%id, %name, "agent configuration");

    let agent = Agent::new(id, name, server, security_key, allowed_shells);
    agent.run().await;

    Ok(())
}

/// A stable identifier for this machine.
///
/// Reads `/etc/machine-id` where available and falls back to the
/// hostname, so an agent keeps the same identity across restarts.
fn machine_id() -> String {
    if let Ok(contents) = std::fs::read_to_string("/etc/machine-id") {
        let id = contents.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }

    gethostname::gethostname().to_string_lossy().into_owned()
}
