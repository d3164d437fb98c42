//! `dialback server`: run the hub

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;

use dialback_core::config::ServerConfig;
use dialback_hub::HubServer;

/// Run the hub until killed
pub async fn run(
    config: ServerConfig,
    addr: Option<String>,
    security_key: Option<String>,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
) -> Result<()> {
    let addr = addr.unwrap_or(config.addr);
    let security_key = security_key.or(config.security_key).filter(|k| !k.is_empty());
    let tls_cert = tls_cert.or(config.tls_cert);
    let tls_key = tls_key.or(config.tls_key);

    if security_key.is_none() {
        tracing::warn!("no security key configured: authentication is disabled");
    }

    let server = HubServer::new(security_key);

    match (tls_cert, tls_key) {
        (Some(cert), Some(key)) => {
            let socket_addr = tokio::net::lookup_host(&addr)
                .await
                .with_context(|| format!("failed to resolve {addr}"))?
                .next()
                .with_context(|| format!("no address for {addr}"))?;
            server.serve_tls(socket_addr, &cert, &key).await
        }
        (None, None) => {
            tracing::warn!("TLS not enabled: consider --tls-cert and --tls-key");
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            server.serve(listener).await
        }
        _ => bail!("both --tls-cert and --tls-key must be provided together"),
    }
}
