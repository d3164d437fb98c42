//! `dialback upload <agent-id> <local-path> <remote-path>`

use std::path::Path;

use anyhow::{bail, Context, Result};

use dialback_core::config::UploadConfig;
use dialback_protocol::messages::{
    encode_payload, FileUploadParams, FileUploadResult, METHOD_FILE_UPLOAD,
};

use crate::client;

/// Upload a local file to an agent
pub async fn run(
    config: UploadConfig,
    agent_id: &str,
    local_path: &Path,
    remote_path: &str,
    server: Option<String>,
    security_key: Option<String>,
    mode: Option<u32>,
) -> Result<()> {
    let server = server.unwrap_or(config.server);
    let security_key = security_key.or(config.security_key).filter(|k| !k.is_empty());
    let mode = mode.unwrap_or(config.mode);

    println!(
        "Uploading to agent '{agent_id}': {} -> {remote_path}",
        local_path.display()
    );

    let content = std::fs::read(local_path)
        .with_context(|| format!("failed to read local file {}", local_path.display()))?;

    let conn = client::connect(&server, security_key.as_deref()).await?;

    let result: FileUploadResult = conn
        .call(
            METHOD_FILE_UPLOAD,
            &FileUploadParams {
                agent_id: agent_id.to_string(),
                remote_path: remote_path.to_string(),
                content: encode_payload(&content),
                mode,
            },
        )
        .await
        .context("failed to upload file")?;
    conn.close();

    if !result.success {
        bail!("upload failed: {}", result.error.unwrap_or_default());
    }

    println!("File uploaded successfully");
    println!("  Local:  {}", local_path.display());
    println!("  Remote: {remote_path}");
    println!("  Size:   {} bytes", result.size);

    Ok(())
}
