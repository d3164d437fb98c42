//! `dialback download <agent-id> <remote-path>`

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use dialback_core::config::DownloadConfig;
use dialback_protocol::messages::{
    decode_payload, FileDownloadParams, FileDownloadResult, METHOD_FILE_DOWNLOAD,
};

use crate::client;

/// Download a file from an agent
pub async fn run(
    config: DownloadConfig,
    agent_id: &str,
    remote_path: &str,
    server: Option<String>,
    security_key: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let server = server.unwrap_or(config.server);
    let security_key = security_key.or(config.security_key).filter(|k| !k.is_empty());
    let output = output.or(config.output);

    println!("Downloading from agent '{agent_id}': {remote_path}");

    let conn = client::connect(&server, security_key.as_deref()).await?;

    let result: FileDownloadResult = conn
        .call(
            METHOD_FILE_DOWNLOAD,
            &FileDownloadParams {
                agent_id: agent_id.to_string(),
                remote_path: remote_path.to_string(),
            },
        )
        .await
        .context("failed to download file")?;
    conn.close();

    if !result.success {
        bail!("download failed: {}", result.error.unwrap_or_default());
    }

    let content = decode_payload(&result.content).context("failed to decode file content")?;

    let output = output.unwrap_or_else(|| {
        Path::new(remote_path)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("download"))
    });

    std::fs::write(&output, &content)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("File downloaded successfully");
    println!("  Remote: {remote_path}");
    println!("  Local:  {}", output.display());
    println!("  Size:   {} bytes", result.size);

    Ok(())
}
