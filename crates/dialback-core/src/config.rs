//! Configuration management
//!
//! An optional `config.yaml` provides per-subcommand default values for
//! every command-line flag. Command-line flags always override file values.
//! The file is searched for in order: the current directory, `~/.dialback`,
//! `/etc/dialback`, and `$XDG_CONFIG_HOME/dialback` if that variable is set.
//! A missing file is not an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default hub WebSocket URL
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080/ws";

/// Default hub listen address
pub const DEFAULT_LISTEN_ADDR: &str = "localhost:8080";

/// Default shell requested by the interactive client
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Default permissions for uploaded files
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Shells an agent will spawn unless configured otherwise
pub const DEFAULT_ALLOWED_SHELLS: [&str; 4] =
    ["/bin/bash", "/bin/sh", "/bin/zsh", "/usr/bin/fish"];

/// Full configuration, one section per subcommand
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub connect: ConnectConfig,
    pub upload: UploadConfig,
    pub download: DownloadConfig,
    pub devices: EndpointConfig,
    pub sessions: EndpointConfig,
    pub disconnect: EndpointConfig,
}

/// `server` subcommand defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on (host:port)
    pub addr: String,
    /// Shared security key; empty disables authentication
    pub security_key: Option<String>,
    /// Path to a TLS certificate file
    pub tls_cert: Option<PathBuf>,
    /// Path to a TLS private key file
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_LISTEN_ADDR.to_string(),
            security_key: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// `agent` subcommand defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hub WebSocket URL
    pub server: String,
    /// Agent ID; empty uses the machine ID
    pub id: Option<String>,
    /// Friendly device name; empty uses the hostname
    pub name: Option<String>,
    /// Shared security key
    pub security_key: Option<String>,
    /// Shells this agent is willing to spawn
    pub allowed_shells: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER_URL.to_string(),
            id: None,
            name: None,
            security_key: None,
            allowed_shells: DEFAULT_ALLOWED_SHELLS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// `connect` subcommand defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Hub WebSocket URL
    pub server: String,
    /// Shared security key
    pub security_key: Option<String>,
    /// Shell to request on the agent
    pub shell: String,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER_URL.to_string(),
            security_key: None,
            shell: DEFAULT_SHELL.to_string(),
        }
    }
}

/// `upload` subcommand defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Hub WebSocket URL
    pub server: String,
    /// Shared security key
    pub security_key: Option<String>,
    /// File permissions mode (octal)
    pub mode: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER_URL.to_string(),
            security_key: None,
            mode: DEFAULT_FILE_MODE,
        }
    }
}

/// `download` subcommand defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Hub WebSocket URL
    pub server: String,
    /// Shared security key
    pub security_key: Option<String>,
    /// Output path; empty uses the remote basename
    pub output: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER_URL.to_string(),
            security_key: None,
            output: None,
        }
    }
}

/// Defaults for subcommands that only need a hub endpoint
/// (`devices`, `sessions`, `disconnect`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Hub WebSocket URL
    pub server: String,
    /// Shared security key
    pub security_key: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER_URL.to_string(),
            security_key: None,
        }
    }
}

/// Candidate config file locations, in priority order
fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("config.yaml")];

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".dialback").join("config.yaml"));
    }

    paths.push(PathBuf::from("/etc/dialback/config.yaml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            paths.push(PathBuf::from(xdg).join("dialback").join("config.yaml"));
        }
    }

    paths
}

/// Load configuration from the first config file found in the search path.
///
/// Returns the defaults when no file exists. A file that exists but fails
/// to parse is an error.
pub fn load() -> Result<Config, ConfigError> {
    for path in search_paths() {
        if path.exists() {
            return load_from(&path);
        }
    }

    Ok(Config::default())
}

/// Load configuration from a specific file
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.agent.server, DEFAULT_SERVER_URL);
        assert_eq!(config.connect.shell, "/bin/bash");
        assert_eq!(config.upload.mode, 0o644);
        assert_eq!(config.agent.allowed_shells.len(), 4);
        assert!(config.server.security_key.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "connect:\n  server: wss://hub.example.com/ws\n  shell: /bin/zsh"
        )
        .unwrap();

        let config = load_from(file.path()).unwrap();
        assert_eq!(config.connect.server, "wss://hub.example.com/ws");
        assert_eq!(config.connect.shell, "/bin/zsh");
        // Untouched sections keep their defaults.
        assert_eq!(config.devices.server, DEFAULT_SERVER_URL);
        assert_eq!(config.upload.mode, 0o644);
    }

    #[test]
    fn test_missing_explicit_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        match load_from(&path) {
            Err(ConfigError::NotFound(p)) => assert_eq!(p, path),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server: [not a mapping").unwrap();

        assert!(load_from(file.path()).is_err());
    }

    #[test]
    fn test_allowed_shells_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "agent:\n  allowed_shells:\n    - /bin/sh").unwrap();

        let config = load_from(file.path()).unwrap();
        assert_eq!(config.agent.allowed_shells, vec!["/bin/sh".to_string()]);
    }
}
