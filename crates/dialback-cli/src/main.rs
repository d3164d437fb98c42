//! dialback CLI
//!
//! One binary, eight subcommands: the hub (`server`), the worker
//! (`agent`), and the operator commands that drive them. Defaults come
//! from an optional `config.yaml`; flags always win.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dialback_cli::commands;
use dialback_core::{config, version};

#[derive(Parser)]
#[command(name = "dialback")]
#[command(version = version::full_version())]
#[command(about = "Reverse-shell orchestration hub: agents dial out, operators dial in")]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub server
    Server {
        /// Address to listen on (host:port)
        #[arg(short, long)]
        addr: Option<String>,
        /// Security key for authentication; unset disables authentication
        #[arg(short = 'k', long)]
        security_key: Option<String>,
        /// Path to a TLS certificate file (enables wss)
        #[arg(short = 'c', long)]
        tls_cert: Option<PathBuf>,
        /// Path to a TLS private key file (enables wss)
        #[arg(short = 't', long)]
        tls_key: Option<PathBuf>,
    },

    /// Start an agent that dials out to the hub
    Agent {
        /// Hub WebSocket URL
        #[arg(short, long)]
        server: Option<String>,
        /// Unique agent ID (defaults to the machine ID)
        #[arg(short, long)]
        id: Option<String>,
        /// Friendly device name (defaults to the hostname)
        #[arg(short, long)]
        name: Option<String>,
        /// Security key for authentication
        #[arg(short = 'k', long)]
        security_key: Option<String>,
        /// Shell the agent may spawn; repeatable, overrides the default
        /// allow-list
        #[arg(long = "allowed-shell")]
        allowed_shells: Vec<String>,
    },

    /// Connect to an agent and start an interactive session
    Connect {
        /// Agent to connect to
        agent_id: String,
        /// Hub WebSocket URL
        #[arg(short, long)]
        server: Option<String>,
        /// Security key for authentication
        #[arg(short = 'k', long)]
        security_key: Option<String>,
        /// Shell to run on the agent
        #[arg(long)]
        shell: Option<String>,
    },

    /// Disconnect an active session
    Disconnect {
        /// Session to stop
        session_id: String,
        /// Hub WebSocket URL
        #[arg(short, long)]
        server: Option<String>,
        /// Security key for authentication
        #[arg(short = 'k', long)]
        security_key: Option<String>,
    },

    /// List devices (agents) connected to the hub
    Devices {
        /// Hub WebSocket URL
        #[arg(short, long)]
        server: Option<String>,
        /// Security key for authentication
        #[arg(short = 'k', long)]
        security_key: Option<String>,
    },

    /// List all active sessions
    Sessions {
        /// Hub WebSocket URL
        #[arg(short, long)]
        server: Option<String>,
        /// Security key for authentication
        #[arg(short = 'k', long)]
        security_key: Option<String>,
    },

    /// Upload a file to an agent
    Upload {
        /// Agent to upload to
        agent_id: String,
        /// Local file to send
        local_path: PathBuf,
        /// Destination path on the agent
        remote_path: String,
        /// Hub WebSocket URL
        #[arg(short, long)]
        server: Option<String>,
        /// Security key for authentication
        #[arg(short = 'k', long)]
        security_key: Option<String>,
        /// File permissions mode (octal)
        #[arg(short, long, value_parser = parse_octal)]
        mode: Option<u32>,
    },

    /// Download a file from an agent
    Download {
        /// Agent to download from
        agent_id: String,
        /// Path on the agent
        remote_path: String,
        /// Hub WebSocket URL
        #[arg(short, long)]
        server: Option<String>,
        /// Security key for authentication
        #[arg(short = 'k', long)]
        security_key: Option<String>,
        /// Output path (defaults to the remote basename)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_octal(value: &str) -> Result<u32, String> {
    let digits = value.trim_start_matches("0o");
    u32::from_str_radix(digits, 8).map_err(|e| format!("invalid octal mode '{value}': {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // A missing config file is fine; a broken one costs a warning, not
    // the command.
    let config = config::load().unwrap_or_else(|e| {
        eprintln!("Warning: {e}");
        config::Config::default()
    });

    match cli.command {
        Commands::Server {
            addr,
            security_key,
            tls_cert,
            tls_key,
        } => {
            tracing::info!(version = %version::full_version(), "starting dialback hub");
            commands::server::run(config.server, addr, security_key, tls_cert, tls_key).await
        }

        Commands::Agent {
            server,
            id,
            name,
            security_key,
            allowed_shells,
        } => {
            tracing::info!(version = %version::full_version(), "starting dialback agent");
            commands::agent::run(config.agent, server, id, name, security_key, allowed_shells)
                .await
        }

        Commands::Connect {
            agent_id,
            server,
            security_key,
            shell,
        } => commands::connect::run(config.connect, &agent_id, server, security_key, shell).await,

        Commands::Disconnect {
            session_id,
            server,
            security_key,
        } => commands::disconnect::run(config.disconnect, &session_id, server, security_key).await,

        Commands::Devices {
            server,
            security_key,
        } => commands::devices::run(config.devices, server, security_key).await,

        Commands::Sessions {
            server,
            security_key,
        } => commands::sessions::run(config.sessions, server, security_key).await,

        Commands::Upload {
            agent_id,
            local_path,
            remote_path,
            server,
            security_key,
            mode,
        } => {
            commands::upload::run(
                config.upload,
                &agent_id,
                &local_path,
                &remote_path,
                server,
                security_key,
                mode,
            )
            .await
        }

        Commands::Download {
            agent_id,
            remote_path,
            server,
            security_key,
            output,
        } => {
            commands::download::run(
                config.download,
                &agent_id,
                &remote_path,
                server,
                security_key,
                output,
            )
            .await
        }
    }
}
