//! Command-line argument parsing for Kestrel tools.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Kestrel client command-line arguments.
///
/// CLI values override settings loaded from `client.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "kestrel", about = "Kestrel game-server client")]
pub struct CliArgs {
    /// Server host.
    #[arg(long)]
    pub host: Option<String>,

    /// Server port (0 picks the scheme default).
    #[arg(long)]
    pub port: Option<u16>,

    /// Use TLS for both HTTP and realtime connections.
    #[arg(long)]
    pub ssl: Option<bool>,

    /// Server key for basic auth.
    #[arg(long)]
    pub server_key: Option<String>,

    /// Realtime activity timeout in milliseconds (0 disables).
    #[arg(long)]
    pub activity_timeout_ms: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref host) = args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ssl) = args.ssl {
            self.server.ssl = ssl;
        }
        if let Some(ref key) = args.server_key {
            self.server.server_key = key.clone();
        }
        if let Some(timeout) = args.activity_timeout_ms {
            self.realtime.activity_timeout_ms = timeout;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
