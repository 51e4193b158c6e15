//! Configuration for Kestrel clients.
//!
//! Connection, realtime, HTTP and tick settings persist to disk as a RON file.
//! CLI flags override the loaded values, and unknown or missing fields fall
//! back to defaults so older files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, HttpConfig, RealtimeConfig, ServerConfig, TickConfig};
pub use error::ConfigError;
