//! Configuration structs with client defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name used inside the config directory.
pub const CONFIG_FILE: &str = "client.ron";

/// Port used when the configured port is 0 and TLS is off.
pub const DEFAULT_PORT: u16 = 7350;

/// Port used when the configured port is 0 and TLS is on.
pub const DEFAULT_SSL_PORT: u16 = 443;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Game server endpoint and credentials.
    pub server: ServerConfig,
    /// Realtime (WebSocket) connection settings.
    pub realtime: RealtimeConfig,
    /// Unary request settings.
    pub http: HttpConfig,
    /// Completion pump cadence.
    pub tick: TickConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Game server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or IP address.
    pub host: String,
    /// Port. 0 selects 443 with TLS, 7350 without.
    pub port: u16,
    /// Use `https`/`wss` instead of `http`/`ws`.
    pub ssl: bool,
    /// Server key sent as basic auth on unauthenticated calls.
    pub server_key: String,
}

/// Realtime connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Drop the connection when nothing arrives for this long. 0 disables.
    pub activity_timeout_ms: u32,
    /// Interval for application-level pings. `None` disables the heartbeat.
    pub heartbeat_interval_ms: Option<u64>,
    /// Ask the server to publish presence status on connect.
    pub create_status: bool,
    /// Largest reassembled inbound message accepted, in bytes.
    pub max_frame_size: usize,
}

/// Unary request configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Number of worker threads performing blocking requests.
    pub worker_threads: usize,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

/// Tick cadence used by drivers that pump the client on a timer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TickConfig {
    /// Delay between ticks in milliseconds.
    pub interval_ms: u64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            ssl: false,
            server_key: "defaultkey".to_string(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            activity_timeout_ms: 0,
            heartbeat_interval_ms: Some(5_000),
            create_status: false,
            max_frame_size: 4 * 1024 * 1024,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { interval_ms: 15 }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// The port to dial, resolving 0 to the scheme default.
    pub fn effective_port(&self) -> u16 {
        match (self.port, self.ssl) {
            (0, true) => DEFAULT_SSL_PORT,
            (0, false) => DEFAULT_PORT,
            (port, _) => port,
        }
    }
}

// --- Load / Save / Reload ---

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    ron::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl Config {
    /// Platform config directory, `<config_dir>/kestrel`.
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("kestrel"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = read_config(&config_path)?;
            log::info!("Loaded client config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default client config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as [`CONFIG_FILE`].
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::Write {
            path: config_path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Re-read the file; `Some` only when it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let new_config = read_config(&config_path)?;

        if &new_config != self {
            log::info!("Client config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(2))
                .unwrap();
        assert!(ron_str.contains("port: 7350"));
        assert!(ron_str.contains("server_key: \"defaultkey\""));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(server: (host: \"play.example.com\"))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.server.host, "play.example.com");
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.realtime, RealtimeConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(retired_option: 3)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_heartbeat_can_be_disabled() {
        let config: Config = ron::from_str("(realtime: (heartbeat_interval_ms: None))").unwrap();
        assert_eq!(config.realtime.heartbeat_interval_ms, None);
    }

    #[test]
    fn test_effective_port() {
        let mut server = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        assert_eq!(server.effective_port(), 7350);
        server.ssl = true;
        assert_eq!(server.effective_port(), 443);
        server.port = 8443;
        assert_eq!(server.effective_port(), 8443);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.host = "10.0.0.1".to_string();
        config.realtime.activity_timeout_ms = 30_000;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.http.worker_threads = 8;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.unwrap().http.worker_threads, 8);
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        let result = Config::load_or_create(dir.path());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), Some(dir.path().join(CONFIG_FILE).as_path()));
        assert!(err.to_string().contains("client.ron"));
    }

    #[test]
    fn test_reload_of_missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::default().reload(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().starts_with("cannot read "));
    }
}
