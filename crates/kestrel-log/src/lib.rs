//! Structured logging for Kestrel clients.
//!
//! Installs a `tracing` subscriber with a human-readable console layer and,
//! optionally, a JSON file layer for post-mortem analysis of connection
//! problems. The level comes from `RUST_LOG` when set, else from the
//! `debug.log_level` config entry.

use std::fs::File;
use std::path::Path;

use kestrel_config::Config;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Name of the JSON log file written inside the log directory.
pub const LOG_FILE: &str = "kestrel.log";

const DEFAULT_FILTER: &str = "info,ureq=warn,rustls=warn";

/// Initialize the global tracing subscriber.
///
/// * `log_dir` - directory for the JSON log file, created if missing
/// * `file_logging` - whether to write [`LOG_FILE`] at all
/// * `config` - optional configuration supplying the log level
///
/// ```no_run
/// use kestrel_config::Config;
/// use kestrel_log::init_logging;
///
/// let config = Config::default();
/// init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, file_logging: bool, config: Option<&Config>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    // Network threads are named (kestrel-dns, kestrel-http-N), so show names.
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if file_logging
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = File::create(log_dir.join(LOG_FILE))
    {
        subscriber.with(json_file_layer(log_file)).init();
        return;
    }

    subscriber.init();
}

/// Filter directives derived from config, falling back to [`default_env_filter`]'s.
pub fn filter_directives(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.is_empty() => {
            format!("{},ureq=warn,rustls=warn", config.debug.log_level)
        }
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// JSON layer writing one object per event to `file`.
pub fn json_file_layer<S>(file: File) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(true)
        .with_timer(fmt::time::uptime())
        .json()
}

/// An `EnvFilter` with the default directives: `info`, with the HTTP and
/// TLS stacks held at `warn`.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}
