//! Connectivity probe for a game server.
//!
//! Loads `client.ron` (CLI flags override it), optionally checks the REST
//! endpoint, then holds a realtime connection open for a while, ticking at
//! the configured cadence and logging every lifecycle event.
//!
//! Run with `cargo run -p kestrel-probe -- --token <session> --seconds 30`.

use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use kestrel_config::{CliArgs, Config};
use kestrel_net::{
    AuthMode, ClientError, ClientFactory, DisconnectInfo, HttpMethod, HttpRequest,
    RtClientListener,
};
use serde_json::Value;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kestrel-probe", about = "Check REST and realtime connectivity")]
struct ProbeArgs {
    #[command(flatten)]
    common: CliArgs,

    /// Session token for the realtime connection.
    #[arg(long, default_value = "")]
    token: String,

    /// How long to hold the realtime connection open.
    #[arg(long, default_value_t = 10)]
    seconds: u64,

    /// Call `GET /healthcheck` before connecting.
    #[arg(long)]
    healthcheck: bool,
}

struct LoggingListener;

impl RtClientListener for LoggingListener {
    fn on_connect(&mut self) {
        info!("realtime connection established");
    }

    fn on_disconnect(&mut self, info: &DisconnectInfo) {
        info!(code = info.code.as_u16(), reason = %info.reason, remote = info.remote, "realtime connection closed");
    }

    fn on_error(&mut self, error: &ClientError) {
        warn!(%error, "realtime error");
    }

    fn on_push(&mut self, envelope: &Value) {
        info!(%envelope, "server push");
    }
}

fn healthcheck(factory: &ClientFactory, tick: Duration) -> bool {
    let mut client = match factory.create_client() {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to start request workers");
            return false;
        }
    };

    let (tx, rx) = std::sync::mpsc::channel();
    client.request(
        HttpRequest::new(HttpMethod::Get, "/healthcheck"),
        &AuthMode::Basic,
        move |outcome| {
            let _ = tx.send(outcome);
        },
    );

    let deadline = Instant::now() + Duration::from_millis(factory.config().http.request_timeout_ms + 1_000);
    while Instant::now() < deadline {
        client.tick();
        if let Ok(outcome) = rx.try_recv() {
            return match outcome {
                Ok(_) => {
                    info!("healthcheck passed");
                    true
                }
                Err(e) => {
                    error!(error = %e, "healthcheck failed");
                    false
                }
            };
        }
        thread::sleep(tick);
    }
    error!("healthcheck timed out");
    false
}

fn main() -> ExitCode {
    let args = ProbeArgs::parse();

    let config_dir = match args.common.config.clone() {
        Some(dir) => dir,
        None => Config::default_dir().unwrap_or_else(|e| {
            eprintln!("{e}, using ./kestrel");
            "kestrel".into()
        }),
    };

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args.common);

    let log_dir = config_dir.join("logs");
    kestrel_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let tick = Duration::from_millis(config.tick.interval_ms.clamp(15, 50));
    info!(
        host = %config.server.host,
        port = config.server.effective_port(),
        ssl = config.server.ssl,
        tick_ms = tick.as_millis() as u64,
        "probe starting"
    );

    let factory = ClientFactory::from_config(config);
    if args.healthcheck && !healthcheck(&factory, tick) {
        return ExitCode::FAILURE;
    }

    let mut rt = factory.create_rt_client();
    rt.set_listener(Box::new(LoggingListener));
    let mut waiter = rt.connect(&args.token);

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut connected = false;
    while Instant::now() < deadline {
        rt.tick();
        match waiter.try_result() {
            Some(Err(e)) => {
                error!(error = %e, "realtime connect failed");
                return ExitCode::FAILURE;
            }
            Some(Ok(())) if !connected => {
                connected = true;
                rt.ping(Some(Box::new(|outcome| match outcome {
                    Ok(_) => info!("ping answered"),
                    Err(e) => warn!(error = %e, "ping failed"),
                })));
            }
            _ => {}
        }
        if connected && !rt.is_connected() {
            warn!("connection lost before the probe finished");
            return ExitCode::FAILURE;
        }
        thread::sleep(tick);
    }

    let cancelled = rt.disconnect();
    rt.tick();
    info!(cancelled, "probe finished");
    if connected { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
