//! panelcast - serve instrument panels to web browsers.
//!
//! Runs the panel server against the built-in demo host, which renders
//! synthetic panels on a ~60 Hz host loop. Stop it with Ctrl+C.

use clap::{Parser as ClapParser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use panelcast::config::{self, ConfigError, ServerConfig};
use panelcast::demo::DemoHost;
use panelcast::Server;

/// Host frame period of the demo loop.
const HOST_FRAME: Duration = Duration::from_micros(16_667);

/// panelcast - stream instrument panels to web browsers
#[derive(ClapParser, Debug)]
#[command(name = "panelcast", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// TOML config file; flags below override its values
    #[arg(long, env = "PANELCAST_CONFIG", default_value = "panelcast.toml")]
    config: PathBuf,

    /// Address to listen on
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory with the web interfaces served under /web/
    #[arg(long)]
    web_root: Option<PathBuf>,

    /// Host refresh interval in seconds
    #[arg(long)]
    refresh_interval: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the resolved configuration to the config file and exit
    SaveConfig,
}

#[derive(Debug, Error)]
pub enum PanelcastError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "panelcast=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn run(cli: Cli) -> Result<(), PanelcastError> {
    let config = resolve_config(&cli)?;

    match cli.command {
        Some(Commands::SaveConfig) => {
            config.save(&cli.config)?;
            tracing::info!(path = %cli.config.display(), "config saved");
            Ok(())
        }
        None => run_server(config),
    }
}

/// Config file values, then command-line overrides.
fn resolve_config(cli: &Cli) -> Result<ServerConfig, ConfigError> {
    let mut config = match ServerConfig::load(&cli.config)? {
        Some(config) => {
            tracing::debug!(path = %cli.config.display(), "loaded config");
            config
        }
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(web_root) = &cli.web_root {
        config.web_root = web_root.clone();
    }
    if let Some(interval) = cli.refresh_interval {
        config.refresh_interval = interval;
    }
    Ok(config)
}

// ── Server mode ────────────────────────────────────────────────────

fn run_server(settings: ServerConfig) -> Result<(), PanelcastError> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let render_every =
        (settings.refresh_interval().as_secs_f64() / HOST_FRAME.as_secs_f64()).round() as u64;
    let server = Server::start(settings)?;
    let hostname = config::resolve_hostname();
    for url in config::advertised_urls(server.local_addr(), &hostname) {
        tracing::info!(%url, "panels available");
    }

    let mut host = DemoHost::new(render_every);
    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        host.advance();
        server.tick(&mut host);
        if let Some(rest) = HOST_FRAME.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    tracing::info!("shutting down");
    server.shutdown(&mut host);
    Ok(())
}
