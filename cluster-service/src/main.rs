//! Muon detector cluster aggregation service.
//!
//! Subscribes detector hits and metadata from the message bus, groups
//! temporally coincident hits from distinct stations into combined events
//! and publishes events, summaries, triggers and cluster telemetry to the
//! configured sinks.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cluster_core::ShutdownToken;
use cluster_service::app;
use cluster_service::config::{Config, Credentials};
use cluster_service::link::{Bus, LinkStatus, LocalBus};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(
    name = "muon-cluster",
    version,
    about = "Calculate coincidences for the muon detector network"
)]
struct Args {
    /// Configuration file to use.
    #[arg(short, long, default_value = "muon-cluster.json")]
    config: PathBuf,

    /// Credentials store to use.
    #[arg(short = 'l', long, default_value = "muon-cluster.credentials")]
    credentials: PathBuf,

    /// Import a plaintext credentials file into the store given with
    /// --credentials, then exit.
    #[arg(short, long)]
    setup: Option<PathBuf>,

    /// Add ASCII sinks and verbose stderr logging.
    #[arg(short, long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn setup_credentials(plain: &Path, store: &Path) -> Result<()> {
    let credentials = Credentials::load_plain(plain)?;
    credentials.store(store)?;
    info!(store = %store.display(), "credentials store written");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let args = Args::parse();
    init_logging(args.debug);

    if let Some(plain) = &args.setup {
        return match setup_credentials(plain, &args.credentials) {
            Ok(()) => 0,
            Err(e) => {
                error!("credentials setup failed: {e:#}");
                1
            }
        };
    }

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return 1;
        }
    };
    match Credentials::load(&args.credentials) {
        Ok(credentials) => config.apply_credentials(&credentials),
        Err(e) => warn!("continuing without credentials store: {e:#}"),
    }

    // The broker client is an external integration behind the Bus trait;
    // the in-process bus serves local cluster operation.
    let source_bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let sink_bus: Arc<dyn Bus> = Arc::new(LocalBus::new());

    if !source_bus.wait_for(LinkStatus::Connected, CONNECT_TIMEOUT) {
        error!("source bus connection failed");
        return 255;
    }
    if !sink_bus.wait_for(LinkStatus::Connected, CONNECT_TIMEOUT) {
        error!("sink bus connection failed");
        return 255;
    }

    let stop = ShutdownToken::new();
    let workers = match app::run(&config, args.debug, source_bus, sink_bus, &stop) {
        Ok(workers) => workers,
        Err(e) => {
            error!("could not start pipeline: {e:#}");
            return 1;
        }
    };

    shutdown_signal().await;
    stop.cancel();

    let joined = tokio::task::spawn_blocking(move || {
        for worker in workers {
            worker.join();
        }
    })
    .await;
    if joined.is_err() {
        error!("worker shutdown did not complete cleanly");
        return 1;
    }

    info!("shutdown complete");
    0
}
