//! fleetd — the Fleet daemon.
//!
//! Single binary that assembles the orchestration runtime:
//! - Group store (redb) and the group/service registries
//! - Platform resolver with an on-disk artifact cache
//! - The runtime backend selected by probing (Kubernetes, Docker, local)
//! - Scheduler and health detector loops
//! - An operator terminal on stdin
//!
//! # Usage
//!
//! ```text
//! fleetd run --config fleet.toml --data-dir /var/lib/fleet
//! fleetd check
//! ```

mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use fleet_control::FleetControl;
use fleet_core::FleetConfig;
use fleet_health::HealthDetector;
use fleet_platform::{Catalogue, HttpFetcher, PlatformResolver};
use fleet_runtime::{Runtime, RuntimeBackend};
use fleet_scheduler::Scheduler;
use fleet_state::{EventBus, GroupRegistry, GroupStore, ServiceRegistry};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::terminal::TerminalExit;

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleet_runtime=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet game-server orchestration daemon", version)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "fleet.toml")]
    config: PathBuf,

    /// Directory for the group store, artifacts and working directories.
    #[arg(long, global = true, default_value = ".")]
    data_dir: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, the health detector and the operator terminal.
    Run,
    /// Report which runtime backends are usable on this host.
    Check,
    /// Print the effective configuration.
    Config,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = FleetConfig::load_or_default(&cli.config)?;
    config.rebase(&cli.data_dir);

    match cli.command {
        Command::Run => run(config, cli.data_dir).await,
        Command::Check => {
            for (backend, runnable) in fleet_runtime::report(&config).await {
                println!("{:<12} {}", backend.label(), if runnable { "runnable" } else { "unavailable" });
            }
            Ok(())
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(config: FleetConfig, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("fleet daemon starting");
    std::fs::create_dir_all(&data_dir)?;

    // ── Registries ─────────────────────────────────────────────

    let db_path = data_dir.join("fleet.redb");
    let store = GroupStore::open(&db_path)?;
    info!(path = ?db_path, "group store opened");

    let events = EventBus::default();
    let groups = GroupRegistry::load(store, events.clone())?;
    let services = ServiceRegistry::new(
        events.clone(),
        config.runtime.work_dir.clone(),
        config.runtime.port_start,
    );

    // ── Platforms ──────────────────────────────────────────────

    let catalogue = match &config.platforms.catalogue {
        Some(path) => Catalogue::from_file(path)?,
        None => Catalogue::builtin()?,
    };
    info!(
        platforms = catalogue.platforms.len(),
        versions = catalogue.version_count(),
        "platform catalogue loaded"
    );
    let fetcher = HttpFetcher::new(config.download_timeout())?;
    let resolver = PlatformResolver::new(
        config.platforms.cache_dir.clone(),
        catalogue,
        Arc::new(fetcher),
    );

    // ── Runtime backend ────────────────────────────────────────

    let substrate = fleet_runtime::select(&config).await;
    let runtime = Arc::new(Runtime::new(
        substrate,
        groups,
        services,
        Arc::new(resolver),
        config.termination_grace(),
    ));
    runtime.clean_work_root().await?;

    // ── Background loops ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(runtime.clone());
    let scheduler_interval = config.scheduler_interval();
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_interval, scheduler_shutdown).await;
    });

    let detector = HealthDetector::new(runtime.clone(), config.probe_timeout());
    let health_interval = config.health_interval();
    let health_shutdown = shutdown_rx;
    let health_handle = tokio::spawn(async move {
        detector.run(health_interval, health_shutdown).await;
    });

    // ── Operator terminal ──────────────────────────────────────

    let control = FleetControl::new(runtime.clone(), events);
    info!(backend = %runtime.kind(), "fleet daemon ready; type 'help' for commands");

    tokio::select! {
        exit = terminal::run(control) => {
            if exit == TerminalExit::Eof {
                tokio::signal::ctrl_c().await?;
            }
        }
        signal = tokio::signal::ctrl_c() => signal?,
    }
    info!("shutdown requested");

    // ── Shutdown ───────────────────────────────────────────────

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "scheduler task ended abnormally");
    }
    if let Err(e) = health_handle.await {
        warn!(error = %e, "health task ended abnormally");
    }

    runtime.shutdown_all().await;
    info!("fleet daemon stopped");
    Ok(())
}
