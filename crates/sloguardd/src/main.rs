//! sloguardd — the SloGuard daemon.
//!
//! Single binary that assembles the SLO control plane:
//! - State store (redb)
//! - Metric store + composite metric evaluator
//! - Alarm evaluator
//! - Autoscaling controllers
//! - Deployment gate
//! - REST API + Prometheus exposition
//!
//! # Usage
//!
//! ```text
//! sloguardd run --config sloguard.toml --data-dir /var/lib/sloguard --port 8480
//! sloguardd check --config sloguard.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sloguard_core::ControlConfig;
use sloguard_health::HttpReadinessProbe;
use sloguard_state::StateStore;
use sloguardd::{ControlPlane, DryRunRuntime};

const DEFAULT_FILTER: &str = "info,sloguardd=debug,sloguard=debug";

#[derive(Parser)]
#[command(name = "sloguardd", about = "SloGuard SLO control plane daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane: evaluation loops plus the HTTP API.
    Run {
        /// Path to sloguard.toml.
        #[arg(long, default_value = "sloguard.toml")]
        config: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/sloguard")]
        data_dir: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8480")]
        port: u16,
    },
    /// Validate a configuration file and exit.
    Check {
        #[arg(long, default_value = "sloguard.toml")]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            data_dir,
            port,
        } => run(&config, data_dir, port).await,
        Command::Check { config } => check(&config).await,
    }
}

async fn check(path: &Path) -> anyhow::Result<()> {
    let config = ControlConfig::from_file(path)?;
    // Assembling in memory also compiles cron schedules and expressions.
    ControlPlane::assemble(
        &config,
        StateStore::open_in_memory()?,
        Arc::new(DryRunRuntime::new()),
        Arc::new(HttpReadinessProbe::default()),
    )
    .await?;
    info!(
        path = %path.display(),
        alarms = config.alarms.len(),
        targets = config.targets.len(),
        environments = config.environments.len(),
        "configuration is valid"
    );
    Ok(())
}

async fn run(config_path: &Path, data_dir: PathBuf, port: u16) -> anyhow::Result<()> {
    info!("SloGuard daemon starting");

    let config = ControlConfig::from_file(config_path)?;
    info!(path = %config_path.display(), "configuration loaded");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("sloguard.redb");
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Initialize subsystems ──────────────────────────────────

    let plane = ControlPlane::assemble(
        &config,
        state,
        Arc::new(DryRunRuntime::new()),
        Arc::new(HttpReadinessProbe::default()),
    )
    .await?;

    // ── Start background tasks ─────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = plane.spawn_loops(shutdown_rx);

    // ── Start API server ───────────────────────────────────────

    let router = plane.router();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    for handle in handles {
        let _ = handle.await;
    }

    info!("SloGuard daemon stopped");
    Ok(())
}
