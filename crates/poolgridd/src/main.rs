//! poolgridd — the poolgrid daemon.
//!
//! Single binary that assembles:
//! - State store (redb)
//! - Pool balancer and presence hub
//! - POI cache and its WordPress refresher
//! - REST API
//!
//! # Usage
//!
//! ```text
//! poolgridd standalone --config /etc/poolgrid.toml --port 8443
//! poolgridd config --config /etc/poolgrid.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use poolgrid_api::{ApiState, build_router};
use poolgrid_core::PoolgridConfig;
use poolgrid_poi::{PoiSource, WordPressSource, wait_ready};
use poolgrid_state::StateStore;

const READY_POLL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "poolgridd", about = "poolgrid daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every subsystem in one process.
    Standalone {
        /// TOML configuration file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on, overriding `server.port`.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory, overriding `server.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            run_standalone(config).await
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,poolgridd=debug,poolgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PoolgridConfig> {
    match path {
        Some(path) => {
            let config = PoolgridConfig::from_file(path)?;
            info!(path = ?path, "configuration loaded");
            Ok(config)
        }
        None => Ok(PoolgridConfig::default()),
    }
}

async fn run_standalone(config: PoolgridConfig) -> anyhow::Result<()> {
    info!(mode = ?config.balancer.mode, "poolgrid daemon starting");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("poolgrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let source: Option<Arc<dyn PoiSource>> = match WordPressSource::from_config(&config.poi)? {
        Some(source) => {
            info!(base_url = ?config.poi.base_url, category = config.poi.category, "poi source configured");
            Some(Arc::new(source))
        }
        None => None,
    };

    let (state, _hub) = ApiState::assemble(&config, store, source.clone())?;
    info!(
        capacity = config.balancer.capacity,
        max_pools = config.balancer.max_pools,
        "balancer initialized"
    );

    if let Some(source) = &source {
        match wait_ready(source.as_ref(), config.poi.startup_timeout(), READY_POLL).await {
            Ok(()) => match state.pois.seed_if_empty().await {
                Ok(count) => info!(count, "poi cache seeded"),
                Err(e) => warn!(error = %e, "initial poi fetch failed, serving cached data"),
            },
            Err(e) => warn!(error = %e, "poi source not ready, serving cached data"),
        }
    }

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresher = tokio::spawn({
        let pois = state.pois.clone();
        let interval = config.poi.refresh_interval();
        async move { pois.run(interval, shutdown_rx).await }
    });

    // ── Start API server ───────────────────────────────────────

    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c, running until killed");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = refresher.await;

    info!("poolgrid daemon stopped");
    Ok(())
}
