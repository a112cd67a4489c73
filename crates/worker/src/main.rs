//! Path rank worker binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use pathrank_core::config::AppConfig;
use pathrank_worker::exporter::{JsonDirSource, SymbolSource};
use pathrank_worker::jobs::all_jobs;
use pathrank_worker::{AppState, JobContext, Scheduler, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "PATHRANK_";

/// Environment variable holding the configuration file path.
const CONFIG_PATH_ENV: &str = "PATHRANK_CONFIG";

/// pathrankd - Path rank computation worker
#[derive(Parser, Debug)]
#[command(name = "pathrankd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PATHRANK_CONFIG",
        default_value = "config/pathrank.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("pathrankd v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    pathrank_worker::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let store = pathrank_store::from_config(&config.metadata)
        .await
        .context("failed to initialize ranking store")?;
    store
        .health_check()
        .await
        .context("ranking store health check failed")?;
    tracing::info!("Ranking store initialized");

    if config.ranking.enabled {
        tracing::info!(
            graph_key = %config.ranking.graph_key,
            epoch_secs = config.ranking.stale_result_age_secs,
            "Ranking enabled"
        );
    } else {
        tracing::warn!("Ranking disabled, jobs will idle until ranking.enabled is set");
    }

    let source = config.server.exporter_source_dir.as_ref().map(|dir| {
        tracing::info!(dir = %dir.display(), "Exporter reads symbols from directory");
        Arc::new(JsonDirSource::new(dir)) as Arc<dyn SymbolSource>
    });

    let state = AppState::new(config.clone(), store);
    let ctx = JobContext::new(state.store.clone(), state.config.clone()).with_clock(state.clock.clone());
    let scheduler = Scheduler::start(
        all_jobs(&ctx, source)
            .into_iter()
            .map(|(job, schedule)| (job, schedule.interval())),
    );

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(scheduler.cancellation_token()))
    .await?;

    tracing::info!("Waiting for running jobs to finish");
    scheduler.shutdown().await;
    Ok(())
}

/// Resolve once ctrl-c arrives, stopping the job loops.
async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
    }
    tracing::info!("Shutdown requested");
    cancel.cancel();
}

/// Load configuration from the file at `path` (optional) and `PATHRANK_` environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with(ENV_PREFIX) && key != CONFIG_PATH_ENV);

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: pathrankd --config /path/to/pathrank.toml\n  \
             2. Environment variables: PATHRANK_RANKING__ENABLED=true \
             PATHRANK_METADATA__TYPE=sqlite PATHRANK_METADATA__PATH=./data/pathrank.db pathrankd\n\n\
             See config/pathrank.example.toml for example configuration.\n\
             Set PATHRANK_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")
}
