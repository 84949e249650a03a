//! Wind data service.
//!
//! Fetches GFS 10 m wind fields from NOMADS with:
//! - Hourly polling for the newest published cycle
//! - Analysis and forecast artifacts keyed by valid time
//! - Rounded, gzip-compressed JSON published atomically
//! - HTTP API for the latest and nearest snapshot

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use wind_server::config::ServiceConfig;
use wind_server::convert::Grib2JsonConverter;
use wind_server::pipeline::{AcquisitionPipeline, PipelineConfig};
use wind_server::scheduler::{ScheduleInfo, Scheduler};
use wind_server::server::{self, AppState};
use wind_server::state::AcquisitionLedger;
use wind_server::store::ArtifactStore;
use wind_server::upstream::NomadsSource;

#[derive(Parser, Debug)]
#[command(name = "wind-server")]
#[command(about = "GFS wind data acquisition and serving")]
struct Args {
    /// Configuration file
    #[arg(long, env = "WIND_CONFIG", default_value = "config/wind-server.yaml")]
    config: PathBuf,

    /// HTTP port (overrides the config file)
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Run a single acquisition and exit
    #[arg(long, conflicts_with = "serve_only")]
    once: bool,

    /// Serve stored artifacts without acquiring new ones
    #[arg(long)]
    serve_only: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for published artifacts (overrides the config file)
    #[arg(long, env = "WIND_ARTIFACT_DIR")]
    artifact_dir: Option<PathBuf>,

    /// Directory for raw upstream payloads (overrides the config file)
    #[arg(long, env = "WIND_STAGING_DIR")]
    staging_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting wind server");

    let mut config = ServiceConfig::load_or_default(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = &args.artifact_dir {
        config.storage.artifact_dir = dir.clone();
    }
    if let Some(dir) = &args.staging_dir {
        config.storage.staging_dir = dir.clone();
    }

    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Failed to install Prometheus recorder, metrics disabled");
            None
        }
    };

    let store = ArtifactStore::new(&config.storage.artifact_dir, &config.storage.staging_dir);
    store
        .ensure_dirs()
        .await
        .context("Failed to create storage directories")?;

    // The service keeps working without a ledger, only /status loses history
    let ledger = match AcquisitionLedger::open(&config.storage.ledger_path).await {
        Ok(ledger) => Some(ledger),
        Err(e) => {
            warn!(
                path = %config.storage.ledger_path.display(),
                error = %e,
                "Failed to open acquisition ledger"
            );
            None
        }
    };

    let app_state = Arc::new(AppState {
        store: store.clone(),
        ledger: ledger.clone(),
        server: config.server.clone(),
        schedule: ScheduleInfo::from(&config),
        prometheus,
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    if args.serve_only {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            shutdown_tx_clone.send(()).ok();
        });

        return server::run_server(app_state, config.server.port, shutdown_tx.subscribe()).await;
    }

    let upstream = NomadsSource::new(config.upstream.clone())?;
    let converter = Grib2JsonConverter::new(
        &config.converter.binary,
        Duration::from_secs(config.converter.timeout_secs),
    );

    let mut pipeline = AcquisitionPipeline::new(
        store,
        Arc::new(upstream),
        Arc::new(converter),
        PipelineConfig::from_service(&config),
    );
    if let Some(ledger) = &ledger {
        pipeline = pipeline.with_ledger(ledger.clone());
    }

    let mut scheduler = Scheduler::new(Arc::new(pipeline), config.poll_interval());
    if let Some(ledger) = ledger {
        scheduler = scheduler.with_ledger(ledger);
    }

    if args.once {
        info!("Running single acquisition");
        let result = scheduler.run_once_at(Utc::now()).await;
        info!(
            outcome = result.outcome().as_str(),
            stored = result.stored_count(),
            failed = result.failed_count(),
            "Acquisition finished"
        );
        return Ok(());
    }

    let server_handle = {
        let shutdown = shutdown_tx.subscribe();
        let port = config.server.port;
        tokio::spawn(async move {
            if let Err(e) = server::run_server(app_state, port, shutdown).await {
                error!(error = %e, "Server failed");
            }
        })
    };

    let scheduler_handle = {
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { scheduler.run_forever(shutdown).await })
    };

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");
    shutdown_tx.send(()).ok();

    server_handle.await.ok();
    scheduler_handle.await.ok();

    info!("Wind server stopped");
    Ok(())
}
