//! cdp-resolver - identity resolution service and batch CLI
//!
//! `serve` runs the HTTP control surface; `resolve`, `backfill` and `notify`
//! run a single operation against the configured store and exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cdp_common::db::init_database;
use cdp_common::{time, window_interval_from_secs, ConfigOverrides, EngineConfig};
use cdp_resolver::notify::mark_ready_for_personalization;
use cdp_resolver::resolution::{BackfillParams, BackfillScheduler, BatchRunner, SchedulerState};
use cdp_resolver::{build_router, AppState};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cdp-resolver")]
#[command(about = "Customer profile identity resolution engine")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "CDP_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL (overrides CDP_DATABASE_URL and the config file)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Log level or EnvFilter directive (RUST_LOG still wins)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP control surface
    Serve,

    /// Run one resolution batch
    Resolve {
        /// Only resolve rows of this tenant
        #[arg(long)]
        tenant: Option<String>,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Walk backward through ingestion history resolving window by window
    Backfill {
        /// Upper bound of the first window (RFC 3339); a previous checkpoint to resume
        #[arg(long)]
        initial_target_time: Option<String>,

        /// Stop once windows reach this time (RFC 3339)
        #[arg(long)]
        floor_time: Option<String>,

        #[arg(long)]
        max_iterations: Option<u64>,

        #[arg(long)]
        window_interval_secs: Option<u64>,

        #[arg(long)]
        max_duration_secs: Option<u64>,
    },

    /// Mark changed masters ready for personalization and print their ids
    Notify {
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = ConfigOverrides {
        config_path: cli.config.clone(),
        database_url: cli.database_url.clone(),
        log_level: cli.log_level.clone(),
    };
    let config = EngineConfig::load(&overrides).context("Invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level.0)),
        )
        .init();

    info!("Starting cdp-resolver v{}", env!("CARGO_PKG_VERSION"));
    info!(
        database = %config.database.redacted_url(),
        batch_size = config.resolution.batch_size,
        tenant_parallelism = config.resolution.tenant_parallelism,
        intra_pass_matching = config.resolution.intra_pass_matching,
        fuzzy_name_threshold = config.matching.fuzzy_name_threshold,
        "Configuration loaded"
    );

    let pool = init_database(&config.database)
        .await
        .context("Failed to initialize database")?;
    let config = Arc::new(config);

    match cli.command {
        Command::Serve => serve(pool, config).await,
        Command::Resolve { tenant, batch_size } => {
            let batch_size = batch_size.unwrap_or(config.resolution.batch_size);
            let report = BatchRunner::new(pool, config).run_batch(tenant.as_deref(), batch_size).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Backfill {
            initial_target_time,
            floor_time,
            max_iterations,
            window_interval_secs,
            max_duration_secs,
        } => {
            let initial = match initial_target_time.as_deref() {
                Some(raw) => time::parse_rfc3339(raw)?,
                None => time::now(),
            };
            let mut params = BackfillParams::from_config(&config.scheduler, initial)?;
            if let Some(raw) = floor_time.as_deref() {
                params.floor_time = Some(time::parse_rfc3339(raw)?);
            }
            if let Some(max) = max_iterations {
                params.max_iterations = max;
            }
            if let Some(secs) = window_interval_secs {
                params.window_interval = window_interval_from_secs(secs)?;
            }
            if let Some(secs) = max_duration_secs {
                params.max_duration = std::time::Duration::from_secs(secs);
            }

            let report = BackfillScheduler::new(BatchRunner::new(pool, config)).run(&params).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if report.outcome == SchedulerState::Failed {
                anyhow::bail!(
                    "backfill failed; resume with --initial-target-time {}",
                    report.checkpoint.to_rfc3339()
                );
            }
            Ok(())
        }
        Command::Notify { batch_size } => {
            let batch_size = batch_size.unwrap_or(config.resolution.batch_size);
            let ids = mark_ready_for_personalization(&pool, &config.database, batch_size).await?;
            for id in ids {
                println!("{}", id);
            }
            Ok(())
        }
    }
}

async fn serve(pool: sqlx::SqlitePool, config: Arc<EngineConfig>) -> Result<()> {
    let bind_address = config.server.bind_address.clone();
    let app = build_router(AppState::new(pool, config));

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!("cdp-resolver listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
