use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inspection_sync_lib::presentation::dto::ApiResponse;
use inspection_sync_lib::presentation::dto::offline_inspection::CaptureManifest;
use inspection_sync_lib::{AppConfig, AppState, init_logging};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

#[derive(Parser)]
#[command(name = "inspection-sync")]
#[command(about = "Offline-first inspection capture and sync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database URL
    #[arg(long, env = "INSPECTION_SYNC_DATABASE_URL")]
    database_url: Option<String>,

    /// Remote API base URL
    #[arg(long, env = "INSPECTION_SYNC_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture an inspection from a JSON manifest and queue it
    Capture {
        /// Manifest path; image paths inside are relative to it
        manifest: PathBuf,
    },
    /// List stored inspections, newest first
    List,
    /// Show one stored inspection
    Show { id: String },
    /// Print the number of unsynced inspections
    Pending,
    /// Run one sync pass now
    Sync,
    /// Resend one inspection, including rejected ones
    Retry { id: String },
    /// Remove an inspection from the device
    Discard { id: String },
    /// Delete synced inspections older than the given age
    PurgeSynced {
        #[arg(long, default_value_t = 30)]
        older_than_days: u32,
    },
    /// Print sync metrics
    Metrics,
    /// Keep syncing on an interval until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.json_logs);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let mut config = AppConfig::from_env();
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if let Some(url) = cli.api_base_url {
        config.remote.base_url = url.trim_end_matches('/').to_string();
    }

    let state = AppState::new(config)
        .await
        .context("failed to initialize inspection store")?;
    let handler = state.offline_inspection_handler.clone();

    let ok = match cli.command {
        Commands::Capture { manifest } => {
            let (parsed, base_dir) = load_manifest(&manifest).await?;
            emit(handler.capture(parsed, &base_dir).await)?
        }
        Commands::List => emit(handler.list().await)?,
        Commands::Show { id } => emit(handler.get(&id).await)?,
        Commands::Pending => emit(Ok(handler.pending()))?,
        Commands::Sync => emit(handler.sync().await)?,
        Commands::Retry { id } => emit(handler.retry(&id).await)?,
        Commands::Discard { id } => emit(handler.discard(&id).await)?,
        Commands::PurgeSynced { older_than_days } => {
            emit(handler.purge_synced(older_than_days).await)?
        }
        Commands::Metrics => emit(Ok(handler.metrics()))?,
        Commands::Watch => {
            watch(&state).await?;
            true
        }
    };

    state.shutdown().await;
    Ok(ok)
}

async fn load_manifest(path: &Path) -> Result<(CaptureManifest, PathBuf)> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let manifest: CaptureManifest = serde_json::from_str(&raw)
        .with_context(|| format!("invalid manifest {}", path.display()))?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((manifest, base_dir))
}

fn emit<T: Serialize>(result: inspection_sync_lib::Result<T>) -> Result<bool> {
    let response = ApiResponse::from_result(result);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.success)
}

async fn watch(state: &AppState) -> Result<()> {
    let Some(scheduler) = state.start_scheduler() else {
        anyhow::bail!("auto sync is disabled (INSPECTION_SYNC_AUTO_SYNC=false)");
    };
    let mut pending = state.offline_inspection_service.subscribe_pending();

    info!(
        interval_secs = state.config.sync.sync_interval,
        "Watching offline inspections. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = pending.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *pending.borrow_and_update();
                info!(pending = count, "pending inspections changed");
            }
        }
    }

    info!("Shutting down sync scheduler...");
    scheduler.shutdown().await;
    Ok(())
}
