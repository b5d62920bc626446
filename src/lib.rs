pub mod aggregation;
pub mod db;
pub mod diagnostics;
pub mod models;
pub mod sensing;
pub mod session;
pub mod settings;
mod utils;
pub mod validation;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use db::{Database, LogStore};
use diagnostics::Diagnostics;
use sensing::{
    share_detector, ForegroundAppSource, ForegroundWindow, SampleBuffer, SimulatedDetector,
};
use session::{recover_interrupted_sessions, TrackerController};
use settings::SettingsStore;

const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "healthtrack")]
#[command(about = "Posture sampling and session logging")]
#[command(version)]
struct Cli {
    /// Directory holding the database and settings.json
    #[arg(
        long,
        global = true,
        env = "HEALTHTRACK_DATA_DIR",
        default_value = "healthtrack-data"
    )]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a tracking session with the simulated detector until Ctrl-C
    Track {
        /// Stop automatically after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Foreground application name stamped on records
        #[arg(long, default_value = "")]
        game: String,
    },
    /// Export the full log history as CSV
    Export {
        /// Destination file; relative paths land in `export_dir` when set
        path: PathBuf,
    },
    /// Print the most recent log rows, newest first
    Recent {
        #[arg(long, default_value_t = 8)]
        limit: usize,
    },
}

struct AppState {
    store: LogStore,
    settings: SettingsStore,
}

fn open(data_dir: &Path) -> Result<AppState> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let database = Database::new(data_dir.join("healthtrack.sqlite3"))?;
    let store = LogStore::new(
        database,
        Diagnostics::new(),
        settings.current().retry_policy(),
    );

    Ok(AppState { store, settings })
}

fn spawn_diagnostics_logger(diagnostics: &Diagnostics) {
    let mut events = diagnostics.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => warn!("diagnostic: {json}"),
                    Err(err) => warn!("diagnostic (unserializable): {err}"),
                },
                Err(RecvError::Lagged(skipped)) => warn!("{skipped} diagnostic events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn track(state: AppState, duration_secs: Option<u64>, game: String) -> Result<()> {
    let settings = state.settings.current().with_env_overrides();
    spawn_diagnostics_logger(state.store.diagnostics());

    let buffer = Arc::new(SampleBuffer::new(settings.buffer_capacity));
    let window = ForegroundWindow {
        executable: Some(game),
        title: None,
    };
    let foreground: Arc<dyn ForegroundAppSource> = Arc::new(move || window.display_name());
    let controller = TrackerController::new(state.store.clone(), buffer, foreground, &settings);

    controller
        .attach_detector(share_detector(SimulatedDetector::new()), settings.sample_interval())
        .await?;
    controller.start_session().await?;
    info!(
        "Tracking; aggregating every {}s (Ctrl-C to stop)",
        settings.aggregation_interval_secs
    );

    match duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                result = tokio::signal::ctrl_c() => result?,
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    controller.shutdown().await?;
    let snapshot = controller.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn export(state: AppState, path: PathBuf) -> Result<()> {
    let destination = match state.settings.current().export_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path,
    };
    let rows = state.store.export_all(&destination).await?;
    println!("Exported {rows} rows to {}", destination.display());
    Ok(())
}

async fn recent(state: AppState, limit: usize) -> Result<()> {
    for entry in state.store.recent(limit).await? {
        println!("{}", entry.summary());
    }
    Ok(())
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let outcome = runtime.block_on(async move {
        let state = open(&cli.data_dir)?;

        // Close sessions that were running when the process last died.
        let recovered = recover_interrupted_sessions(&state.store).await?;
        if recovered > 0 {
            warn!("Closed {recovered} interrupted sessions");
        }

        match cli.command {
            Command::Track {
                duration_secs,
                game,
            } => track(state, duration_secs, game).await,
            Command::Export { path } => export(state, path).await,
            Command::Recent { limit } => recent(state, limit).await,
        }
    });

    // A detector stuck in a native call must not keep the process alive.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    outcome
}
