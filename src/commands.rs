//! Subcommand handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};

use flightdeck_config::{Config, ConfigLoader, ConfigValidator, StoreBackend, StoreConfig};
use flightdeck_engine::{FileRunStore, MemoryRunStore, RunId, RunStatus, RunStore};
use flightdeck_sqlite::SqliteRunStore;

/// Open the run store the configuration points at.
pub(crate) async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn RunStore>> {
    let store: Arc<dyn RunStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryRunStore::new()),
        StoreBackend::File => {
            let path = required_path(config)?;
            Arc::new(
                FileRunStore::new(path.clone())
                    .await
                    .with_context(|| format!("Failed to open run directory {}", path.display()))?,
            )
        }
        StoreBackend::Sqlite => {
            let path = required_path(config)?;
            Arc::new(
                SqliteRunStore::open(&path)
                    .await
                    .with_context(|| format!("Failed to open run database {}", path.display()))?,
            )
        }
    };
    Ok(store)
}

fn required_path(config: &StoreConfig) -> anyhow::Result<PathBuf> {
    match &config.path {
        Some(path) => Ok(PathBuf::from(ConfigLoader::expand_path(&path.to_string_lossy()))),
        None => bail!("store.path is required for the {:?} backend", config.backend),
    }
}

pub(crate) async fn status(config: &Config, run_id: &str, json: bool) -> anyhow::Result<()> {
    let store = open_store(&config.store).await?;
    let run_id = RunId::new(run_id);
    let Some(run) = store.load_run(&run_id).await? else {
        bail!("Run not found: {}", run_id);
    };
    let summary = run.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Run:        {}", summary.id);
    println!("Flight:     {}", summary.flight_type);
    println!("Status:     {}", summary.status);
    println!("Direction:  {:?}", summary.direction);
    println!("Step index: {}", summary.step_index);
    if let Some(step) = &summary.failed_step {
        println!("Failed at:  {}", step);
    }
    if let Some(error) = &summary.error {
        println!("Error:      {}", error);
        if error.cause.is_some() {
            println!("Root cause: {}", error.root_cause().message);
        }
    }
    if let Some(error) = &summary.undo_error {
        println!("Undo error: {}", error);
    }
    if let Some(wake_at) = run.wake_at {
        println!("Wakes at:   {}", wake_at.to_rfc3339());
    }
    Ok(())
}

pub(crate) async fn list(config: &Config, statuses: &[RunStatus]) -> anyhow::Result<()> {
    let store = open_store(&config.store).await?;
    let statuses = if statuses.is_empty() {
        &RunStatus::ALL[..]
    } else {
        statuses
    };

    let runs = store.list_runs_by_status(statuses).await?;
    if runs.is_empty() {
        println!("No runs.");
        return Ok(());
    }

    println!("{:<38} {:<24} {:<10} {:>5}  {}", "RUN", "FLIGHT", "STATUS", "STEP", "SUBMITTED");
    for run in runs {
        println!(
            "{:<38} {:<24} {:<10} {:>5}  {}",
            run.id.as_str(),
            run.flight_type,
            run.status.as_str(),
            run.step_index,
            run.submitted_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub(crate) fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = ConfigLoader::load(path).with_context(|| format!("Failed to load {}", path.display()))?;
    let result = ConfigValidator::validate(&config)?;

    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error: {}: {}", error.path, error.message);
    }

    if !result.is_valid() {
        bail!("{} configuration error(s)", result.errors.len());
    }
    println!("{} is valid", path.display());
    Ok(())
}
