//! Tracing setup for the agent.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: progress and diagnostics, filtered by
//!   `RUST_LOG`, written to stderr and optionally to a plain-text run log
//!   `<log_dir>/agent_<timestamp>.log`.
//!
//! - **Task logs (`io/task_log`)**: one JSON record per task in the same
//!   directory. Always written, unaffected by `RUST_LOG`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `info`. When `run_log_dir` is given, the
/// same events are also appended to a new run log there, whose path is
/// returned.
///
/// # Example
/// ```bash
/// RUST_LOG=autodev=debug autodev --task "add a smoke test"
/// ```
pub fn init(run_log_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, run_log) = match run_log_dir {
        Some(dir) => {
            let path = run_log_path(dir);
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
            let file = File::create(&path).with_context(|| format!("create {}", path.display()))?;
            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    if let Some(path) = &run_log {
        info!(path = %path.display(), "run log initialized");
    }
    Ok(run_log)
}

fn run_log_path(dir: &Path) -> PathBuf {
    dir.join(format!("agent_{}.log", Local::now().format("%Y%m%d_%H%M%S")))
}
