//! Backlog file access.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::core::backlog::{mark_complete, next_item};
use crate::core::types::Task;

/// Read the backlog and return its next pending task.
pub fn read_next_task(path: &Path) -> Result<Option<Task>> {
    if !path.is_file() {
        bail!("backlog not found at {}", path.display());
    }
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let task = next_item(&text).map(|item| Task {
        description: item.description,
        origin: item.origin,
        backlog_snapshot: Some(text.clone()),
    });
    match &task {
        Some(task) => debug!(description = %task.description, origin = ?task.origin, "next backlog task"),
        None => debug!("backlog has no pending tasks"),
    }
    Ok(task)
}

/// Mark `description` done in the backlog file.
///
/// Returns whether the file changed. The file is rewritten via a temp file
/// and rename.
pub fn mark_task_complete(path: &Path, description: &str) -> Result<bool> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let (updated, changed) = mark_complete(&text, description);
    if !changed {
        warn!(description, "task not found in backlog, nothing marked");
        return Ok(false);
    }
    let tmp_path = path.with_extension("md.tmp");
    fs::write(&tmp_path, updated).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    info!(description, "marked task complete in backlog");
    Ok(true)
}
