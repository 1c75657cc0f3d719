//! Per-task attempt logs written to `<log_dir>/task_*.json`.
//!
//! A [`TaskLogger`] accumulates attempts in memory while the pipeline runs;
//! [`TaskLogger::finish`] consumes it, so a log gets exactly one final status.
//! [`TaskLogStore`] persists the finished [`TaskLog`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::types::{
    FileChange, FinalStatus, ProposalParse, Task, TaskMode, TaskOrigin, VerificationResult,
};

/// One generate/apply/verify cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub files_count: usize,
    #[serde(default)]
    pub files: Vec<FileChange>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub verification_notes: String,
    /// Feedback the generator received for this attempt.
    #[serde(default)]
    pub error_context: Option<String>,
    #[serde(default)]
    pub parse_failed: bool,
    #[serde(default)]
    pub has_raw_response: bool,
    #[serde(default)]
    pub raw_response: Option<String>,
    /// Absent when the attempt never reached a verifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
}

/// Complete record of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLog {
    pub timestamp: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<TaskOrigin>,
    pub mode: TaskMode,
    pub attempts: Vec<AttemptRecord>,
    pub final_status: FinalStatus,
    pub files_modified: Vec<String>,
    pub error_messages: Vec<String>,
    pub total_time_seconds: f64,
}

/// In-memory builder for a [`TaskLog`].
#[derive(Debug)]
pub struct TaskLogger {
    started_at: DateTime<Local>,
    started: Instant,
    task: String,
    origin: TaskOrigin,
    mode: TaskMode,
    attempts: Vec<AttemptRecord>,
    files_modified: Vec<String>,
    error_messages: Vec<String>,
}

impl TaskLogger {
    pub fn new(task: &Task, mode: TaskMode) -> Self {
        Self {
            started_at: Local::now(),
            started: Instant::now(),
            task: task.description.clone(),
            origin: task.origin,
            mode,
            attempts: Vec::new(),
            files_modified: Vec::new(),
            error_messages: Vec::new(),
        }
    }

    /// Record the generator's answer for `attempt`.
    pub fn record_attempt(
        &mut self,
        attempt: u32,
        parse: &ProposalParse,
        error_context: Option<&str>,
    ) {
        let base = AttemptRecord {
            attempt,
            timestamp: Local::now().to_rfc3339(),
            analysis: String::new(),
            files_count: 0,
            files: Vec::new(),
            commit_message: None,
            verification_notes: String::new(),
            error_context: error_context.map(str::to_string),
            parse_failed: false,
            has_raw_response: false,
            raw_response: None,
            verification: None,
        };
        let record = match parse {
            ProposalParse::Ok(proposal) => AttemptRecord {
                analysis: proposal.analysis.clone(),
                files_count: proposal.files.len(),
                files: proposal.files.clone(),
                commit_message: proposal.commit_message.clone(),
                verification_notes: proposal.verification_notes.clone(),
                ..base
            },
            ProposalParse::ParseError { raw_text } => AttemptRecord {
                analysis: "Failed to parse generator response as JSON".to_string(),
                parse_failed: true,
                has_raw_response: true,
                raw_response: Some(raw_text.clone()),
                ..base
            },
        };
        debug!(attempt, parse_failed = record.parse_failed, "attempt recorded");
        self.attempts.push(record);
    }

    /// Attach a verifier result to the latest attempt.
    pub fn record_verification(&mut self, result: &VerificationResult) {
        if let Some(last) = self.attempts.last_mut() {
            last.verification = Some(result.clone());
        }
    }

    pub fn set_files_modified(&mut self, files: Vec<String>) {
        self.files_modified = files;
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.error_messages.push(message.into());
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Seal the log with its terminal status.
    pub fn finish(self, final_status: FinalStatus) -> TaskLog {
        TaskLog {
            timestamp: self.started_at.to_rfc3339(),
            task: self.task,
            origin: Some(self.origin),
            mode: self.mode,
            attempts: self.attempts,
            final_status,
            files_modified: self.files_modified,
            error_messages: self.error_messages,
            total_time_seconds: self.started.elapsed().as_secs_f64(),
        }
    }
}

/// Writes finished task logs into a directory.
#[derive(Debug, Clone)]
pub struct TaskLogStore {
    log_dir: PathBuf,
}

impl TaskLogStore {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.log_dir
    }

    /// Persist `log` as pretty JSON and return its path.
    pub fn save(&self, log: &TaskLog) -> Result<PathBuf> {
        fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("create log dir {}", self.log_dir.display()))?;

        let stamp = DateTime::parse_from_rfc3339(&log.timestamp)
            .map(|t| t.with_timezone(&Local))
            .unwrap_or_else(|_| Local::now())
            .format("%Y%m%d_%H%M%S")
            .to_string();
        let stem = format!("task_{stamp}_{}", safe_task_name(&log.task));
        let mut path = self.log_dir.join(format!("{stem}.json"));
        let mut suffix = 1;
        while path.exists() {
            path = self.log_dir.join(format!("{stem}_{suffix}.json"));
            suffix += 1;
        }

        let mut buf = serde_json::to_string_pretty(log).context("serialize task log")?;
        buf.push('\n');
        fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
        info!(path = %path.display(), status = %log.final_status, "task log saved");
        Ok(path)
    }
}

/// Load a persisted task log.
pub fn load_task_log(path: &Path) -> Result<TaskLog> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// File-name-safe form of the first 50 characters of a task.
pub fn safe_task_name(task: &str) -> String {
    let kept: String = task
        .chars()
        .take(50)
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let name = kept.trim_end().replace(' ', "_");
    if name.is_empty() {
        "task".to_string()
    } else {
        name
    }
}
