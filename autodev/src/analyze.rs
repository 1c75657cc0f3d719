//! Task log analysis (`--analyze-logs`) and attempt display (`--show-log`).
//!
//! Analysis reads records leniently: a file that cannot be read or parsed
//! becomes a warning in the summary, never an error.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::io::task_log::{AttemptRecord, TaskLog};

const ERROR_KEY_CHARS: usize = 100;
const TOP_ERRORS: usize = 5;
const RECENT_FAILURES: usize = 5;
const RAW_EXCERPT_CHARS: usize = 1000;
const RULE: &str = "================================================================================";

/// Fields the analyzer needs from a task log. Everything is optional so
/// older or hand-edited records still count.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggedTask {
    timestamp: String,
    task: String,
    final_status: Option<String>,
    files_modified: Vec<String>,
    attempts: Vec<serde_json::Value>,
    error_messages: Vec<String>,
}

/// Outcome counts keyed the way the summary prints them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatusCounts {
    pub successful: usize,
    pub failed_verification: usize,
    pub failed_json_parsing: usize,
    pub failed_commit: usize,
    pub completed_no_changes: usize,
    pub other: usize,
}

/// A failed task as listed under "recent failures".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDigest {
    pub timestamp: String,
    pub task: String,
    pub status: String,
    pub first_error: Option<String>,
}

/// Aggregate view over a directory of task logs.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LogSummary {
    pub total: usize,
    pub counts: StatusCounts,
    pub avg_files_modified: f64,
    pub avg_attempts: f64,
    /// Error prefixes with their occurrence count, most frequent first.
    pub common_errors: Vec<(String, usize)>,
    /// Most recent failures first.
    pub recent_failures: Vec<FailureDigest>,
    /// Files that could not be read or parsed.
    pub warnings: Vec<String>,
}

/// Summarize every `task_*.json` in `log_dir`.
pub fn analyze_log_dir(log_dir: &Path) -> Result<LogSummary> {
    if !log_dir.is_dir() {
        bail!("log directory not found: {}", log_dir.display());
    }
    let mut names: Vec<String> = fs::read_dir(log_dir)
        .with_context(|| format!("read {}", log_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("task_") && name.ends_with(".json"))
        .collect();
    names.sort();
    debug!(dir = %log_dir.display(), files = names.len(), "analyzing task logs");

    let mut tasks = Vec::with_capacity(names.len());
    let mut warnings = Vec::new();
    for name in names {
        let path = log_dir.join(&name);
        let parsed = fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str::<LoggedTask>(&raw).map_err(Into::into));
        match parsed {
            Ok(task) => tasks.push(task),
            Err(err) => {
                warn!(file = %name, err = %err, "skipping unreadable task log");
                warnings.push(format!("Error reading {name}: {err}"));
            }
        }
    }

    let mut summary = summarize(&tasks);
    summary.warnings = warnings;
    Ok(summary)
}

fn summarize(tasks: &[LoggedTask]) -> LogSummary {
    let mut counts = StatusCounts::default();
    let mut files = 0usize;
    let mut attempts = 0usize;
    let mut errors: HashMap<String, usize> = HashMap::new();

    for task in tasks {
        match task.final_status.as_deref().unwrap_or("unknown") {
            "completed_successfully" => counts.successful += 1,
            "failed_verification" => counts.failed_verification += 1,
            "failed_json_parsing" => counts.failed_json_parsing += 1,
            "failed_commit" => counts.failed_commit += 1,
            "completed_no_changes" => counts.completed_no_changes += 1,
            _ => counts.other += 1,
        }
        files += task.files_modified.len();
        attempts += task.attempts.len();
        for message in &task.error_messages {
            *errors.entry(char_prefix(message, ERROR_KEY_CHARS).to_string()).or_default() += 1;
        }
    }

    let mut common_errors: Vec<(String, usize)> = errors.into_iter().collect();
    common_errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    common_errors.truncate(TOP_ERRORS);

    let mut failures: Vec<&LoggedTask> = tasks
        .iter()
        .filter(|t| t.final_status.as_deref().is_some_and(|s| s.contains("failed")))
        .collect();
    failures.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let recent_failures = failures
        .into_iter()
        .take(RECENT_FAILURES)
        .map(|t| FailureDigest {
            timestamp: t.timestamp.clone(),
            task: t.task.clone(),
            status: t.final_status.clone().unwrap_or_default(),
            first_error: t.error_messages.first().cloned(),
        })
        .collect();

    let total = tasks.len();
    let per_task = |n: usize| if total == 0 { 0.0 } else { n as f64 / total as f64 };
    LogSummary {
        total,
        counts,
        avg_files_modified: per_task(files),
        avg_attempts: per_task(attempts),
        common_errors,
        recent_failures,
        warnings: Vec::new(),
    }
}

/// Human-readable report for `--analyze-logs`.
pub fn render_summary(log_dir: &Path, summary: &LogSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Analyzing logs in: {}", log_dir.display());
    for warning in &summary.warnings {
        let _ = writeln!(out, "warning: {warning}");
    }
    if summary.total == 0 {
        let _ = writeln!(out, "No task logs found.");
        return out;
    }

    let pct = |n: usize| n as f64 / summary.total as f64 * 100.0;
    let c = &summary.counts;
    let _ = writeln!(out, "\nTask statistics:");
    let _ = writeln!(out, "  Total tasks: {}", summary.total);
    for (label, n) in [
        ("Successful", c.successful),
        ("Failed verification", c.failed_verification),
        ("Failed JSON parsing", c.failed_json_parsing),
        ("Failed commit", c.failed_commit),
        ("No changes needed", c.completed_no_changes),
        ("Other failures", c.other),
    ] {
        let _ = writeln!(out, "  {label}: {n} ({:.1}%)", pct(n));
    }

    let _ = writeln!(out, "\nAverages:");
    let _ = writeln!(out, "  Files modified per task: {:.1}", summary.avg_files_modified);
    let _ = writeln!(out, "  Attempts per task: {:.1}", summary.avg_attempts);

    if !summary.common_errors.is_empty() {
        let _ = writeln!(out, "\nTop common errors:");
        for (i, (error, count)) in summary.common_errors.iter().enumerate() {
            let _ = writeln!(out, "  {}. ({count} occurrences) {error}", i + 1);
        }
    }

    let _ = writeln!(out, "\nRecent failed tasks:");
    for failure in &summary.recent_failures {
        let _ = writeln!(out, "  {}...", char_prefix(&failure.task, 60));
        let _ = writeln!(out, "    Status: {}", failure.status);
        if let Some(error) = &failure.first_error {
            let _ = writeln!(out, "    Error: {}...", char_prefix(error, ERROR_KEY_CHARS));
        }
        out.push('\n');
    }
    out
}

/// Render one attempt (1-based) or all attempts of a persisted log.
pub fn show_attempts(log: &TaskLog, attempt: Option<usize>) -> Result<String> {
    let total = log.attempts.len();
    let selected: &[AttemptRecord] = match attempt {
        Some(n) if (1..=total).contains(&n) => &log.attempts[n - 1..n],
        Some(n) => bail!("invalid attempt number {n}. Valid range: 1-{total}"),
        None => &log.attempts,
    };

    let mut out = String::new();
    let _ = writeln!(out, "Task: {}", log.task);
    let _ = writeln!(out, "Timestamp: {}", log.timestamp);
    let _ = writeln!(out, "Final status: {}", log.final_status);
    let _ = writeln!(out, "Total attempts: {total}");
    if let Some(n) = attempt {
        let _ = writeln!(out, "\nShowing attempt {n}/{total}");
    }

    for record in selected {
        render_attempt(&mut out, record);
    }

    if let Some(first) = selected.first()
        && first.has_raw_response
        && let Some(raw) = first.raw_response.as_deref()
        && raw.chars().count() > 100
    {
        let _ = writeln!(out, "\nRaw generator response (first {RAW_EXCERPT_CHARS} chars):");
        let _ = writeln!(out, "  {}", char_prefix(raw, RAW_EXCERPT_CHARS));
        if raw.chars().count() > RAW_EXCERPT_CHARS {
            let _ = writeln!(out, "  ... (truncated)");
        }
    }

    let _ = writeln!(out, "\n{RULE}\nEnd of log\n{RULE}");
    Ok(out)
}

fn render_attempt(out: &mut String, record: &AttemptRecord) {
    let _ = writeln!(out, "\n{RULE}\nAttempt {}\n{RULE}", record.attempt);
    let _ = writeln!(out, "\nAnalysis:\n  {}", record.analysis);
    let _ = writeln!(
        out,
        "\nCommit message:\n  {}",
        record.commit_message.as_deref().unwrap_or("No commit message")
    );
    if !record.verification_notes.is_empty() {
        let _ = writeln!(out, "\nVerification notes:\n  {}", record.verification_notes);
    }

    if record.files.is_empty() {
        let _ = writeln!(out, "\n  No files generated");
    } else {
        let _ = writeln!(out, "\nGenerated files ({}):", record.files.len());
        for file in &record.files {
            let _ = writeln!(out, "\n  {} ({})", file.path, file.action.as_str());
            if !file.explanation.is_empty() {
                let _ = writeln!(out, "  Why: {}", file.explanation);
            }
            match file.content.as_deref() {
                Some(content) if !content.trim().is_empty() => {
                    let _ = writeln!(out, "\n  Content:");
                    for line in content.split('\n') {
                        let _ = writeln!(out, "      {line}");
                    }
                }
                _ => {
                    let _ = writeln!(out, "      (empty content)");
                }
            }
        }
    }

    if let Some(context) = record.error_context.as_deref().filter(|c| !c.is_empty()) {
        let _ = writeln!(out, "\nError context:\n  {context}");
    }
    if let Some(verification) = &record.verification {
        let verdict = if verification.passed { "passed" } else { "failed" };
        let _ = writeln!(out, "\nVerification: {verdict}");
    }
}

fn char_prefix(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FileAction, FileChange, FinalStatus, TaskMode};

    fn write_log(dir: &Path, name: &str, body: serde_json::Value) {
        fs::write(dir.join(name), body.to_string()).expect("write");
    }

    fn record(attempt: u32) -> AttemptRecord {
        AttemptRecord {
            attempt,
            timestamp: String::new(),
            analysis: format!("analysis {attempt}"),
            files_count: 1,
            files: vec![FileChange {
                path: "src/a.rs".to_string(),
                action: FileAction::Modify,
                content: Some("fn a() {}\nfn b() {}".to_string()),
                explanation: "adds b".to_string(),
            }],
            commit_message: Some("feat: b".to_string()),
            verification_notes: String::new(),
            error_context: (attempt > 1).then(|| "Code verification failed".to_string()),
            parse_failed: false,
            has_raw_response: false,
            raw_response: None,
            verification: None,
        }
    }

    fn log_with(attempts: Vec<AttemptRecord>) -> TaskLog {
        TaskLog {
            timestamp: "2026-01-02T03:04:05+00:00".to_string(),
            task: "add b".to_string(),
            origin: None,
            mode: TaskMode::SingleTask,
            attempts,
            final_status: FinalStatus::CompletedSuccessfully,
            files_modified: vec!["src/a.rs".to_string()],
            error_messages: Vec::new(),
            total_time_seconds: 1.5,
        }
    }

    #[test]
    fn summarizes_statuses_errors_and_failures() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        write_log(
            dir,
            "task_20260101_000001_a.json",
            serde_json::json!({
                "timestamp": "2026-01-01T00:00:01", "task": "a",
                "final_status": "completed_successfully",
                "files_modified": ["x", "y"], "attempts": [{}], "error_messages": []
            }),
        );
        write_log(
            dir,
            "task_20260101_000002_b.json",
            serde_json::json!({
                "timestamp": "2026-01-01T00:00:02", "task": "b",
                "final_status": "failed_verification",
                "files_modified": [], "attempts": [{}, {}, {}],
                "error_messages": ["Verification error: boom", "Verification error: boom"]
            }),
        );
        write_log(
            dir,
            "task_20260101_000003_c.json",
            serde_json::json!({
                "timestamp": "2026-01-01T00:00:03", "task": "c",
                "final_status": "failed_unknown",
                "attempts": [{}, {}], "error_messages": ["Rollback failed: lock"]
            }),
        );
        fs::write(dir.join("task_broken.json"), "{").expect("write");
        fs::write(dir.join("agent_20260101.log"), "not a task log").expect("write");

        let summary = analyze_log_dir(dir).expect("analyze");
        assert_eq!(summary.total, 3);
        assert_eq!(summary.counts.successful, 1);
        assert_eq!(summary.counts.failed_verification, 1);
        assert_eq!(summary.counts.other, 1);
        assert!((summary.avg_attempts - 2.0).abs() < f64::EPSILON);
        assert!((summary.avg_files_modified - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            summary.common_errors[0],
            ("Verification error: boom".to_string(), 2)
        );
        assert_eq!(summary.warnings.len(), 1);
        assert!(summary.warnings[0].contains("task_broken.json"));

        let tasks: Vec<&str> = summary
            .recent_failures
            .iter()
            .map(|f| f.task.as_str())
            .collect();
        assert_eq!(tasks, vec!["c", "b"]);

        let report = render_summary(dir, &summary);
        assert!(report.contains("Total tasks: 3"));
        assert!(report.contains("Successful: 1 (33.3%)"));
        assert!(report.contains("1. (2 occurrences) Verification error: boom"));
        assert!(report.contains("Status: failed_unknown"));
    }

    #[test]
    fn groups_errors_by_prefix_and_keeps_top_five() {
        let long_a = format!("{}A", "x".repeat(100));
        let long_b = format!("{}B", "x".repeat(100));
        let mut tasks = vec![LoggedTask {
            final_status: Some("failed_commit".to_string()),
            error_messages: vec![long_a, long_b],
            ..LoggedTask::default()
        }];
        for i in 0..6 {
            tasks.push(LoggedTask {
                final_status: Some("failed_commit".to_string()),
                error_messages: vec![format!("error {i}")],
                ..LoggedTask::default()
            });
        }
        let summary = summarize(&tasks);
        assert_eq!(summary.common_errors.len(), 5);
        assert_eq!(summary.common_errors[0], ("x".repeat(100), 2));
        assert_eq!(summary.counts.failed_commit, 7);
    }

    #[test]
    fn empty_directory_reports_no_logs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let summary = analyze_log_dir(temp.path()).expect("analyze");
        assert_eq!(summary.total, 0);
        assert!(render_summary(temp.path(), &summary).contains("No task logs found."));
        assert!(analyze_log_dir(&temp.path().join("missing")).is_err());
    }

    #[test]
    fn shows_all_or_one_attempt() {
        let log = log_with(vec![record(1), record(2)]);

        let all = show_attempts(&log, None).expect("show");
        assert!(all.contains("Total attempts: 2"));
        assert!(all.contains("Attempt 1"));
        assert!(all.contains("Attempt 2"));
        assert!(all.contains("      fn a() {}\n      fn b() {}\n"));
        assert!(all.contains("Error context:\n  Code verification failed"));

        let second = show_attempts(&log, Some(2)).expect("show");
        assert!(second.contains("Showing attempt 2/2"));
        assert!(!second.contains("analysis 1"));

        let err = show_attempts(&log, Some(3)).unwrap_err();
        assert!(err.to_string().contains("Valid range: 1-2"));
    }

    #[test]
    fn shows_raw_response_excerpt_for_parse_failures() {
        let mut first = record(1);
        first.files.clear();
        first.parse_failed = true;
        first.has_raw_response = true;
        first.raw_response = Some("y".repeat(1500));
        let shown = show_attempts(&log_with(vec![first]), None).expect("show");
        assert!(shown.contains("No files generated"));
        assert!(shown.contains(&format!("  {}\n", "y".repeat(1000))));
        assert!(shown.contains("... (truncated)"));

        let mut short = record(1);
        short.has_raw_response = true;
        short.raw_response = Some("short".to_string());
        let shown = show_attempts(&log_with(vec![short]), None).expect("show");
        assert!(!shown.contains("Raw generator response"));
    }

    #[test]
    fn empty_content_is_marked() {
        let mut attempt = record(1);
        attempt.files[0].content = Some("   ".to_string());
        let shown = show_attempts(&log_with(vec![attempt]), None).expect("show");
        assert!(shown.contains("(empty content)"));
    }
}
