//! Run loop: feeds tasks from the backlog, the command line or the terminal
//! into [`run_task`].

use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::types::{FinalStatus, Task, TaskMode};
use crate::io::backlog::read_next_task;
use crate::io::task_log::TaskLogStore;
use crate::pipeline::{Collaborators, PipelineConfig, TaskOutcome, run_task};

/// Where tasks come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Work through the backlog, at most `max_iterations` tasks.
    Backlog { max_iterations: u32 },
    /// One task given on the command line.
    Single(String),
    /// Tasks typed at the prompt until the user quits.
    Interactive,
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The backlog has no pending task.
    BacklogEmpty,
    /// `max_iterations` tasks were run.
    MaxIterations { max_iterations: u32 },
    /// A backlog task did not succeed.
    TaskFailed { task: String, status: FinalStatus },
    /// The single task finished.
    SingleDone,
    /// The user quit or input ended.
    InputEnded,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub tasks_run: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub stop: LoopStop,
}

impl LoopOutcome {
    fn new() -> Self {
        Self {
            tasks_run: 0,
            succeeded: 0,
            failed: 0,
            stop: LoopStop::SingleDone,
        }
    }

    fn count(&mut self, outcome: &TaskOutcome) {
        self.tasks_run += 1;
        if outcome.status.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Run tasks according to `mode`, calling `on_task` after each one.
///
/// Backlog runs stop on the first task that does not succeed; interactive
/// runs keep going. Operational errors (unreadable backlog, log write
/// failures) stop the loop immediately.
#[instrument(skip_all, fields(mode = ?mode))]
pub fn run_loop<F: FnMut(&Task, &TaskOutcome)>(
    cfg: &PipelineConfig,
    tools: Collaborators<'_>,
    store: &TaskLogStore,
    mode: &RunMode,
    mut on_task: F,
) -> Result<LoopOutcome> {
    let mut summary = LoopOutcome::new();
    match mode {
        RunMode::Backlog { max_iterations } => {
            let backlog = backlog_path(cfg);
            for iteration in 1..=*max_iterations {
                let Some(task) = read_next_task(&backlog)? else {
                    info!(tasks_run = summary.tasks_run, "backlog has no pending tasks");
                    summary.stop = LoopStop::BacklogEmpty;
                    return Ok(summary);
                };
                info!(iteration, max_iterations, task = %task.description, "backlog task");
                let outcome = run_task(cfg, tools, store, &task, TaskMode::Backlog)?;
                summary.count(&outcome);
                on_task(&task, &outcome);
                if !outcome.status.is_success() {
                    warn!(status = %outcome.status, "stopping backlog run after failed task");
                    summary.stop = LoopStop::TaskFailed {
                        task: task.description,
                        status: outcome.status,
                    };
                    return Ok(summary);
                }
            }
            info!(max_iterations, "iteration limit reached");
            summary.stop = LoopStop::MaxIterations {
                max_iterations: *max_iterations,
            };
        }
        RunMode::Single(description) => {
            let task = Task::manual(description.trim());
            let outcome = run_task(cfg, tools, store, &task, TaskMode::SingleTask)?;
            summary.count(&outcome);
            on_task(&task, &outcome);
            summary.stop = LoopStop::SingleDone;
        }
        RunMode::Interactive => loop {
            let Some(description) = tools.prompter.next_task()? else {
                summary.stop = LoopStop::InputEnded;
                break;
            };
            let task = Task::manual(description);
            let outcome = run_task(cfg, tools, store, &task, TaskMode::Interactive)?;
            summary.count(&outcome);
            on_task(&task, &outcome);
        },
    }
    Ok(summary)
}

/// The task a backlog run would pick next, without running anything.
pub fn preview_next_task(cfg: &PipelineConfig) -> Result<Option<Task>> {
    read_next_task(&backlog_path(cfg))
}

fn backlog_path(cfg: &PipelineConfig) -> PathBuf {
    cfg.repo_root.join(&cfg.context.backlog_file)
}
