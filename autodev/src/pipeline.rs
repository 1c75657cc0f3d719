//! Retry pipeline: runs one task through generate, apply, verify and commit.
//!
//! Stage order and retry decisions come from [`crate::core::machine`]; this
//! module performs the side effect for each stage and reports the outcome as
//! an [`Event`]. Every task ends with exactly one persisted [`TaskLog`].
//!
//! [`TaskLog`]: crate::io::task_log::TaskLog

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, info, instrument, warn};

use crate::core::machine::{Cursor, Event, Stage, advance};
use crate::core::proposal::parse_proposal;
use crate::core::types::{
    ChangeProposal, FinalStatus, ProposalParse, Task, TaskMode, VerificationResult,
};
use crate::io::applier::{ApplyOutcome, apply_changes, remove_created};
use crate::io::backlog::mark_task_complete;
use crate::io::config::{AgentConfig, ContextConfig};
use crate::io::context::assemble_context;
use crate::io::generator::Generator;
use crate::io::git::Vcs;
use crate::io::prompt::{PromptInputs, render_generate_prompt};
use crate::io::prompter::Prompter;
use crate::io::task_log::{TaskLogStore, TaskLogger};
use crate::io::verifier::Verifier;

pub const PARSE_FEEDBACK: &str =
    "Generator response was not valid JSON. Please respond with valid JSON format.";
const PARSE_ERROR: &str = "Failed to parse generator response as JSON";
const EMPTY_APPLY_ERROR: &str =
    "No files were modified but implementation indicated changes were needed";

/// Where a proposal is checked before it touches the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecheckTarget {
    /// Absolute path the combined proposal contents are written to.
    pub write_path: PathBuf,
    /// Argument handed to [`Verifier::verify_file`].
    pub verify_arg: String,
}

/// Settings shared by every task of a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub repo_root: PathBuf,
    pub max_attempts: u32,
    pub push: bool,
    pub confirm_push: bool,
    pub precheck: Option<PrecheckTarget>,
    pub context: ContextConfig,
    /// Project rules appended to every prompt.
    pub rules: Vec<String>,
}

impl PipelineConfig {
    /// Derive pipeline settings for `repo_root` from a loaded config.
    pub fn from_config(repo_root: &Path, cfg: &AgentConfig) -> Self {
        let verify_dir = cfg
            .verifier
            .workdir
            .as_ref()
            .map_or_else(|| repo_root.to_path_buf(), |dir| repo_root.join(dir));
        let precheck = cfg
            .precheck
            .scratch_file
            .as_ref()
            .map(|scratch| PrecheckTarget {
                write_path: verify_dir.join(scratch),
                verify_arg: scratch.to_string_lossy().into_owned(),
            });
        Self {
            repo_root: repo_root.to_path_buf(),
            max_attempts: cfg.max_attempts,
            push: cfg.push,
            confirm_push: cfg.confirm_push,
            precheck,
            context: cfg.context.clone(),
            rules: cfg.generator.extra_rules.clone(),
        }
    }
}

/// External collaborators used by the pipeline.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub generator: &'a dyn Generator,
    pub verifier: &'a dyn Verifier,
    pub vcs: &'a dyn Vcs,
    pub prompter: &'a dyn Prompter,
}

/// Result of running one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub status: FinalStatus,
    pub attempts: usize,
    pub files_modified: Vec<String>,
    pub log_path: PathBuf,
}

/// Run `task` to a terminal status and persist its log through `store`.
///
/// In modes that update the backlog, a successful task is also marked done
/// in the backlog file as part of its commit.
#[instrument(skip_all, fields(task = %task.description, mode = ?mode))]
pub fn run_task(
    cfg: &PipelineConfig,
    tools: Collaborators<'_>,
    store: &TaskLogStore,
    task: &Task,
    mode: TaskMode,
) -> Result<TaskOutcome> {
    info!(max_attempts = cfg.max_attempts, "starting task");
    let context = assemble_context(&cfg.repo_root, &cfg.context, &task.description, store.dir())
        .context("assemble context")?;

    let mut run = TaskRun {
        cfg,
        tools,
        task,
        mode,
        context,
        logger: TaskLogger::new(task, mode),
        feedback: None,
        proposal: None,
        applied: ApplyOutcome::default(),
    };
    let mut status = run.drive();
    if status == FinalStatus::CompletedNoChanges && mode.updates_backlog() {
        status = run.record_no_changes();
    }

    let attempts = run.logger.attempt_count();
    let files_modified = run.applied.written.clone();
    let log = run.logger.finish(status);
    let log_path = store.save(&log).context("save task log")?;

    if status.is_success() {
        info!(%status, attempts, "task finished");
    } else {
        warn!(%status, attempts, "task failed");
    }
    Ok(TaskOutcome {
        status,
        attempts,
        files_modified,
        log_path,
    })
}

struct TaskRun<'a> {
    cfg: &'a PipelineConfig,
    tools: Collaborators<'a>,
    task: &'a Task,
    mode: TaskMode,
    context: String,
    logger: TaskLogger,
    /// Diagnostics handed to the next generation attempt.
    feedback: Option<String>,
    proposal: Option<ChangeProposal>,
    applied: ApplyOutcome,
}

impl TaskRun<'_> {
    fn drive(&mut self) -> FinalStatus {
        let mut cursor = Cursor::start(self.cfg.max_attempts, self.cfg.precheck.is_some());
        loop {
            if let Some(status) = cursor.finished() {
                return status;
            }
            let event = match self.step(cursor) {
                Ok(event) => event,
                Err(err) => {
                    error!(err = %format!("{err:#}"), stage = ?cursor.stage, "stage failed");
                    self.logger.add_error(format!("Internal error: {err:#}"));
                    return FinalStatus::FailedUnknown;
                }
            };
            debug!(stage = ?cursor.stage, ?event, attempt = cursor.attempt, "stage finished");
            cursor = match advance(cursor, event) {
                Ok(next) => next,
                Err(err) => {
                    error!(err = %err, "pipeline reached an invalid transition");
                    self.logger.add_error(format!("Internal error: {err}"));
                    return FinalStatus::FailedUnknown;
                }
            };
        }
    }

    fn step(&mut self, cursor: Cursor) -> Result<Event> {
        match cursor.stage {
            Stage::Generating => self.generate(cursor),
            Stage::Prechecking => self.precheck(),
            Stage::Applying => self.apply(),
            Stage::Verifying => Ok(self.verify()),
            Stage::RollingBack(_) => Ok(self.rollback()),
            Stage::Committing => Ok(self.commit()),
            Stage::Finished(status) => bail!("task already finished with {status}"),
        }
    }

    fn generate(&mut self, cursor: Cursor) -> Result<Event> {
        let attempt = cursor.attempt;
        info!(attempt, max_attempts = cursor.max_attempts, "generating proposal");
        let prompt = render_generate_prompt(&PromptInputs {
            task: &self.task.description,
            context: &self.context,
            feedback: self.feedback.as_deref(),
            attempt,
            rules: &self.cfg.rules,
        })?;

        let raw = match self.tools.generator.generate(&prompt) {
            Ok(text) => text,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "generator request failed");
                format!("generator request failed: {err:#}")
            }
        };

        let parse = parse_proposal(&raw);
        self.logger
            .record_attempt(attempt, &parse, self.feedback.as_deref());
        match parse {
            ProposalParse::Ok(proposal) => {
                info!(
                    analysis = %proposal.analysis,
                    files = proposal.files.len(),
                    "proposal parsed"
                );
                self.proposal = Some(proposal);
                Ok(Event::Parsed)
            }
            ProposalParse::ParseError { raw_text } => {
                warn!(excerpt = %char_prefix(&raw_text, 500), "generator response is not a valid proposal");
                self.logger.add_error(PARSE_ERROR);
                self.feedback = Some(PARSE_FEEDBACK.to_string());
                self.proposal = None;
                Ok(Event::ParseFailed)
            }
        }
    }

    fn precheck(&mut self) -> Result<Event> {
        let cfg = self.cfg;
        let target = cfg
            .precheck
            .as_ref()
            .ok_or_else(|| anyhow!("pre-check is not configured"))?;
        let proposal = self
            .proposal
            .as_ref()
            .ok_or_else(|| anyhow!("no proposal to pre-check"))?;

        let combined = proposal
            .files
            .iter()
            .filter_map(|f| f.content.as_deref())
            .collect::<Vec<_>>()
            .join("\n\n");
        if combined.is_empty() {
            debug!("proposal has no content, skipping pre-check");
            return Ok(Event::PrecheckPassed);
        }

        info!(path = %target.write_path.display(), "pre-checking proposal in scratch file");
        let result = match write_scratch(&target.write_path, &combined) {
            Ok(()) => {
                let result = self.tools.verifier.verify_file(&target.verify_arg);
                if let Err(err) = fs::remove_file(&target.write_path) {
                    warn!(err = %err, path = %target.write_path.display(), "could not remove scratch file");
                }
                result
            }
            Err(err) => VerificationResult::fail(format!("{err:#}")),
        };
        self.logger.record_verification(&result);

        if result.passed {
            info!("pre-check passed");
            Ok(Event::PrecheckPassed)
        } else {
            warn!("pre-check failed");
            self.note_verification_failure(&result.output);
            Ok(Event::PrecheckFailed)
        }
    }

    fn apply(&mut self) -> Result<Event> {
        let proposal = self
            .proposal
            .as_ref()
            .ok_or_else(|| anyhow!("no proposal to apply"))?;
        let declared_no_changes = proposal.no_changes_declared;
        let outcome = apply_changes(&self.cfg.repo_root, &proposal.files);
        self.logger.set_files_modified(outcome.written.clone());

        let event = match &outcome.failure {
            Some(failure) => {
                error!(failure = %failure, "applying proposal failed");
                self.logger
                    .add_error(format!("Failed to apply changes: {failure}"));
                Event::ApplyFailed
            }
            None => {
                if outcome.written.is_empty() {
                    if declared_no_changes {
                        info!("generator reports no changes are needed");
                    } else {
                        warn!("proposal produced no file changes");
                        self.logger.add_error(EMPTY_APPLY_ERROR);
                    }
                }
                Event::Applied {
                    written: outcome.written.len(),
                    declared_no_changes,
                }
            }
        };
        self.applied = outcome;
        Ok(event)
    }

    fn verify(&mut self) -> Event {
        info!(files = self.applied.written.len(), "verifying repository");
        let result = self.tools.verifier.verify_all();
        self.logger.record_verification(&result);
        if result.passed {
            info!("verification passed");
            Event::VerifyPassed
        } else {
            warn!("verification failed");
            self.note_verification_failure(&result.output);
            Event::VerifyFailed
        }
    }

    fn rollback(&mut self) -> Event {
        info!(created = self.applied.created.len(), "rolling back working tree");
        let result = self
            .tools
            .vcs
            .discard_all()
            .and_then(|()| remove_created(&self.cfg.repo_root, &self.applied.created));
        match result {
            Ok(()) => {
                self.applied.created.clear();
                Event::RolledBack
            }
            Err(err) => {
                error!(err = %format!("{err:#}"), "rollback failed");
                self.logger.add_error(format!("Rollback failed: {err:#}"));
                Event::RollbackFailed
            }
        }
    }

    fn commit(&mut self) -> Event {
        let message = self.commit_message();
        let mut paths = self.applied.written.clone();

        let backlog = if self.mode.updates_backlog() {
            match self.mark_backlog() {
                Ok(marked) => marked,
                Err(err) => {
                    error!(err = %format!("{err:#}"), "could not update backlog");
                    self.logger
                        .add_error(format!("Git commit/push failed: {err:#}"));
                    return Event::CommitFailed;
                }
            }
        } else {
            None
        };
        if let Some(marked) = &backlog {
            paths.push(marked.relative.clone());
        }

        match self.commit_and_push(&paths, &message) {
            Ok(()) => Event::Committed,
            Err(err) => {
                error!(err = %format!("{err:#}"), "commit failed");
                self.logger
                    .add_error(format!("Git commit/push failed: {err:#}"));
                if let Some(marked) = backlog {
                    marked.restore(self.tools.vcs);
                }
                Event::CommitFailed
            }
        }
    }

    /// Mark the backlog for a task that needed no changes and commit just
    /// that edit.
    fn record_no_changes(&mut self) -> FinalStatus {
        let marked = match self.mark_backlog() {
            Ok(Some(marked)) => marked,
            Ok(None) => return FinalStatus::CompletedNoChanges,
            Err(err) => {
                error!(err = %format!("{err:#}"), "could not update backlog");
                self.logger
                    .add_error(format!("Git commit/push failed: {err:#}"));
                return FinalStatus::FailedCommit;
            }
        };
        let message = format!("chore: mark done: {}", char_prefix(&self.task.description, 50));
        match self.commit_and_push(std::slice::from_ref(&marked.relative), &message) {
            Ok(()) => FinalStatus::CompletedNoChanges,
            Err(err) => {
                error!(err = %format!("{err:#}"), "commit failed");
                self.logger
                    .add_error(format!("Git commit/push failed: {err:#}"));
                marked.restore(self.tools.vcs);
                FinalStatus::FailedCommit
            }
        }
    }

    fn mark_backlog(&self) -> Result<Option<MarkedBacklog>> {
        let path = self.cfg.repo_root.join(&self.cfg.context.backlog_file);
        let previous =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        if !mark_task_complete(&path, &self.task.description)? {
            return Ok(None);
        }
        Ok(Some(MarkedBacklog {
            relative: self.cfg.context.backlog_file.to_string_lossy().into_owned(),
            path,
            previous,
        }))
    }

    fn commit_and_push(&self, paths: &[String], message: &str) -> Result<()> {
        for path in paths {
            self.tools.vcs.add(path)?;
        }
        self.tools.vcs.commit(message)?;
        info!(message, files = paths.len(), "committed");

        if !self.cfg.push {
            return Ok(());
        }
        if self.cfg.confirm_push {
            let confirmed = self
                .tools
                .prompter
                .confirm_push(message)
                .unwrap_or_else(|err| {
                    warn!(err = %format!("{err:#}"), "push confirmation unavailable, not pushing");
                    false
                });
            if !confirmed {
                info!("push skipped, commit remains local");
                return Ok(());
            }
        }
        self.tools.vcs.push()?;
        info!("pushed to remote");
        Ok(())
    }

    fn commit_message(&self) -> String {
        self.proposal
            .as_ref()
            .and_then(|p| p.commit_message.as_deref())
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map_or_else(
                || format!("feat: {}", char_prefix(&self.task.description, 50)),
                str::to_string,
            )
    }

    fn note_verification_failure(&mut self, output: &str) {
        self.logger.add_error(format!("Verification error: {output}"));
        self.feedback = Some(format!(
            "Code verification failed with error:\n{output}\n\nPlease fix the errors."
        ));
    }
}

/// A backlog edit that can be undone if its commit fails.
struct MarkedBacklog {
    relative: String,
    path: PathBuf,
    previous: String,
}

impl MarkedBacklog {
    /// Unstage the edit and put the previous text back.
    fn restore(self, vcs: &dyn Vcs) {
        if let Err(err) = vcs.unstage(&self.relative) {
            warn!(err = %format!("{err:#}"), path = %self.relative, "could not unstage backlog");
        }
        if let Err(err) = fs::write(&self.path, self.previous) {
            warn!(err = %err, path = %self.path.display(), "could not restore backlog");
        }
    }
}

fn write_scratch(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write scratch file {}", path.display()))
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

    #[test]
    fn precheck_target_follows_verifier_workdir() {
        let mut cfg = AgentConfig::default();
        cfg.verifier.workdir = Some(PathBuf::from("checker"));
        cfg.precheck.scratch_file = Some(PathBuf::from("scratch/Check.lean"));
        cfg.generator.extra_rules = vec!["no sorry".to_string()];

        let pipeline = PipelineConfig::from_config(Path::new("/repo"), &cfg);
        let target = pipeline.precheck.expect("precheck");
        assert_eq!(target.write_path, PathBuf::from("/repo/checker/scratch/Check.lean"));
        assert_eq!(target.verify_arg, "scratch/Check.lean");
        assert_eq!(pipeline.rules, vec!["no sorry"]);
        assert!(PipelineConfig::from_config(Path::new("/repo"), &AgentConfig::default())
            .precheck
            .is_none());
    }

    #[test]
    fn char_prefix_keeps_whole_characters() {
        assert_eq!(char_prefix("añadir", 2), "añ");
        assert_eq!(char_prefix("short", 50), "short");
    }
}
