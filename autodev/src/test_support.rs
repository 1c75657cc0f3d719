//! Test-only helpers: throwaway git repositories and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use tempfile::TempDir;

use crate::core::types::VerificationResult;
use crate::io::generator::Generator;
use crate::io::git::{Git, Vcs};
use crate::io::prompter::Prompter;
use crate::io::verifier::Verifier;

/// `git init` with a committer identity and one commit containing `README.md`.
pub fn init_git_repo(root: &Path) {
    git(root, &["init", "-q"]);
    git(root, &["config", "user.email", "test@example.com"]);
    git(root, &["config", "user.name", "test"]);
    git(root, &["config", "commit.gpgsign", "false"]);
    fs::write(root.join("README.md"), "hi\n").expect("write README.md");
    git(root, &["add", "README.md"]);
    git(root, &["commit", "-q", "-m", "chore: init"]);
}

fn git(root: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(root)
        .status()
        .unwrap_or_else(|err| panic!("git {}: {err}", args.join(" ")));
    assert!(status.success(), "git {} failed", args.join(" "));
}

/// A temporary git repository with an initial commit.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp repo")?;
        init_git_repo(dir.path());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.path())
    }

    pub fn write(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn read(&self, relative: &str) -> Result<String> {
        let path = self.path().join(relative);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Stage everything and commit it.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        git(self.path(), &["add", "-A"]);
        git(self.path(), &["commit", "-q", "-m", message]);
        Ok(())
    }

    /// True when `git status` reports nothing, untracked files included.
    pub fn is_clean(&self) -> bool {
        self.git_lines(&["status", "--porcelain=v1", "-uall"]).is_empty()
    }

    /// Paths staged in the index.
    pub fn staged(&self) -> Vec<String> {
        self.git_lines(&["diff", "--cached", "--name-only"])
    }

    fn git_lines(&self, args: &[&str]) -> Vec<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .unwrap_or_else(|err| panic!("git {}: {err}", args.join(" ")));
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Subjects of every commit, newest first.
    pub fn log_subjects(&self) -> Result<Vec<String>> {
        let output = Command::new("git")
            .args(["log", "--format=%s"])
            .current_dir(self.path())
            .output()
            .context("git log")?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

/// Generator returning queued responses in order.
///
/// `Err` entries simulate backend failures.
#[derive(Default)]
pub struct ScriptedGenerator {
    responses: RefCell<VecDeque<Result<String, String>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Shorthand for a script of successful responses.
    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => bail!("{message}"),
            None => bail!("scripted generator exhausted"),
        }
    }
}

/// Verifier returning queued results for whole-repo and single-file checks.
///
/// An exhausted queue yields a failing result.
#[derive(Default)]
pub struct ScriptedVerifier {
    all: RefCell<VecDeque<VerificationResult>>,
    files: RefCell<VecDeque<VerificationResult>>,
    file_args: RefCell<Vec<String>>,
    all_calls: RefCell<usize>,
}

impl ScriptedVerifier {
    pub fn new(all: Vec<VerificationResult>) -> Self {
        Self {
            all: RefCell::new(all.into()),
            ..Self::default()
        }
    }

    pub fn with_file_results(self, files: Vec<VerificationResult>) -> Self {
        *self.files.borrow_mut() = files.into();
        self
    }

    pub fn all_calls(&self) -> usize {
        *self.all_calls.borrow()
    }

    pub fn file_args(&self) -> Vec<String> {
        self.file_args.borrow().clone()
    }
}

impl Verifier for ScriptedVerifier {
    fn verify_all(&self) -> VerificationResult {
        *self.all_calls.borrow_mut() += 1;
        self.all
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| VerificationResult::fail("no scripted verification left"))
    }

    fn verify_file(&self, path: &str) -> VerificationResult {
        self.file_args.borrow_mut().push(path.to_string());
        self.files
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| VerificationResult::fail("no scripted verification left"))
    }
}

/// A call observed by [`RecordingVcs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsCall {
    Add(String),
    Unstage(String),
    Commit(String),
    Push,
    DiscardAll,
}

/// Vcs that records calls, optionally forwarding them to a real [`Git`].
#[derive(Default)]
pub struct RecordingVcs {
    inner: Option<Git>,
    calls: RefCell<Vec<VcsCall>>,
    commit_error: Option<String>,
    push_error: Option<String>,
    discard_error: Option<String>,
}

impl RecordingVcs {
    pub fn over(git: Git) -> Self {
        Self {
            inner: Some(git),
            ..Self::default()
        }
    }

    pub fn failing_commit(mut self, message: &str) -> Self {
        self.commit_error = Some(message.to_string());
        self
    }

    pub fn failing_push(mut self, message: &str) -> Self {
        self.push_error = Some(message.to_string());
        self
    }

    pub fn failing_discard(mut self, message: &str) -> Self {
        self.discard_error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<VcsCall> {
        self.calls.borrow().clone()
    }

    pub fn commits(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                VcsCall::Commit(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &VcsCall) -> usize {
        self.calls.borrow().iter().filter(|c| *c == call).count()
    }
}

impl Vcs for RecordingVcs {
    fn add(&self, path: &str) -> Result<()> {
        self.calls.borrow_mut().push(VcsCall::Add(path.to_string()));
        match &self.inner {
            Some(git) => git.add(path),
            None => Ok(()),
        }
    }

    fn unstage(&self, path: &str) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(VcsCall::Unstage(path.to_string()));
        match &self.inner {
            Some(git) => git.unstage(path),
            None => Ok(()),
        }
    }

    fn commit(&self, message: &str) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(VcsCall::Commit(message.to_string()));
        if let Some(err) = &self.commit_error {
            bail!("{err}");
        }
        match &self.inner {
            Some(git) => git.commit(message),
            None => Ok(()),
        }
    }

    fn push(&self) -> Result<()> {
        self.calls.borrow_mut().push(VcsCall::Push);
        if let Some(err) = &self.push_error {
            bail!("{err}");
        }
        Ok(())
    }

    fn discard_all(&self) -> Result<()> {
        self.calls.borrow_mut().push(VcsCall::DiscardAll);
        if let Some(err) = &self.discard_error {
            bail!("{err}");
        }
        match &self.inner {
            Some(git) => git.discard_all(),
            None => Ok(()),
        }
    }
}

/// Prompter answering from queues. Exhausted queues decline and end input.
#[derive(Default)]
pub struct ScriptedPrompter {
    confirmations: RefCell<VecDeque<bool>>,
    tasks: RefCell<VecDeque<String>>,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confirmations(self, answers: Vec<bool>) -> Self {
        *self.confirmations.borrow_mut() = answers.into();
        self
    }

    pub fn with_tasks<I, S>(self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.tasks.borrow_mut() = tasks.into_iter().map(Into::into).collect();
        self
    }

    /// Summaries passed to `confirm_push`.
    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm_push(&self, summary: &str) -> Result<bool> {
        self.asked.borrow_mut().push(summary.to_string());
        Ok(self.confirmations.borrow_mut().pop_front().unwrap_or(false))
    }

    fn next_task(&self) -> Result<Option<String>> {
        Ok(self.tasks.borrow_mut().pop_front())
    }
}

/// A well-formed proposal writing `files` as `(path, content)` pairs.
pub fn proposal_json(
    analysis: &str,
    files: &[(&str, &str)],
    commit_message: Option<&str>,
) -> String {
    let files: Vec<serde_json::Value> = files
        .iter()
        .map(|(path, content)| {
            serde_json::json!({
                "path": path,
                "action": "create",
                "content": content,
                "explanation": "scripted change",
            })
        })
        .collect();
    serde_json::json!({
        "analysis": analysis,
        "files": files,
        "commit_message": commit_message,
        "verification_notes": "",
    })
    .to_string()
}

/// A proposal declaring that no changes are needed.
pub fn no_changes_json() -> String {
    serde_json::json!({
        "analysis": "already done",
        "files": [],
        "commit_message": null,
        "verification_notes": "",
        "no_changes_needed": true,
    })
    .to_string()
}
