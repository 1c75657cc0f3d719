//! Git adapter for the pipeline.
//!
//! Commits and rollbacks go through a small, explicit wrapper around `git`
//! subprocess calls run in the repository root.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Version-control operations the pipeline depends on.
pub trait Vcs {
    /// Stage one repository-relative path.
    fn add(&self, path: &str) -> Result<()>;
    /// Remove one repository-relative path from the index, keeping the file.
    fn unstage(&self, path: &str) -> Result<()>;
    fn commit(&self, message: &str) -> Result<()>;
    fn push(&self) -> Result<()>;
    /// Discard every uncommitted modification to tracked files.
    fn discard_all(&self) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// True when `workdir` is inside a git work tree.
    pub fn is_repository(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(anyhow!("git {} failed: {}", args.join(" "), detail));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl Vcs for Git {
    #[instrument(skip_all, fields(path))]
    fn add(&self, path: &str) -> Result<()> {
        debug!(path, "staging");
        self.run_checked(&["add", "--", path])?;
        Ok(())
    }

    #[instrument(skip_all, fields(path))]
    fn unstage(&self, path: &str) -> Result<()> {
        debug!(path, "unstaging");
        self.run_checked(&["reset", "-q", "--", path])?;
        Ok(())
    }

    #[instrument(skip_all)]
    fn commit(&self, message: &str) -> Result<()> {
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(())
    }

    #[instrument(skip_all)]
    fn push(&self) -> Result<()> {
        debug!("pushing to remote");
        self.run_checked(&["push"])?;
        Ok(())
    }

    #[instrument(skip_all)]
    fn discard_all(&self) -> Result<()> {
        let output = self.run(&["checkout", "--", "."])?;
        if output.status.success() {
            debug!("working tree restored");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        // A repository without tracked files has nothing to restore.
        if stderr.contains("did not match any file") {
            warn!("no tracked files to restore");
            return Ok(());
        }
        Err(anyhow!("git checkout -- . failed: {}", stderr.trim()))
    }
}
