//! Verifier adapter: runs the repository's checker and reports pass/fail.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::types::VerificationResult;
use crate::io::config::VerifierConfig;
use crate::io::process::run_command;

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// External checker gating every commit.
///
/// Failures to run the checker are reported as a failed result carrying the
/// error text, never as an error.
pub trait Verifier {
    /// Check the whole repository.
    fn verify_all(&self) -> VerificationResult;
    /// Check a single file, relative to the verifier's working directory.
    fn verify_file(&self, path: &str) -> VerificationResult;
}

/// Verifier that spawns a configured command (e.g. `["cargo", "check"]`).
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

impl CommandVerifier {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            workdir: workdir.into(),
            timeout: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    /// Verifier for `repo_root` as described by `[verifier]`.
    pub fn from_config(cfg: &VerifierConfig, repo_root: &Path) -> Self {
        let workdir = cfg
            .workdir
            .as_ref()
            .map_or_else(|| repo_root.to_path_buf(), |dir| repo_root.join(dir));
        Self {
            command: cfg.command.clone(),
            workdir,
            timeout: cfg.timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    fn run(&self, extra: Option<&str>) -> VerificationResult {
        let Some((program, args)) = self.command.split_first() else {
            return VerificationResult::fail("verifier command is empty");
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        if let Some(path) = extra {
            cmd.arg(path);
        }

        match run_command(cmd, None, self.timeout, self.output_limit_bytes) {
            Ok(out) => {
                let passed = out.success();
                debug!(passed, exit_code = ?out.status.code(), "verifier finished");
                VerificationResult {
                    passed,
                    output: out.combined(),
                }
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "verifier could not run");
                VerificationResult::fail(format!("{err:#}"))
            }
        }
    }
}

impl Verifier for CommandVerifier {
    #[instrument(skip_all)]
    fn verify_all(&self) -> VerificationResult {
        self.run(None)
    }

    #[instrument(skip_all, fields(path))]
    fn verify_file(&self, path: &str) -> VerificationResult {
        self.run(Some(path))
    }
}
