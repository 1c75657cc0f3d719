//! Agent configuration stored in `autodev.toml` at the repository root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "autodev.toml";

/// Agent configuration (TOML).
///
/// Every field has a default so an absent or partial file is valid. Command
/// line flags override individual values after loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Generation attempts per task before giving up.
    pub max_attempts: u32,

    /// Upper bound on tasks processed in one backlog run.
    pub max_iterations: u32,

    /// Push after every successful commit.
    pub push: bool,

    /// Ask before each push.
    pub confirm_push: bool,

    /// Directory for task logs and the run log, relative to the repository root.
    pub log_dir: PathBuf,

    pub context: ContextConfig,
    pub generator: GeneratorConfig,
    pub verifier: VerifierConfig,
    pub precheck: PrecheckConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    pub guidelines_file: PathBuf,
    pub backlog_file: PathBuf,
    /// Optional documentation blob included after the backlog.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_file: Option<PathBuf>,
    pub docs_limit_chars: usize,
    /// File extensions (without dot) considered for the existing-file scan.
    /// Empty means every file.
    pub extensions: Vec<String>,
    /// Directory names never descended into.
    pub exclude_dirs: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    /// OpenAI-compatible chat completions endpoint.
    #[default]
    Http,
    /// Local command reading the prompt on stdin.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub backend: GeneratorBackend,
    /// Command for the `command` backend (e.g. `["llm", "-m", "gpt-4o"]`).
    pub command: Vec<String>,
    pub model: String,
    /// Overrides `OPENAI_BASE_URL`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub output_limit_bytes: usize,
    /// Project rules appended to the prompt.
    pub extra_rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifierConfig {
    /// Checker command; `verify_file` appends one path argument.
    pub command: Vec<String>,
    /// Working directory relative to the repository root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PrecheckConfig {
    /// Scratch file, relative to the verifier working directory, used to
    /// check a proposal before it touches the repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_file: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_iterations: 10,
            push: true,
            confirm_push: false,
            log_dir: PathBuf::from("logs"),
            context: ContextConfig::default(),
            generator: GeneratorConfig::default(),
            verifier: VerifierConfig::default(),
            precheck: PrecheckConfig::default(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            guidelines_file: PathBuf::from("CLAUDE.md"),
            backlog_file: PathBuf::from("TODO.md"),
            docs_file: None,
            docs_limit_chars: 30_000,
            extensions: Vec::new(),
            exclude_dirs: vec!["target".to_string(), "node_modules".to_string()],
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: GeneratorBackend::Http,
            command: Vec::new(),
            model: "deepseek-v3-250324".to_string(),
            base_url: None,
            timeout_secs: None,
            output_limit_bytes: 4_000_000,
            extra_rules: Vec::new(),
        }
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            command: vec!["make".to_string(), "check".to_string()],
            workdir: None,
            timeout_secs: None,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl GeneratorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl VerifierConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.context.docs_limit_chars == 0 {
            return Err(anyhow!("context.docs_limit_chars must be > 0"));
        }
        if self.verifier.command.is_empty() || self.verifier.command[0].trim().is_empty() {
            return Err(anyhow!("verifier.command must be a non-empty array"));
        }
        if self.verifier.output_limit_bytes == 0 {
            return Err(anyhow!("verifier.output_limit_bytes must be > 0"));
        }
        if self.verifier.timeout_secs == Some(0) {
            return Err(anyhow!("verifier.timeout_secs must be > 0 when set"));
        }
        if self.generator.timeout_secs == Some(0) {
            return Err(anyhow!("generator.timeout_secs must be > 0 when set"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.generator.backend == GeneratorBackend::Command
            && (self.generator.command.is_empty() || self.generator.command[0].trim().is_empty())
        {
            return Err(anyhow!(
                "generator.command must be a non-empty array for the command backend"
            ));
        }
        if self.generator.backend == GeneratorBackend::Http
            && self.generator.model.trim().is_empty()
        {
            return Err(anyhow!("generator.model must not be empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
