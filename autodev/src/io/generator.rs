//! Generator backends.
//!
//! The [`Generator`] trait decouples the pipeline from the text-generation
//! service. Tests use scripted generators that return predetermined responses
//! without spawning processes or opening connections.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::io::config::{GeneratorBackend, GeneratorConfig};
use crate::io::process::run_command;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Abstraction over text-generation backends.
pub trait Generator {
    /// Send `prompt` and return the raw response text.
    fn generate(&self, prompt: &str) -> Result<String>;
}

/// Generator that pipes the prompt into a local command and reads stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(prompt_len = prompt.len()))]
    fn generate(&self, prompt: &str) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("generator command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);

        info!(program = %program, "running generator command");
        let out = run_command(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )?;
        if !out.success() {
            bail!(
                "generator command exited with {:?}: {}",
                out.status.code(),
                out.combined().trim()
            );
        }
        let text = out.stdout_lossy();
        debug!(response_len = text.len(), "generator command finished");
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Generator backed by an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Option<Duration>,
}

impl HttpGenerator {
    /// Build from config, reading the key (and base URL unless configured)
    /// from the environment.
    pub fn from_env(cfg: &GeneratorConfig) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .with_context(|| format!("{API_KEY_ENV} must be set for the http generator"))?;
        let base_url = cfg
            .base_url
            .clone()
            .or_else(|| std::env::var(BASE_URL_ENV).ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            base_url,
            api_key,
            model: cfg.model.clone(),
            timeout: cfg.timeout(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl Generator for HttpGenerator {
    #[instrument(skip_all, fields(model = %self.model, prompt_len = prompt.len()))]
    fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::to_string(&ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        })
        .context("serialize chat request")?;

        let config = ureq::Agent::config_builder()
            .timeout_global(self.timeout)
            .build();
        let agent = ureq::Agent::new_with_config(config);

        let url = self.endpoint();
        info!(url = %url, "requesting completion");
        let text = agent
            .post(&url)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .send(body)
            .with_context(|| format!("POST {url}"))?
            .into_body()
            .read_to_string()
            .context("read completion body")?;

        let content = parse_chat_response(&text)?;
        debug!(response_len = content.len(), "completion received");
        Ok(content)
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
pub fn parse_chat_response(body: &str) -> Result<String> {
    let response: ChatResponse =
        serde_json::from_str(body).context("parse chat completion response")?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| anyhow!("chat completion response has no message content"))
}

/// Construct the configured backend.
pub fn build_generator(cfg: &GeneratorConfig, workdir: PathBuf) -> Result<Box<dyn Generator>> {
    match cfg.backend {
        GeneratorBackend::Command => Ok(Box::new(CommandGenerator {
            command: cfg.command.clone(),
            workdir,
            timeout: cfg.timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        })),
        GeneratorBackend::Http => Ok(Box::new(HttpGenerator::from_env(cfg)?)),
    }
}
