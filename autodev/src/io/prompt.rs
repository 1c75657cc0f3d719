//! Prompt builder for generator requests.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");

/// Inputs for one generation request.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub task: &'a str,
    /// Assembled repository context.
    pub context: &'a str,
    /// Diagnostics from the previous failed attempt, if any.
    pub feedback: Option<&'a str>,
    pub attempt: u32,
    /// Project-specific rules appended to the generic instructions.
    pub rules: &'a [String],
}

/// Render the generation prompt.
pub fn render_generate_prompt(inputs: &PromptInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("generate", GENERATE_TEMPLATE)
        .context("load generate template")?;
    let template = env.get_template("generate")?;
    let rendered = template
        .render(context! {
            task => inputs.task.trim(),
            context => inputs.context.trim(),
            feedback => inputs.feedback.map(str::trim).filter(|s| !s.is_empty()),
            attempt => inputs.attempt,
            rules => inputs.rules,
        })
        .context("render generate template")?;
    debug!(
        prompt_len = rendered.len(),
        attempt = inputs.attempt,
        "rendered generation prompt"
    );
    Ok(rendered)
}
