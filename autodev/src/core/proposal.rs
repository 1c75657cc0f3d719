//! Turning generator output into a [`ChangeProposal`].
//!
//! The generator is asked for a JSON object, but real responses often wrap it
//! in a fenced code block or surround it with prose. Extraction prefers a
//! fenced block and otherwise treats the whole trimmed response as JSON. Any
//! failure is reported as [`ProposalParse::ParseError`]; nothing here panics
//! on backend output.

use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::core::types::{ChangeProposal, FileChange, ProposalParse};

const PROPOSAL_SCHEMA: &str = include_str!("../../schemas/change_proposal.schema.json");

static PROPOSAL_VALIDATOR: LazyLock<jsonschema::Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(PROPOSAL_SCHEMA).expect("proposal schema json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("proposal schema compiles")
});

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence regex")
});

#[derive(Debug, Deserialize)]
struct RawProposal {
    #[serde(default)]
    analysis: String,
    files: Option<Vec<FileChange>>,
    #[serde(default)]
    commit_message: Option<String>,
    #[serde(default)]
    verification_notes: String,
    #[serde(default)]
    no_changes_needed: Option<bool>,
}

/// Return the JSON candidate inside `raw`: the first fenced object, or the
/// trimmed text.
pub fn extract_json(raw: &str) -> &str {
    FENCE_RE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| raw.trim(), |m| m.as_str())
}

/// Parse a raw generator response.
pub fn parse_proposal(raw: &str) -> ProposalParse {
    match try_parse(raw) {
        Ok(proposal) => ProposalParse::Ok(proposal),
        Err(err) => {
            debug!(err = %format!("{err:#}"), "generator response rejected");
            ProposalParse::ParseError {
                raw_text: raw.to_string(),
            }
        }
    }
}

fn try_parse(raw: &str) -> Result<ChangeProposal> {
    let value: Value = serde_json::from_str(extract_json(raw)).context("parse proposal json")?;
    validate_schema(&value)?;
    let parsed: RawProposal = serde_json::from_value(value).context("deserialize proposal")?;

    // Only an explicitly empty `files` array can declare "no changes".
    let declared_empty = parsed.files.as_ref().is_some_and(Vec::is_empty);
    let no_changes_declared = declared_empty && parsed.no_changes_needed != Some(false);

    Ok(ChangeProposal {
        analysis: parsed.analysis,
        files: parsed.files.unwrap_or_default(),
        commit_message: parsed.commit_message,
        verification_notes: parsed.verification_notes,
        no_changes_declared,
    })
}

fn validate_schema(instance: &Value) -> Result<()> {
    let messages: Vec<String> = PROPOSAL_VALIDATOR
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("proposal schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
