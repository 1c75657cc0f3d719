//! Shared types for the pipeline core.
//!
//! These types define the contracts between the task source, generator,
//! applier, verifier and the attempt log. They carry no I/O.

use serde::{Deserialize, Serialize};

/// Where a task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    /// A `**NEXT STEP**:` marker in the backlog.
    BacklogNextStep,
    /// The first unchecked `- [ ]` item in the backlog.
    BacklogUnchecked,
    /// Supplied on the command line or typed interactively.
    Manual,
}

/// A unit of work. Immutable for the duration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    pub origin: TaskOrigin,
    /// Backlog contents at extraction time (absent for manual tasks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backlog_snapshot: Option<String>,
}

impl Task {
    pub fn manual(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            origin: TaskOrigin::Manual,
            backlog_snapshot: None,
        }
    }
}

/// How the run loop is driving tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    Backlog,
    SingleTask,
    Interactive,
}

impl TaskMode {
    /// Only backlog runs rewrite the backlog after a success.
    pub fn updates_backlog(self) -> bool {
        matches!(self, TaskMode::Backlog)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    #[default]
    Modify,
}

impl FileAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FileAction::Create => "create",
            FileAction::Modify => "modify",
        }
    }
}

/// One file the generator wants written.
///
/// `content` is the full resulting file; the pipeline never merges or patches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(default)]
    pub action: FileAction,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub explanation: String,
}

/// A structurally valid generator response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeProposal {
    pub analysis: String,
    pub files: Vec<FileChange>,
    pub commit_message: Option<String>,
    pub verification_notes: String,
    /// True when an empty `files` list was intended as "nothing to do".
    pub no_changes_declared: bool,
}

/// Outcome of turning backend text into a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalParse {
    Ok(ChangeProposal),
    ParseError { raw_text: String },
}

/// Result of one verifier invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub output: String,
}

impl VerificationResult {
    pub fn pass(output: impl Into<String>) -> Self {
        Self {
            passed: true,
            output: output.into(),
        }
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
        }
    }
}

/// Terminal state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    CompletedSuccessfully,
    CompletedNoChanges,
    FailedJsonParsing,
    FailedVerification,
    FailedImplementationError,
    FailedCommit,
    FailedUnknown,
}

impl FinalStatus {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            FinalStatus::CompletedSuccessfully | FinalStatus::CompletedNoChanges
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FinalStatus::CompletedSuccessfully => "completed_successfully",
            FinalStatus::CompletedNoChanges => "completed_no_changes",
            FinalStatus::FailedJsonParsing => "failed_json_parsing",
            FinalStatus::FailedVerification => "failed_verification",
            FinalStatus::FailedImplementationError => "failed_implementation_error",
            FinalStatus::FailedCommit => "failed_commit",
            FinalStatus::FailedUnknown => "failed_unknown",
        }
    }
}

impl std::fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_status_serializes_snake_case() {
        let json = serde_json::to_string(&FinalStatus::FailedJsonParsing).expect("json");
        assert_eq!(json, "\"failed_json_parsing\"");
        assert_eq!(FinalStatus::FailedJsonParsing.as_str(), "failed_json_parsing");
    }

    #[test]
    fn only_completed_statuses_count_as_success() {
        assert!(FinalStatus::CompletedSuccessfully.is_success());
        assert!(FinalStatus::CompletedNoChanges.is_success());
        assert!(!FinalStatus::FailedCommit.is_success());
        assert!(!FinalStatus::FailedUnknown.is_success());
    }

    #[test]
    fn file_change_defaults_to_modify() {
        let change: FileChange =
            serde_json::from_str(r#"{"path":"a.txt","content":"x"}"#).expect("parse");
        assert_eq!(change.action, FileAction::Modify);
        assert_eq!(change.explanation, "");
    }
}
