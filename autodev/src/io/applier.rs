//! Writes proposal files into the repository.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::types::FileChange;

/// What an apply pass did to the working tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Repository-relative paths written, in proposal order.
    pub written: Vec<String>,
    /// Subset of `written` that did not exist before.
    pub created: Vec<String>,
    /// Entries ignored with a warning (missing content, unsafe path).
    pub skipped: Vec<String>,
    /// Set when a write failed part-way; earlier writes remain on disk.
    pub failure: Option<String>,
}

/// Write every change under `repo_root`.
///
/// Entries without content or with a path escaping the repository are
/// skipped. The first I/O error stops the pass and is recorded in
/// [`ApplyOutcome::failure`].
pub fn apply_changes(repo_root: &Path, files: &[FileChange]) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();
    for change in files {
        let Some(relative) = safe_relative_path(&change.path) else {
            warn!(path = %change.path, "refusing path outside repository");
            outcome.skipped.push(change.path.clone());
            continue;
        };
        let Some(content) = change.content.as_deref() else {
            warn!(path = %change.path, action = change.action.as_str(), "no content provided, skipping");
            outcome.skipped.push(change.path.clone());
            continue;
        };

        let target = repo_root.join(&relative);
        let existed = target.exists();
        info!(
            path = %change.path,
            action = change.action.as_str(),
            explanation = %change.explanation,
            "writing file"
        );
        if let Err(err) = write_file(&target, content) {
            warn!(path = %change.path, err = %format!("{err:#}"), "write failed");
            outcome.failure = Some(format!("{err:#}"));
            break;
        }
        if !existed {
            outcome.created.push(change.path.clone());
        }
        outcome.written.push(change.path.clone());
    }
    debug!(
        written = outcome.written.len(),
        created = outcome.created.len(),
        skipped = outcome.skipped.len(),
        failed = outcome.failure.is_some(),
        "apply finished"
    );
    outcome
}

/// Delete files an apply pass created. Missing files are ignored.
pub fn remove_created(repo_root: &Path, created: &[String]) -> Result<()> {
    for path in created {
        let Some(relative) = safe_relative_path(path) else {
            continue;
        };
        let target = repo_root.join(relative);
        match fs::remove_file(&target) {
            Ok(()) => debug!(path = %path, "removed created file"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("remove {}", target.display()));
            }
        }
    }
    Ok(())
}

/// Normalize a proposal path, rejecting anything that could leave the
/// repository or touch `.git`.
pub fn safe_relative_path(path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(path.trim()).components() {
        match component {
            Component::Normal(part) => {
                if out.as_os_str().is_empty() && part == ".git" {
                    return None;
                }
                out.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

fn write_file(target: &Path, content: &str) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(target, content).with_context(|| format!("write {}", target.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FileAction;

    fn change(path: &str, content: Option<&str>) -> FileChange {
        FileChange {
            path: path.to_string(),
            action: FileAction::Create,
            content: content.map(str::to_string),
            explanation: String::new(),
        }
    }

    #[test]
    fn writes_files_and_tracks_created() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("old.txt"), "old").expect("write");

        let outcome = apply_changes(
            temp.path(),
            &[
                change("old.txt", Some("new")),
                change("nested/dir/fresh.txt", Some("fresh")),
            ],
        );
        assert_eq!(outcome.written, vec!["old.txt", "nested/dir/fresh.txt"]);
        assert_eq!(outcome.created, vec!["nested/dir/fresh.txt"]);
        assert!(outcome.failure.is_none());
        assert_eq!(
            fs::read_to_string(temp.path().join("nested/dir/fresh.txt")).expect("read"),
            "fresh"
        );

        remove_created(temp.path(), &outcome.created).expect("remove");
        assert!(!temp.path().join("nested/dir/fresh.txt").exists());
        assert!(temp.path().join("old.txt").exists());
        // Second removal is a no-op.
        remove_created(temp.path(), &outcome.created).expect("remove again");
    }

    #[test]
    fn skips_missing_content_and_unsafe_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outcome = apply_changes(
            temp.path(),
            &[
                change("a.txt", None),
                change("../escape.txt", Some("x")),
                change("/etc/passwd", Some("x")),
                change(".git/config", Some("x")),
            ],
        );
        assert!(outcome.written.is_empty());
        assert_eq!(outcome.skipped.len(), 4);
        assert!(!temp.path().join("a.txt").exists());
    }

    #[test]
    fn write_error_stops_the_pass() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("blocker"), "file").expect("write");
        let outcome = apply_changes(
            temp.path(),
            &[
                change("first.txt", Some("1")),
                change("blocker/inner.txt", Some("2")),
                change("third.txt", Some("3")),
            ],
        );
        assert_eq!(outcome.written, vec!["first.txt"]);
        assert_eq!(outcome.created, vec!["first.txt"]);
        assert!(outcome.failure.is_some());
        assert!(!temp.path().join("third.txt").exists());
    }

    #[test]
    fn normalizes_relative_paths() {
        assert_eq!(
            safe_relative_path("./src//lib.rs"),
            Some(PathBuf::from("src/lib.rs"))
        );
        assert_eq!(safe_relative_path(""), None);
        assert_eq!(safe_relative_path("."), None);
        assert_eq!(safe_relative_path("a/../../b"), None);
    }
}
