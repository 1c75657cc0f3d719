//! Repository context assembled for each generation request.
//!
//! Sections appear in a fixed order: guidelines, backlog, documentation,
//! then existing files whose name matches a task keyword.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::io::config::ContextConfig;

pub const TRUNCATION_NOTICE: &str = "[Context truncated for length...]";

/// A repository file included verbatim in the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingFile {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub content: String,
}

/// Build the context text for `task` from the repository at `repo_root`.
///
/// `log_dir` is never scanned for existing files, even when it lives inside
/// the repository.
pub fn assemble_context(
    repo_root: &Path,
    cfg: &ContextConfig,
    task: &str,
    log_dir: &Path,
) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();

    let guidelines = repo_root.join(&cfg.guidelines_file);
    if guidelines.is_file() {
        parts.push(format!(
            "=== {} (Development Guidelines) ===",
            cfg.guidelines_file.display()
        ));
        parts.push(read_text(&guidelines)?);
    }

    let backlog = repo_root.join(&cfg.backlog_file);
    if backlog.is_file() {
        parts.push(format!(
            "\n=== {} (Current Tasks) ===",
            cfg.backlog_file.display()
        ));
        parts.push(read_text(&backlog)?);
    }

    if let Some(docs_file) = &cfg.docs_file {
        let docs = resolve(repo_root, docs_file);
        if docs.is_file() {
            let (text, truncated) = truncate_chars(&read_text(&docs)?, cfg.docs_limit_chars);
            debug!(path = %docs.display(), truncated, "including documentation");
            parts.push("\n=== Documentation ===".to_string());
            parts.push(text);
            if truncated {
                parts.push(format!("\n{TRUNCATION_NOTICE}"));
            }
        } else {
            warn!(path = %docs.display(), "documentation file not found, skipping");
        }
    }

    let existing = find_existing_files(repo_root, cfg, task, log_dir);
    if !existing.is_empty() {
        parts.push("\n=== EXISTING FILES (to be modified carefully) ===".to_string());
        for file in &existing {
            let lang = Path::new(&file.path)
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_default();
            parts.push(format!(
                "\nFile: {}\n```{lang}\n{}\n```",
                file.path, file.content
            ));
        }
    }

    debug!(
        sections = parts.len(),
        existing_files = existing.len(),
        "context assembled"
    );
    Ok(parts.join("\n"))
}

/// Files whose name contains any lowercased whitespace-delimited task token.
///
/// Hidden entries, excluded directories and `log_dir` are skipped; unreadable
/// or non-UTF-8 files are skipped with a warning. Results are sorted by path.
pub fn find_existing_files(
    repo_root: &Path,
    cfg: &ContextConfig,
    task: &str,
    log_dir: &Path,
) -> Vec<ExistingFile> {
    let keywords: Vec<String> = task.split_whitespace().map(str::to_lowercase).collect();
    if keywords.is_empty() {
        return Vec::new();
    }

    let root = canonical(repo_root);
    let log_dir = canonical(&resolve(&root, log_dir));
    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            if name.starts_with('.') {
                return false;
            }
            if !e.file_type().is_dir() {
                return true;
            }
            e.path() != log_dir.as_path() && !cfg.exclude_dirs.iter().any(|d| d.as_str() == name)
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(err = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !extension_allowed(path, &cfg.extensions) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if !keywords.iter().any(|k| name.contains(k.as_str())) {
            continue;
        }
        let Ok(relative) = path.strip_prefix(&root) else {
            continue;
        };
        match fs::read_to_string(path) {
            Ok(content) => files.push(ExistingFile {
                path: to_slash(relative),
                content,
            }),
            Err(err) => warn!(path = %path.display(), err = %err, "could not read file, skipping"),
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// Keep at most `limit` characters, never splitting a character.
pub fn truncate_chars(text: &str, limit: usize) -> (String, bool) {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

fn extension_allowed(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .map(|ext| ext.to_string_lossy())
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
        })
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}
