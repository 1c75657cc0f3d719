//! Backlog document parsing and completion marking.
//!
//! The backlog is a markdown document. A `**NEXT STEP**: <desc>` marker takes
//! precedence over the first unchecked `- [ ] <desc>` item. Both operations
//! here work line by line on an in-memory string.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::TaskOrigin;

static NEXT_STEP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*NEXT STEP\*\*:[ \t]*(.+)").expect("next step regex")
});

static UNCHECKED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*- \[ \][ \t]*(.+)").expect("unchecked regex"));

/// A task description pulled out of the backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogItem {
    pub description: String,
    pub origin: TaskOrigin,
}

/// Return the next pending backlog item, if any.
pub fn next_item(text: &str) -> Option<BacklogItem> {
    let next_step = text
        .lines()
        .filter_map(|line| capture(&NEXT_STEP_RE, line))
        .next();
    if let Some(description) = next_step {
        return Some(BacklogItem {
            description,
            origin: TaskOrigin::BacklogNextStep,
        });
    }
    text.lines()
        .filter_map(|line| capture(&UNCHECKED_RE, line))
        .next()
        .map(|description| BacklogItem {
            description,
            origin: TaskOrigin::BacklogUnchecked,
        })
}

/// Mark every line whose pending description equals `description` as done.
///
/// Returns the rewritten document and whether anything changed. Line endings
/// are preserved.
pub fn mark_complete(text: &str, description: &str) -> (String, bool) {
    let wanted = description.trim();
    let mut changed = false;
    let mut out = String::with_capacity(text.len() + 16);

    for line in text.split_inclusive('\n') {
        let (body, ending) = split_ending(line);
        let rewritten = if capture(&NEXT_STEP_RE, body).as_deref() == Some(wanted) {
            Some(strike_next_step(body))
        } else if capture(&UNCHECKED_RE, body).as_deref() == Some(wanted) {
            Some(body.replacen("- [ ]", "- [x]", 1))
        } else {
            None
        };
        match rewritten {
            Some(new_body) => {
                changed = true;
                out.push_str(&new_body);
            }
            None => out.push_str(body),
        }
        out.push_str(ending);
    }

    (out, changed)
}

fn strike_next_step(line: &str) -> String {
    let struck = line.replacen("**NEXT STEP**", "~~NEXT STEP~~", 1);
    if UNCHECKED_RE.is_match(&struck) {
        struck.replacen("- [ ]", "- [x]", 1)
    } else {
        struck
    }
}

fn capture(re: &Regex, line: &str) -> Option<String> {
    let caps = re.captures(line)?;
    let desc = caps.get(1)?.as_str().trim();
    if desc.is_empty() {
        None
    } else {
        Some(desc.to_string())
    }
}

fn split_ending(line: &str) -> (&str, &str) {
    let body_len = line.trim_end_matches(['\n', '\r']).len();
    line.split_at(body_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKLOG: &str = "\
# TODO

- [x] Set up project
- [ ] Add parser
- [ ] **NEXT STEP**: Implement lexer
- [ ] Write docs
";

    #[test]
    fn next_step_marker_wins_over_unchecked() {
        let item = next_item(BACKLOG).expect("item");
        assert_eq!(item.description, "Implement lexer");
        assert_eq!(item.origin, TaskOrigin::BacklogNextStep);
    }

    #[test]
    fn falls_back_to_first_unchecked() {
        let item = next_item("- [x] done\n- [ ] second\n- [ ] third\n").expect("item");
        assert_eq!(item.description, "second");
        assert_eq!(item.origin, TaskOrigin::BacklogUnchecked);
    }

    #[test]
    fn empty_or_finished_backlog_has_no_item() {
        assert_eq!(next_item(""), None);
        assert_eq!(next_item("- [x] all done\n- [x] ~~NEXT STEP~~: old\n"), None);
        assert_eq!(next_item("- [ ]   \n"), None);
    }

    #[test]
    fn marks_next_step_checkbox_and_marker() {
        let (out, changed) = mark_complete(BACKLOG, "Implement lexer");
        assert!(changed);
        assert!(out.contains("- [x] ~~NEXT STEP~~: Implement lexer\n"));
        assert!(out.contains("- [ ] Add parser\n"));
    }

    #[test]
    fn marks_bare_next_step_marker() {
        let (out, changed) = mark_complete("**NEXT STEP**: ship it\n", "ship it");
        assert!(changed);
        assert_eq!(out, "~~NEXT STEP~~: ship it\n");
    }

    #[test]
    fn marks_unchecked_item() {
        let (out, changed) = mark_complete("- [ ] Add parser\r\n- [ ] Other\r\n", "Add parser");
        assert!(changed);
        assert_eq!(out, "- [x] Add parser\r\n- [ ] Other\r\n");
    }

    #[test]
    fn unknown_description_leaves_text_untouched() {
        let (out, changed) = mark_complete(BACKLOG, "Nope");
        assert!(!changed);
        assert_eq!(out, BACKLOG);
    }

    #[test]
    fn marking_then_extracting_never_repeats_description() {
        let doc = "\
**NEXT STEP**: dup
- [ ] dup
- [ ] **NEXT STEP**: dup
- [ ] other
";
        let mut text = doc.to_string();
        let mut seen = Vec::new();
        while let Some(item) = next_item(&text) {
            assert!(
                !seen.contains(&item.description),
                "repeated {}",
                item.description
            );
            let (out, changed) = mark_complete(&text, &item.description);
            assert!(changed);
            seen.push(item.description);
            text = out;
        }
        assert_eq!(seen, vec!["dup".to_string(), "other".to_string()]);
    }
}
