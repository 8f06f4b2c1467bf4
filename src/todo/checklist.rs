//! Three-state checklist parsing and toggling.
//!
//! Items are markdown checkboxes: `- [ ]` pending, `- [>]` in progress
//! (`- [-]` and `- [~]` are read as in progress too) and `- [x]` completed.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{Result, TodoError};

/// Matches one checkbox line, capturing indent, mark and item text.
fn checkbox_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)- \[([ xX>~-])\] (.+)$").expect("checkbox pattern is a valid regex")
    })
}

/// State of a single checklist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistStatus {
    Pending,
    InProgress,
    Completed,
}

impl ChecklistStatus {
    fn from_mark(mark: &str) -> Self {
        match mark {
            "x" | "X" => Self::Completed,
            ">" | "-" | "~" => Self::InProgress,
            _ => Self::Pending,
        }
    }

    /// Canonical checkbox mark written back to disk.
    #[must_use]
    pub fn mark(&self) -> char {
        match self {
            Self::Pending => ' ',
            Self::InProgress => '>',
            Self::Completed => 'x',
        }
    }

    /// Next state in the `pending -> in_progress -> completed -> pending` cycle.
    #[must_use]
    pub fn next(&self) -> Self {
        match self {
            Self::Pending => Self::InProgress,
            Self::InProgress => Self::Completed,
            Self::Completed => Self::Pending,
        }
    }
}

/// A parsed checklist item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub text: String,
    pub status: ChecklistStatus,
}

/// Check a single line against checkbox syntax.
#[must_use]
pub fn is_checkbox_line(line: &str) -> bool {
    checkbox_regex().is_match(line)
}

/// Parse every checkbox line in `content`; other lines are ignored.
#[must_use]
pub fn parse_checklist(content: &str) -> Vec<ChecklistItem> {
    content
        .lines()
        .filter_map(|line| checkbox_regex().captures(line))
        .map(|caps| ChecklistItem {
            text: caps[3].trim().to_string(),
            status: ChecklistStatus::from_mark(&caps[2]),
        })
        .collect()
}

/// Find the item a toggle of `item_text` applies to.
///
/// An exact (trimmed) text match wins; otherwise the first item containing
/// `item_text` case-insensitively is picked.
#[must_use]
pub fn match_item(content: &str, item_text: &str) -> Option<ChecklistItem> {
    let lines: Vec<&str> = content.split('\n').collect();
    let target = target_line(&lines, item_text.trim())?;
    let caps = checkbox_regex().captures(lines[target])?;
    Some(ChecklistItem {
        text: caps[3].trim().to_string(),
        status: ChecklistStatus::from_mark(&caps[2]),
    })
}

/// Advance the item picked by [`match_item`] one step through the cycle.
/// Only the checkbox mark is rewritten, the rest of the content is
/// preserved byte for byte. Returns the new content and the toggled item
/// in its new state.
///
/// # Errors
///
/// Returns a validation error when no item matches.
pub fn toggle_item(content: &str, item_text: &str) -> Result<(String, ChecklistItem)> {
    let wanted = item_text.trim();
    if wanted.is_empty() {
        return Err(TodoError::validation("content", "item text to toggle is empty"));
    }

    let lines: Vec<&str> = content.split('\n').collect();
    let target = target_line(&lines, wanted).ok_or_else(|| {
        TodoError::validation("content", format!("checklist item '{wanted}' not found"))
    })?;

    let caps = checkbox_regex()
        .captures(lines[target])
        .ok_or_else(|| TodoError::internal("checklist line changed while toggling"))?;
    let item = ChecklistItem {
        text: caps[3].trim().to_string(),
        status: ChecklistStatus::from_mark(&caps[2]).next(),
    };
    let rewritten = format!("{}- [{}] {}", &caps[1], item.status.mark(), &caps[3]);

    let mut out: Vec<String> = lines.iter().map(|l| (*l).to_string()).collect();
    out[target] = rewritten;
    Ok((out.join("\n"), item))
}

fn target_line(lines: &[&str], wanted: &str) -> Option<usize> {
    if wanted.is_empty() {
        return None;
    }
    find_item(lines, |text| text == wanted).or_else(|| {
        let lowered = wanted.to_lowercase();
        find_item(lines, |text| text.to_lowercase().contains(&lowered))
    })
}

fn find_item(lines: &[&str], matches: impl Fn(&str) -> bool) -> Option<usize> {
    lines.iter().position(|line| {
        checkbox_regex()
            .captures(line)
            .is_some_and(|caps| matches(caps[3].trim()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_three_states() {
        let items = parse_checklist("- [ ] A\n- [>] B\n- [x] C\n- [-] D\n- [~] E\n- [X] F");
        let states: Vec<_> = items.iter().map(|i| i.status).collect();
        assert_eq!(
            states,
            vec![
                ChecklistStatus::Pending,
                ChecklistStatus::InProgress,
                ChecklistStatus::Completed,
                ChecklistStatus::InProgress,
                ChecklistStatus::InProgress,
                ChecklistStatus::Completed,
            ]
        );
        assert_eq!(items[0].text, "A");
    }

    #[test]
    fn test_parse_ignores_non_checkbox_lines() {
        let items = parse_checklist("Intro\n\n- [ ] only item\n* bullet");
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_toggle_full_cycle() {
        let (step1, s1) = toggle_item("- [ ] A", "A").unwrap();
        assert_eq!(step1, "- [>] A");
        assert_eq!(s1.status, ChecklistStatus::InProgress);

        let (step2, _) = toggle_item(&step1, "A").unwrap();
        assert_eq!(step2, "- [x] A");

        let (step3, s3) = toggle_item(&step2, "A").unwrap();
        assert_eq!(step3, "- [ ] A");
        assert_eq!(s3.status, ChecklistStatus::Pending);
    }

    #[test]
    fn test_toggle_dash_and_tilde_advance_to_completed() {
        let (out, _) = toggle_item("- [-] A\n- [~] B", "B").unwrap();
        assert_eq!(out, "- [-] A\n- [x] B");
    }

    #[test]
    fn test_toggle_prefers_exact_match() {
        let content = "- [ ] Write tests for parser\n- [ ] Write tests";
        let (out, _) = toggle_item(content, "Write tests").unwrap();
        assert_eq!(out, "- [ ] Write tests for parser\n- [>] Write tests");
    }

    #[test]
    fn test_toggle_falls_back_to_substring() {
        let (out, item) = toggle_item("  - [ ] Deploy to staging", "staging").unwrap();
        assert_eq!(out, "  - [>] Deploy to staging");
        assert_eq!(item.text, "Deploy to staging");
    }

    #[test]
    fn test_match_item_agrees_with_toggle() {
        let content = "- [x] Deploy to Staging\n- [ ] Deploy";
        assert_eq!(match_item(content, "Deploy").unwrap().status, ChecklistStatus::Pending);
        let item = match_item(content, "staging").unwrap();
        assert_eq!(item.text, "Deploy to Staging");
        assert_eq!(item.status, ChecklistStatus::Completed);
        assert!(match_item(content, "rollback").is_none());
        assert!(match_item(content, "  ").is_none());
    }

    #[test]
    fn test_toggle_missing_item_is_validation_error() {
        let err = toggle_item("- [ ] A", "Z").unwrap_err();
        assert!(err.client_message().contains("not found"));
    }
}
