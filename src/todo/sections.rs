//! Markdown body model: `# Task:` heading followed by `## <title>` sections.
//!
//! Headers inside fenced code blocks are not section boundaries, so test
//! case snippets containing `## ` lines survive edits untouched.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TodoError};

use super::checklist::toggle_item;
use super::frontmatter::TIMESTAMP_FORMAT;
use super::types::{ordered_keys, SectionDefinition, SectionSchema};

/// Heading that carries the task title in a todo body.
pub const TASK_PREFIX: &str = "# Task:";

// ============================================================================
// Section Operations
// ============================================================================

/// How an update rewrites a section body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionOperation {
    #[default]
    Append,
    Prepend,
    Replace,
    Toggle,
}

impl SectionOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Replace => "replace",
            Self::Toggle => "toggle",
        }
    }
}

impl fmt::Display for SectionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionOperation {
    type Err = TodoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "prepend" => Ok(Self::Prepend),
            "replace" => Ok(Self::Replace),
            "toggle" => Ok(Self::Toggle),
            other => Err(TodoError::validation(
                "operation",
                format!("'{other}' is not one of append, prepend, replace, toggle"),
            )),
        }
    }
}

/// Compute the new body of a section.
///
/// `results` sections get a `[timestamp]` prefix on append. Toggle delegates
/// to the checklist cycle and is only valid on checklist sections.
///
/// # Errors
///
/// Returns a validation error for toggle on a non-checklist section or
/// when the item to toggle does not exist.
pub fn apply_operation(
    existing: &str,
    operation: SectionOperation,
    content: &str,
    schema: SectionSchema,
) -> Result<String> {
    let existing = existing.trim_end();
    let content = content.trim_end();
    match operation {
        SectionOperation::Replace => Ok(content.to_string()),
        SectionOperation::Append => {
            let addition = if schema == SectionSchema::Results {
                format!("[{}] {}", Local::now().format(TIMESTAMP_FORMAT), content)
            } else {
                content.to_string()
            };
            if existing.is_empty() {
                Ok(addition)
            } else {
                Ok(format!("{existing}\n{addition}"))
            }
        }
        SectionOperation::Prepend => {
            if existing.is_empty() {
                Ok(content.to_string())
            } else {
                Ok(format!("{content}\n{existing}"))
            }
        }
        SectionOperation::Toggle => {
            if schema != SectionSchema::Checklist {
                return Err(TodoError::validation(
                    "operation",
                    format!("toggle only applies to checklist sections, not {schema}"),
                ));
            }
            toggle_item(existing, content).map(|(body, _)| body)
        }
    }
}

/// Normalize a section title into a key: lowercase words joined by `_`.
///
/// # Example
///
/// ```
/// use todo_mcp::todo::normalize_key;
///
/// assert_eq!(normalize_key("Findings & Research"), "findings_research");
/// ```
#[must_use]
pub fn normalize_key(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

// ============================================================================
// Body Model
// ============================================================================

/// One `## <title>` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodySection {
    pub title: String,
    pub content: String,
}

/// A parsed todo body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TodoBody {
    /// Everything before the first section header (task heading, notes).
    pub preamble: String,
    pub sections: Vec<BodySection>,
}

/// Locate the block for `key`: the exact title first, then a
/// case-insensitive title, then a title normalizing to `key`.
fn find_block(sections: &[BodySection], key: &str, def: Option<&SectionDefinition>) -> Option<usize> {
    let by_title = |exact: bool| {
        def.and_then(|d| {
            sections.iter().position(|s| {
                if exact {
                    s.title == d.title
                } else {
                    s.title.eq_ignore_ascii_case(&d.title)
                }
            })
        })
    };
    by_title(true)
        .or_else(|| by_title(false))
        .or_else(|| sections.iter().position(|s| normalize_key(&s.title) == key))
}

/// Existing section key whose body block a new `key`/`title` pair would
/// share, if any.
#[must_use]
pub fn conflicting_section<'a>(
    defs: &'a BTreeMap<String, SectionDefinition>,
    key: &str,
    title: &str,
) -> Option<&'a str> {
    let title_key = normalize_key(title);
    defs.iter()
        .find(|(existing, def)| {
            existing.as_str() == key
                || def.title.eq_ignore_ascii_case(title.trim())
                || existing.as_str() == title_key
                || normalize_key(&def.title) == key
                || normalize_key(&def.title) == title_key
        })
        .map(|(existing, _)| existing.as_str())
}

impl TodoBody {
    /// Build a fresh body with one empty block per defined section.
    #[must_use]
    pub fn new(task: &str, defs: &BTreeMap<String, SectionDefinition>) -> Self {
        Self {
            preamble: format!("{TASK_PREFIX} {task}"),
            sections: ordered_keys(defs)
                .into_iter()
                .map(|key| BodySection {
                    title: defs[key].title.clone(),
                    content: String::new(),
                })
                .collect(),
        }
    }

    /// Split raw markdown into preamble and sections.
    #[must_use]
    pub fn parse(body: &str) -> Self {
        let mut preamble: Vec<&str> = Vec::new();
        let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
        let mut in_fence = false;

        for line in body.lines() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
            }
            if !in_fence {
                if let Some(title) = line.strip_prefix("## ") {
                    sections.push((title.trim().to_string(), Vec::new()));
                    continue;
                }
            }
            match sections.last_mut() {
                Some((_, lines)) => lines.push(line),
                None => preamble.push(line),
            }
        }

        Self {
            preamble: trim_blank_lines(&preamble),
            sections: sections
                .into_iter()
                .map(|(title, lines)| BodySection {
                    title,
                    content: trim_blank_lines(&lines),
                })
                .collect(),
        }
    }

    /// Task title from the `# Task:` heading, if present.
    #[must_use]
    pub fn task(&self) -> Option<String> {
        self.preamble
            .lines()
            .find_map(|line| line.strip_prefix(TASK_PREFIX))
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
    }

    fn position(&self, key: &str, def: Option<&SectionDefinition>) -> Option<usize> {
        find_block(&self.sections, key, def)
    }

    /// Content of the section stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str, def: Option<&SectionDefinition>) -> Option<&str> {
        self.position(key, def).map(|i| self.sections[i].content.as_str())
    }

    /// Replace the content of `key`, appending a new block when the header
    /// is missing from the body.
    pub fn set(&mut self, key: &str, def: &SectionDefinition, content: String) {
        match self.position(key, Some(def)) {
            Some(i) => self.sections[i].content = content,
            None => self.sections.push(BodySection {
                title: def.title.clone(),
                content,
            }),
        }
    }

    /// Map every defined section key to its content (empty when absent).
    #[must_use]
    pub fn contents(&self, defs: &BTreeMap<String, SectionDefinition>) -> BTreeMap<String, String> {
        defs.iter()
            .map(|(key, def)| {
                let content = self.get(key, Some(def)).unwrap_or_default().to_string();
                (key.clone(), content)
            })
            .collect()
    }

    /// Reorder blocks to follow `defs` order. Blocks without a definition keep
    /// their relative order after the defined ones. Missing defined blocks are
    /// created empty.
    pub fn reorder(&mut self, defs: &BTreeMap<String, SectionDefinition>) {
        let mut remaining = std::mem::take(&mut self.sections);
        let mut ordered = Vec::with_capacity(remaining.len());

        for key in ordered_keys(defs) {
            let def = &defs[key];
            let found = find_block(&remaining, key, Some(def));
            match found {
                Some(i) => ordered.push(remaining.remove(i)),
                None => ordered.push(BodySection {
                    title: def.title.clone(),
                    content: String::new(),
                }),
            }
        }
        ordered.extend(remaining);
        self.sections = ordered;
    }

    /// Serialize back to markdown.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.preamble.is_empty() {
            out.push_str(&self.preamble);
            out.push('\n');
        }
        for section in &self.sections {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("## ");
            out.push_str(&section.title);
            out.push('\n');
            if !section.content.is_empty() {
                out.push('\n');
                out.push_str(&section.content);
                out.push('\n');
            }
        }
        out
    }
}

fn trim_blank_lines(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n"),
        _ => String::new(),
    }
}
