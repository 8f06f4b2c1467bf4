//! Front-matter codec for todo files.
//!
//! A todo file is a YAML block fenced by `---` lines followed by the markdown
//! body. Timestamps are written as `YYYY-MM-DD HH:MM:SS` local time; RFC3339
//! is accepted on read.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::error::{Result, TodoError};

use super::sections::{normalize_key, TodoBody};
use super::types::{default_sections, Priority, SectionDefinition, SectionSchema, TodoStatus, TodoType};
use super::Todo;

/// Format used for every timestamp written to disk.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const FENCE: &str = "---";

// ============================================================================
// Timestamp Serialization
// ============================================================================

/// Parse a stored timestamp in either accepted format.
///
/// # Errors
///
/// Returns a validation error naming `field` when neither format matches.
pub fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Local>> {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return local_from_naive(naive, field);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Local));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return local_from_naive(midnight, field);
        }
    }
    Err(TodoError::validation(
        field,
        format!("unrecognized timestamp '{raw}'"),
    ))
}

fn local_from_naive(naive: NaiveDateTime, field: &str) -> Result<DateTime<Local>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| TodoError::validation(field, format!("'{naive}' does not exist in local time")))
}

/// Render a timestamp the way it is stored.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Local>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

mod timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &DateTime<Local>, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<DateTime<Local>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw, "started").map_err(serde::de::Error::custom)
    }
}

mod optional_timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Local>>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_str(&format_timestamp(ts)),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<DateTime<Local>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) if !raw.trim().is_empty() => parse_timestamp(&raw, "completed")
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

fn empty_as_none<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<String>::deserialize(d)?.filter(|s| !s.trim().is_empty()))
}

// ============================================================================
// Front-matter Record
// ============================================================================

/// On-disk field layout. Field order here is the order written to disk.
#[derive(Debug, Serialize, Deserialize)]
struct FrontMatter {
    todo_id: String,
    #[serde(with = "timestamp")]
    started: DateTime<Local>,
    #[serde(with = "optional_timestamp", default)]
    completed: Option<DateTime<Local>>,
    #[serde(default)]
    status: TodoStatus,
    #[serde(default)]
    priority: Priority,
    #[serde(rename = "type", default)]
    todo_type: TodoType,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    current_test: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    sections: BTreeMap<String, SectionDefinition>,
}

/// Split a file into its front-matter text and body.
///
/// # Errors
///
/// Returns a validation error when the file does not start with a fenced
/// front-matter block.
pub fn split_document(content: &str) -> Result<(&str, &str)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let rest = content
        .strip_prefix(FENCE)
        .and_then(|r| r.strip_prefix('\n').or_else(|| r.strip_prefix("\r\n")))
        .ok_or_else(|| TodoError::validation("front-matter", "file does not start with '---'"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FENCE {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok((yaml, body.trim_start_matches(['\r', '\n'])));
        }
        offset += line.len();
    }
    Err(TodoError::validation("front-matter", "closing '---' not found"))
}

/// Parse a complete todo file.
///
/// The task title comes from the body's `# Task:` heading. Files written
/// before section definitions were tracked get definitions inferred from the
/// headers present in the body.
///
/// # Errors
///
/// Returns a validation error for malformed front-matter.
pub fn parse_document(content: &str) -> Result<(Todo, String)> {
    let (yaml, body) = split_document(content)?;
    let fm: FrontMatter = serde_yaml::from_str(yaml)
        .map_err(|e| TodoError::validation("front-matter", e.to_string()))?;

    let parsed_body = TodoBody::parse(body);
    let sections = if fm.sections.is_empty() {
        infer_sections(&parsed_body)
    } else {
        fm.sections
    };

    let todo = Todo {
        task: parsed_body.task().unwrap_or_else(|| fm.todo_id.clone()),
        id: fm.todo_id,
        started: fm.started,
        completed: fm.completed,
        status: fm.status,
        priority: fm.priority,
        todo_type: fm.todo_type,
        parent_id: fm.parent_id,
        current_test: fm.current_test,
        tags: fm.tags,
        sections,
    };
    Ok((todo, body.to_string()))
}

/// Render a todo and its body into file contents.
///
/// # Errors
///
/// Propagates YAML serialization failures.
pub fn render_document(todo: &Todo, body: &str) -> Result<String> {
    let fm = FrontMatter {
        todo_id: todo.id.clone(),
        started: todo.started,
        completed: todo.completed,
        status: todo.status,
        priority: todo.priority,
        todo_type: todo.todo_type,
        parent_id: todo.parent_id.clone().filter(|p| !p.is_empty()),
        current_test: todo.current_test.clone(),
        tags: todo.tags.clone(),
        sections: todo.sections.clone(),
    };
    let yaml = serde_yaml::to_string(&fm)?;
    let mut out = String::with_capacity(yaml.len() + body.len() + 16);
    out.push_str(FENCE);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(FENCE);
    out.push_str("\n\n");
    out.push_str(body.trim_start_matches('\n'));
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

fn infer_sections(body: &TodoBody) -> BTreeMap<String, SectionDefinition> {
    let defaults = default_sections();
    body.sections
        .iter()
        .enumerate()
        .map(|(i, section)| {
            let key = defaults
                .iter()
                .find(|(_, def)| def.title.eq_ignore_ascii_case(&section.title))
                .map(|(key, _)| key.clone())
                .unwrap_or_else(|| normalize_key(&section.title));
            let def = match defaults.get(&key) {
                Some(known) => known.clone(),
                None => SectionDefinition::new(&section.title, i as i64 + 1, SectionSchema::Freeform)
                    .custom(true),
            };
            (key, def)
        })
        .collect()
}
