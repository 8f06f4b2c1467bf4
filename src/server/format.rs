//! Response rendering for tool results.
//!
//! Machine-oriented results are pretty JSON; the summary, tree and receipt
//! views are plain text meant to be read by the assistant host.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Write as _;

use crate::error::{Result, TodoError};
use crate::todo::{
    build_hierarchy, ordered_keys, parse_checklist, ChecklistItem, HierarchyNode, SectionSchema,
    Todo, TodoBody, TodoStatus,
};

/// Serialize a value as pretty JSON.
///
/// # Errors
///
/// Fails only if the value cannot be represented as JSON.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(TodoError::from)
}

// ============================================================================
// Tree
// ============================================================================

fn node_label(todo: &Todo) -> String {
    format!(
        "{} [{}] {} ({}, {})",
        status_icon(todo.status),
        todo.priority,
        todo.task,
        todo.id,
        todo.todo_type
    )
}

fn status_icon(status: TodoStatus) -> &'static str {
    match status {
        TodoStatus::InProgress => "[>]",
        TodoStatus::Blocked => "[!]",
        TodoStatus::Completed => "[x]",
    }
}

fn render_children(out: &mut String, children: &[HierarchyNode], prefix: &str) {
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let (branch, indent) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };
        let _ = writeln!(out, "{prefix}{branch}{}", node_label(&child.todo));
        render_children(out, &child.children, &format!("{prefix}{indent}"));
    }
}

/// Draw one subtree with box-drawing branches.
#[must_use]
pub fn render_tree(node: &HierarchyNode) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", node_label(&node.todo));
    render_children(&mut out, &node.children, "");
    out
}

// ============================================================================
// Read formats
// ============================================================================

/// Status-grouped overview. Adds a hierarchical view whenever any todo
/// has a parent.
#[must_use]
pub fn summary(todos: &[Todo], archived: &[Todo]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "TODO SUMMARY ({} active)", todos.len());

    for status in [TodoStatus::InProgress, TodoStatus::Blocked, TodoStatus::Completed] {
        let group: Vec<&Todo> = todos.iter().filter(|t| t.status == status).collect();
        if group.is_empty() {
            continue;
        }
        let heading = status.as_str().replace('_', " ").to_uppercase();
        let _ = writeln!(out, "\n{heading} ({}):", group.len());
        for todo in group {
            let _ = writeln!(out, "  - [{}] {} ({})", todo.priority, todo.task, todo.id);
        }
    }

    let hierarchy = build_hierarchy(todos);
    if hierarchy.has_relationships() {
        let _ = writeln!(out, "\nHIERARCHICAL VIEW:");
        for root in hierarchy.roots.iter().filter(|r| !r.children.is_empty()) {
            out.push_str(&render_tree(root));
        }
        if !hierarchy.orphans.is_empty() {
            let _ = writeln!(out, "\nORPHANED ({}):", hierarchy.orphans.len());
            for orphan in &hierarchy.orphans {
                let _ = writeln!(
                    out,
                    "  - {} (parent: {})",
                    node_label(&orphan.todo),
                    orphan.todo.parent().unwrap_or("-")
                );
            }
        }
    }

    if !archived.is_empty() {
        let _ = writeln!(out, "\nARCHIVED ({}):", archived.len());
        for todo in archived {
            let _ = writeln!(out, "  - [{}] {} ({})", todo.priority, todo.task, todo.id);
        }
    }
    if todos.is_empty() && archived.is_empty() {
        let _ = writeln!(out, "\nNo todos found.");
    }
    out
}

#[derive(Serialize)]
struct ListEntry<'a> {
    id: &'a str,
    task: &'a str,
    status: TodoStatus,
    priority: crate::todo::Priority,
    #[serde(rename = "type")]
    todo_type: crate::todo::TodoType,
    started: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    archived: bool,
}

impl<'a> ListEntry<'a> {
    fn new(todo: &'a Todo, archived: bool) -> Self {
        Self {
            id: &todo.id,
            task: &todo.task,
            status: todo.status,
            priority: todo.priority,
            todo_type: todo.todo_type,
            started: crate::todo::format_timestamp(&todo.started),
            completed: todo.completed.as_ref().map(crate::todo::format_timestamp),
            parent_id: todo.parent(),
            archived,
        }
    }
}

/// Compact JSON array of todo metadata.
///
/// # Errors
///
/// Fails only on serialization errors.
pub fn list(todos: &[Todo], archived: &[Todo]) -> Result<String> {
    let entries: Vec<ListEntry<'_>> = todos
        .iter()
        .map(|t| ListEntry::new(t, false))
        .chain(archived.iter().map(|t| ListEntry::new(t, true)))
        .collect();
    to_json(&entries)
}

/// Metadata of a single todo.
///
/// # Errors
///
/// Fails only on serialization errors.
pub fn single(todo: &Todo) -> Result<String> {
    to_json(&ListEntry::new(todo, false))
}

#[derive(Serialize)]
struct FullSection<'a> {
    key: &'a str,
    title: &'a str,
    order: i64,
    schema: SectionSchema,
    required: bool,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<Vec<ChecklistItem>>,
}

/// A todo with every section's content; checklist sections also carry
/// their parsed items.
///
/// # Errors
///
/// Fails only on serialization errors.
pub fn full(todo: &Todo, body: &str) -> Result<String> {
    let parsed = TodoBody::parse(body);
    let sections: Vec<FullSection<'_>> = ordered_keys(&todo.sections)
        .into_iter()
        .filter_map(|key| {
            let def = todo.sections.get(key)?;
            let content = parsed.get(key, Some(def)).unwrap_or_default().to_string();
            let items = (def.schema == SectionSchema::Checklist).then(|| parse_checklist(&content));
            Some(FullSection {
                key,
                title: &def.title,
                order: def.order,
                schema: def.schema,
                required: def.required,
                content,
                items,
            })
        })
        .collect();

    let mut value = serde_json::to_value(ListEntry::new(todo, false))?;
    if let Value::Object(map) = &mut value {
        map.insert("tags".into(), json!(todo.tags));
        if let Some(test) = &todo.current_test {
            map.insert("current_test".into(), json!(test));
        }
        map.insert("sections".into(), serde_json::to_value(sections)?);
    }
    to_json(&value)
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SectionInfo<'a> {
    key: &'a str,
    title: &'a str,
    order: i64,
    schema: SectionSchema,
    required: bool,
    custom: bool,
    has_content: bool,
    word_count: usize,
}

/// Section definitions of a todo in display order, with content stats.
///
/// # Errors
///
/// Fails only on serialization errors.
pub fn sections(todo: &Todo, body: &str) -> Result<String> {
    let parsed = TodoBody::parse(body);
    let infos: Vec<SectionInfo<'_>> = ordered_keys(&todo.sections)
        .into_iter()
        .filter_map(|key| {
            let def = todo.sections.get(key)?;
            let content = parsed.get(key, Some(def)).unwrap_or_default();
            Some(SectionInfo {
                key,
                title: &def.title,
                order: def.order,
                schema: def.schema,
                required: def.required,
                custom: def.custom,
                has_content: !content.trim().is_empty(),
                word_count: content.split_whitespace().count(),
            })
        })
        .collect();
    to_json(&json!({ "id": todo.id, "sections": infos }))
}
