//! Todo data model and persistence.
//!
//! A todo is a markdown file with typed front-matter and named sections.
//!
//! # Submodules
//!
//! - [`types`] - status/priority/type enums and section definitions
//! - [`frontmatter`] - on-disk codec
//! - [`sections`] - body model and section operations
//! - [`checklist`] - three-state checkbox parsing and toggling
//! - [`validation`] - per-schema content rules
//! - [`store`] - the per-working-directory file store
//! - [`hierarchy`] - parent/child trees and linking

pub mod checklist;
pub mod frontmatter;
pub mod hierarchy;
pub mod sections;
pub mod store;
pub mod types;
pub mod validation;

pub use checklist::{match_item, parse_checklist, ChecklistItem, ChecklistStatus};
pub use frontmatter::{format_timestamp, parse_timestamp, TIMESTAMP_FORMAT};
pub use hierarchy::{build_hierarchy, Hierarchy, HierarchyNode, LinkKind, TodoLinker};
pub use sections::{conflicting_section, normalize_key, SectionOperation, TodoBody, TASK_PREFIX};
pub use store::{ListFilter, MetadataUpdate, NewTodo, SectionEdit, TodoStore};
pub use types::{
    default_sections, ordered_keys, Priority, SectionDefinition, SectionSchema, TodoStatus,
    TodoType,
};

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;

/// A todo as described by its front-matter plus the task heading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Todo {
    pub id: String,
    pub task: String,
    pub started: DateTime<Local>,
    pub completed: Option<DateTime<Local>>,
    pub status: TodoStatus,
    pub priority: Priority,
    #[serde(rename = "type")]
    pub todo_type: TodoType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_test: Option<String>,
    pub tags: Vec<String>,
    pub sections: BTreeMap<String, SectionDefinition>,
}

impl Todo {
    /// Parent id if set and non-empty.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent_id.as_deref().filter(|p| !p.is_empty())
    }

    /// Wall-clock time from start to completion, if completed.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed.map(|done| done - self.started)
    }

    /// Schema of a section, if the todo defines it.
    #[must_use]
    pub fn schema_of(&self, key: &str) -> Option<SectionSchema> {
        self.sections.get(key).map(|def| def.schema)
    }
}
