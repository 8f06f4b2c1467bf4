//! Todo enumerations and section definitions.
//!
//! This module contains the closed vocabularies stored in front-matter:
//! - [`TodoStatus`] - lifecycle state of a todo
//! - [`Priority`] - urgency
//! - [`TodoType`] - kind of work
//! - [`SectionSchema`] - validation dialect of a section
//! - [`SectionDefinition`] - per-section metadata

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::TodoError;

// ============================================================================
// Todo Status
// ============================================================================

/// Current state of a todo.
///
/// # State Transitions
///
/// - `InProgress` <-> `Blocked`
/// - `InProgress` -> `Completed`
/// - `Blocked` -> `Completed`
///
/// `Completed` is terminal for the active set; completing a todo may
/// archive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    InProgress,
    Blocked,
    Completed,
}

impl TodoStatus {
    /// Every status, in display order.
    pub const ALL: [TodoStatus; 3] = [Self::InProgress, Self::Blocked, Self::Completed];

    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
        }
    }

    /// Check if this status can transition to the target status.
    ///
    /// Re-asserting the current status is allowed.
    ///
    /// # Example
    ///
    /// ```
    /// use todo_mcp::todo::TodoStatus;
    ///
    /// assert!(TodoStatus::Blocked.can_transition_to(TodoStatus::InProgress));
    /// assert!(!TodoStatus::Completed.can_transition_to(TodoStatus::Blocked));
    /// ```
    #[must_use]
    pub fn can_transition_to(&self, target: TodoStatus) -> bool {
        use TodoStatus::*;
        *self == target
            || matches!(
                (self, target),
                (InProgress, Blocked) | (Blocked, InProgress) | (InProgress, Completed) | (Blocked, Completed)
            )
    }

    /// Check if this state represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TodoStatus {
    type Err = TodoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "completed" => Ok(Self::Completed),
            other => Err(TodoError::validation(
                "status",
                format!("'{other}' is not one of in_progress, blocked, completed"),
            )),
        }
    }
}

// ============================================================================
// Priority
// ============================================================================

/// Urgency of a todo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Self::High, Self::Medium, Self::Low];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = TodoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(TodoError::validation(
                "priority",
                format!("'{other}' is not one of high, medium, low"),
            )),
        }
    }
}

// ============================================================================
// Todo Type
// ============================================================================

/// Kind of work a todo tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TodoType {
    #[default]
    Feature,
    Bug,
    Refactor,
    Research,
    MultiPhase,
    Phase,
    Subtask,
    Prd,
}

impl TodoType {
    pub const ALL: [TodoType; 8] = [
        Self::Feature,
        Self::Bug,
        Self::Refactor,
        Self::Research,
        Self::MultiPhase,
        Self::Phase,
        Self::Subtask,
        Self::Prd,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Refactor => "refactor",
            Self::Research => "research",
            Self::MultiPhase => "multi-phase",
            Self::Phase => "phase",
            Self::Subtask => "subtask",
            Self::Prd => "prd",
        }
    }

    /// Phases and subtasks only exist underneath a parent todo.
    #[must_use]
    pub fn requires_parent(&self) -> bool {
        matches!(self, Self::Phase | Self::Subtask)
    }
}

impl fmt::Display for TodoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TodoType {
    type Err = TodoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| {
                TodoError::validation(
                    "type",
                    format!(
                        "'{lowered}' is not one of feature, bug, refactor, research, multi-phase, phase, subtask, prd"
                    ),
                )
            })
    }
}

// ============================================================================
// Section Schema
// ============================================================================

/// Validation dialect applied to a section's raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionSchema {
    #[default]
    Freeform,
    Checklist,
    TestCases,
    Research,
    Strategy,
    Results,
}

impl SectionSchema {
    pub const ALL: [SectionSchema; 6] = [
        Self::Freeform,
        Self::Checklist,
        Self::TestCases,
        Self::Research,
        Self::Strategy,
        Self::Results,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Freeform => "freeform",
            Self::Checklist => "checklist",
            Self::TestCases => "test_cases",
            Self::Research => "research",
            Self::Strategy => "strategy",
            Self::Results => "results",
        }
    }
}

impl fmt::Display for SectionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionSchema {
    type Err = TodoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|schema| schema.as_str() == lowered)
            .ok_or_else(|| TodoError::validation("schema", format!("unknown schema '{lowered}'")))
    }
}

// ============================================================================
// Section Definition
// ============================================================================

/// Metadata describing one named section of a todo body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDefinition {
    pub title: String,
    pub order: i64,
    #[serde(default)]
    pub schema: SectionSchema,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub custom: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SectionDefinition {
    /// Create a built-in section definition.
    pub fn new(title: impl Into<String>, order: i64, schema: SectionSchema) -> Self {
        Self {
            title: title.into(),
            order,
            schema,
            required: false,
            custom: false,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    #[must_use]
    pub fn custom(mut self, custom: bool) -> Self {
        self.custom = custom;
        self
    }
}

/// The sections every new todo starts with, keyed by normalized key.
#[must_use]
pub fn default_sections() -> BTreeMap<String, SectionDefinition> {
    [
        ("findings", "Findings & Research", SectionSchema::Research, false),
        ("test_strategy", "Test Strategy", SectionSchema::Strategy, false),
        ("test_list", "Test List", SectionSchema::Checklist, false),
        ("tests", "Test Cases", SectionSchema::TestCases, false),
        ("maintainability", "Maintainability Analysis", SectionSchema::Freeform, false),
        ("test_results", "Test Results Log", SectionSchema::Results, false),
        ("checklist", "Checklist", SectionSchema::Checklist, true),
        ("working_scratchpad", "Working Scratchpad", SectionSchema::Freeform, false),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (key, title, schema, required))| {
        (
            key.to_string(),
            SectionDefinition::new(title, i as i64 + 1, schema).required(required),
        )
    })
    .collect()
}

/// Sort section keys by `(order, key)`.
#[must_use]
pub fn ordered_keys(sections: &BTreeMap<String, SectionDefinition>) -> Vec<&str> {
    let mut keys: Vec<(&i64, &str)> = sections
        .iter()
        .map(|(key, def)| (&def.order, key.as_str()))
        .collect();
    keys.sort();
    keys.into_iter().map(|(_, key)| key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(TodoStatus::InProgress.can_transition_to(TodoStatus::Blocked));
        assert!(TodoStatus::Blocked.can_transition_to(TodoStatus::Completed));
        assert!(!TodoStatus::Completed.can_transition_to(TodoStatus::InProgress));
        assert!(TodoStatus::Completed.is_terminal());
    }

    #[test]
    fn test_type_parsing_accepts_kebab_case() {
        assert_eq!("multi-phase".parse::<TodoType>().unwrap(), TodoType::MultiPhase);
        assert_eq!(" PRD ".parse::<TodoType>().unwrap(), TodoType::Prd);
        let err = "epic".parse::<TodoType>().unwrap_err();
        assert!(err.client_message().contains("type"));
    }

    #[test]
    fn test_requires_parent() {
        assert!(TodoType::Phase.requires_parent());
        assert!(TodoType::Subtask.requires_parent());
        assert!(!TodoType::MultiPhase.requires_parent());
    }

    #[test]
    fn test_unknown_schema_is_validation_error() {
        let err = "kanban".parse::<SectionSchema>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_serde_names_match_wire_strings() {
        for schema in SectionSchema::ALL {
            let json = serde_json::to_string(&schema).unwrap();
            assert_eq!(json, format!("\"{}\"", schema.as_str()));
        }
        for kind in TodoType::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_default_sections_are_ordered() {
        let sections = default_sections();
        let keys = ordered_keys(&sections);
        assert_eq!(keys.first(), Some(&"findings"));
        assert_eq!(keys.last(), Some(&"working_scratchpad"));
        assert_eq!(sections["checklist"].schema, SectionSchema::Checklist);
    }

    #[test]
    fn test_ordered_keys_ties_break_by_key() {
        let mut sections = BTreeMap::new();
        sections.insert("b".to_string(), SectionDefinition::new("B", 1, SectionSchema::Freeform));
        sections.insert("a".to_string(), SectionDefinition::new("A", 1, SectionSchema::Freeform));
        sections.insert("c".to_string(), SectionDefinition::new("C", 0, SectionSchema::Freeform));
        assert_eq!(ordered_keys(&sections), vec!["c", "a", "b"]);
    }
}
