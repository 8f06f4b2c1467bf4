//! Tool catalogue: names, descriptions and JSON input schemas.

use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::TodoError;

/// Every tool the server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Create,
    CreateMulti,
    Read,
    Update,
    Search,
    Archive,
    Link,
    Stats,
    Clean,
    Template,
    Sections,
    AddSection,
    ReorderSections,
}

impl Tool {
    pub const ALL: [Tool; 13] = [
        Self::Create,
        Self::CreateMulti,
        Self::Read,
        Self::Update,
        Self::Search,
        Self::Archive,
        Self::Link,
        Self::Stats,
        Self::Clean,
        Self::Template,
        Self::Sections,
        Self::AddSection,
        Self::ReorderSections,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "todo_create",
            Self::CreateMulti => "todo_create_multi",
            Self::Read => "todo_read",
            Self::Update => "todo_update",
            Self::Search => "todo_search",
            Self::Archive => "todo_archive",
            Self::Link => "todo_link",
            Self::Stats => "todo_stats",
            Self::Clean => "todo_clean",
            Self::Template => "todo_template",
            Self::Sections => "todo_sections",
            Self::AddSection => "todo_add_section",
            Self::ReorderSections => "todo_reorder_sections",
        }
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Create => "Create a todo with default sections, optionally from a template or under a parent.",
            Self::CreateMulti => "Create a parent todo and its phase children in one call.",
            Self::Read => "Read one todo by id, or list todos as a summary, list or full view.",
            Self::Update => "Edit a section (append, prepend, replace, toggle) and/or front-matter metadata.",
            Self::Search => "Full-text search over todo titles and sections.",
            Self::Archive => "Move a todo into the archive.",
            Self::Link => "Make one todo the child of another.",
            Self::Stats => "Counts, completion rates and coverage for a period.",
            Self::Clean => "Archive old completed todos or report duplicates.",
            Self::Template => "List templates, or create a todo from one.",
            Self::Sections => "Show a todo's sections with content stats.",
            Self::AddSection => "Add a custom section to a todo.",
            Self::ReorderSections => "Change the display order of a todo's sections.",
        }
    }

    /// JSON schema of the tool's arguments.
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let priority = json!({"type": "string", "enum": ["high", "medium", "low"], "default": "high"});
        let todo_type = json!({
            "type": "string",
            "enum": ["feature", "bug", "refactor", "research", "multi-phase", "phase", "subtask", "prd"]
        });
        let status = json!({"type": "string", "enum": ["in_progress", "blocked", "completed"]});
        let id = json!({"type": "string", "description": "Todo id"});

        match self {
            Self::Create => json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string"},
                    "priority": priority,
                    "type": todo_type,
                    "parent_id": {"type": "string"},
                    "template": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["task"]
            }),
            Self::CreateMulti => {
                let spec = json!({
                    "type": "object",
                    "properties": {"task": {"type": "string"}, "priority": priority, "type": todo_type},
                    "required": ["task"]
                });
                json!({
                    "type": "object",
                    "properties": {
                        "parent": spec,
                        "children": {"type": "array", "items": spec, "minItems": 1}
                    },
                    "required": ["parent", "children"]
                })
            }
            Self::Read => json!({
                "type": "object",
                "properties": {
                    "id": id,
                    "format": {"type": "string", "enum": ["summary", "list", "full"], "default": "summary"},
                    "filter": {
                        "type": "object",
                        "properties": {
                            "status": status,
                            "priority": {"type": "string", "enum": ["high", "medium", "low"]},
                            "days": {"type": "integer", "minimum": 0}
                        }
                    },
                    "include_archived": {"type": "boolean", "default": false}
                }
            }),
            Self::Update => json!({
                "type": "object",
                "properties": {
                    "id": id,
                    "section": {"type": "string"},
                    "operation": {
                        "type": "string",
                        "enum": ["append", "prepend", "replace", "toggle"],
                        "default": "append"
                    },
                    "content": {"type": "string"},
                    "metadata": {
                        "type": "object",
                        "properties": {
                            "status": status,
                            "priority": {"type": "string", "enum": ["high", "medium", "low"]},
                            "current_test": {"type": "string"},
                            "completed": {"type": "string", "description": "YYYY-MM-DD HH:MM:SS or RFC 3339"},
                            "parent_id": {"type": "string"}
                        }
                    }
                },
                "required": ["id"]
            }),
            Self::Search => json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "filters": {
                        "type": "object",
                        "properties": {
                            "status": status,
                            "date_from": {"type": "string", "format": "date"},
                            "date_to": {"type": "string", "format": "date"}
                        }
                    },
                    "limit": {"type": "integer", "default": 10, "minimum": 1, "maximum": 100}
                },
                "required": ["query"]
            }),
            Self::Archive => json!({
                "type": "object",
                "properties": {
                    "id": id,
                    "quarter": {"type": "string", "description": "Archive bucket override, e.g. 2025-Q1"}
                },
                "required": ["id"]
            }),
            Self::Link => json!({
                "type": "object",
                "properties": {
                    "parent_id": {"type": "string"},
                    "child_id": {"type": "string"},
                    "link_type": {"type": "string", "enum": ["parent-child"], "default": "parent-child"}
                },
                "required": ["parent_id", "child_id"]
            }),
            Self::Stats => json!({
                "type": "object",
                "properties": {
                    "period": {"type": "string", "enum": ["all", "week", "month", "quarter", "year"], "default": "all"}
                }
            }),
            Self::Clean => json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["archive_old", "find_duplicates"],
                        "default": "archive_old"
                    },
                    "days": {"type": "integer", "default": 90, "minimum": 0}
                }
            }),
            Self::Template => json!({
                "type": "object",
                "properties": {
                    "template": {"type": "string"},
                    "task": {"type": "string"},
                    "priority": priority,
                    "type": todo_type,
                    "parent_id": {"type": "string"},
                    "variables": {"type": "object", "additionalProperties": {"type": "string"}}
                }
            }),
            Self::Sections => json!({
                "type": "object",
                "properties": {"id": id},
                "required": ["id"]
            }),
            Self::AddSection => json!({
                "type": "object",
                "properties": {
                    "id": id,
                    "key": {"type": "string"},
                    "title": {"type": "string"},
                    "schema": {
                        "type": "string",
                        "enum": ["freeform", "checklist", "test_cases", "research", "strategy", "results"],
                        "default": "freeform"
                    },
                    "required": {"type": "boolean", "default": false},
                    "order": {"type": "integer", "default": 100}
                },
                "required": ["id", "key", "title"]
            }),
            Self::ReorderSections => json!({
                "type": "object",
                "properties": {
                    "id": id,
                    "order": {"type": "object", "additionalProperties": {"type": "integer"}}
                },
                "required": ["id", "order"]
            }),
        }
    }

    /// Entry for a `tools/list` response.
    #[must_use]
    pub fn spec(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "inputSchema": self.input_schema(),
        })
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Tool {
    type Err = TodoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.name() == s)
            .ok_or_else(|| TodoError::validation("name", format!("unknown tool '{s}'")))
    }
}

/// Specs of every tool, in catalogue order.
#[must_use]
pub fn tool_specs() -> Vec<Value> {
    Tool::ALL.iter().map(Tool::spec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique_and_parse_back() {
        let names: HashSet<&str> = Tool::ALL.iter().map(Tool::name).collect();
        assert_eq!(names.len(), 13);
        for tool in Tool::ALL {
            assert_eq!(tool.name().parse::<Tool>().unwrap(), tool);
        }
        assert!("todo_delete".parse::<Tool>().is_err());
    }

    #[test]
    fn test_specs_are_object_schemas() {
        for spec in tool_specs() {
            assert_eq!(spec["inputSchema"]["type"], "object", "{}", spec["name"]);
            assert!(spec["description"].as_str().is_some_and(|d| !d.is_empty()));
        }
    }

    #[test]
    fn test_required_fields_match_parsers() {
        let create = Tool::Create.input_schema();
        assert_eq!(create["required"], json!(["task"]));
        let reorder = Tool::ReorderSections.input_schema();
        assert_eq!(reorder["required"], json!(["id", "order"]));
    }
}
