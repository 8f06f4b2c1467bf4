//! Named markdown templates used to seed new todos.
//!
//! Templates are looked up in the working directory's templates folder first
//! (`<name>.md`), then among the built-ins. A template file may start with a
//! front-matter block declaring a description and default values:
//!
//! ```text
//! ---
//! description: Bug report
//! defaults:
//!   component: core
//! ---
//! # Task: {{task}}
//!
//! ## Reproduction Steps
//!
//! Seen in {{component}}.
//! ```
//!
//! Placeholders use `{{name}}` (a leading dot, `{{.name}}`, is accepted too).
//! The standard variables `task`, `priority`, `type` and `date` are always
//! available; any other variable must be declared by the template.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use todo_mcp::templates::Template;
//!
//! let template = Template::parse("demo", "# Task: {{task}}\n\nOwner: {{owner}}").unwrap();
//! let mut vars = BTreeMap::new();
//! vars.insert("task".to_string(), "Ship it".to_string());
//! vars.insert("owner".to_string(), "ops".to_string());
//! assert_eq!(template.execute(&vars).unwrap(), "# Task: Ship it\n\nOwner: ops");
//! ```

use anyhow::Context;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::error::{Result, TodoError};
use crate::todo::frontmatter::split_document;
use crate::todo::{
    default_sections, normalize_key, NewTodo, Priority, SectionDefinition, SectionSchema, Todo,
    TodoBody, TodoStore, TodoType, TASK_PREFIX,
};

/// Variables every template may reference without declaring them.
pub const STANDARD_VARIABLES: [&str; 4] = ["task", "priority", "type", "date"];

/// First order assigned to sections a template introduces.
const CUSTOM_SECTION_ORDER: i64 = 100;

const TEMPLATE_EXTENSION: &str = "md";

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid placeholder regex")
    })
}

// ============================================================================
// Template
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct TemplateHeader {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    defaults: BTreeMap<String, String>,
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub body: String,
    pub defaults: BTreeMap<String, String>,
    /// Placeholder names in first-appearance order, without duplicates.
    pub placeholders: Vec<String>,
}

impl Template {
    /// Parse template text, with or without a front-matter header.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the header is not valid YAML.
    pub fn parse(name: &str, raw: &str) -> Result<Self> {
        let (header, body) = if raw.starts_with("---") {
            let (yaml, body) = split_document(raw)?;
            let header: TemplateHeader = serde_yaml::from_str(yaml).map_err(|e| {
                TodoError::validation("template", format!("invalid header in '{name}': {e}"))
            })?;
            (header, body)
        } else {
            (TemplateHeader::default(), raw)
        };

        let mut seen = BTreeSet::new();
        let placeholders = placeholder_regex()
            .captures_iter(body)
            .map(|caps| caps[1].to_string())
            .filter(|p| seen.insert(p.clone()))
            .collect();

        Ok(Self {
            name: name.to_string(),
            description: header.description,
            body: body.to_string(),
            defaults: header.defaults,
            placeholders,
        })
    }

    /// Substitute every placeholder from `vars`, then from the declared
    /// defaults.
    ///
    /// # Errors
    ///
    /// Validation error on the `variables` parameter when a placeholder has
    /// no value, or when `vars` carries a name this template does not know.
    pub fn execute(&self, vars: &BTreeMap<String, String>) -> Result<String> {
        let unknown: Vec<&str> = vars
            .keys()
            .map(String::as_str)
            .filter(|k| {
                !STANDARD_VARIABLES.contains(k)
                    && !self.defaults.contains_key(*k)
                    && !self.placeholders.iter().any(|p| p == k)
            })
            .collect();
        if !unknown.is_empty() {
            return Err(TodoError::validation(
                "variables",
                format!(
                    "template '{}' does not use: {}",
                    self.name,
                    unknown.join(", ")
                ),
            ));
        }

        let missing: Vec<&str> = self
            .placeholders
            .iter()
            .map(String::as_str)
            .filter(|p| !vars.contains_key(*p) && !self.defaults.contains_key(*p))
            .collect();
        if !missing.is_empty() {
            return Err(TodoError::validation(
                "variables",
                format!("template '{}' needs: {}", self.name, missing.join(", ")),
            ));
        }

        let rendered = placeholder_regex().replace_all(&self.body, |caps: &Captures<'_>| {
            let key = &caps[1];
            vars.get(key)
                .or_else(|| self.defaults.get(key))
                .cloned()
                .unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Where a listed template comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateSource {
    Builtin,
    File,
}

/// One entry of [`TemplateManager::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateInfo {
    pub name: String,
    pub source: TemplateSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Parameters of [`TemplateManager::create_from_template`].
#[derive(Debug, Clone)]
pub struct TemplateRequest<'a> {
    pub name: &'a str,
    pub task: &'a str,
    pub priority: Priority,
    pub todo_type: TodoType,
    pub parent_id: Option<&'a str>,
    pub variables: &'a BTreeMap<String, String>,
}

/// Loads and renders templates for one working directory.
#[derive(Debug, Clone)]
pub struct TemplateManager {
    dir: PathBuf,
}

impl TemplateManager {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Folder searched for `<name>.md` files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load a template by name. Files shadow built-ins of the same name.
    ///
    /// # Errors
    ///
    /// - not-found when neither a file nor a built-in exists
    /// - validation for names that are not plain file stems
    /// - operation when the file exists but cannot be read
    pub fn load(&self, name: &str) -> Result<Template> {
        let name = name.trim();
        validate_name(name)?;

        let path = self.dir.join(format!("{name}.{TEMPLATE_EXTENSION}"));
        if path.is_file() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read template: {}", path.display()))
                .map_err(|e| TodoError::operation("template", format!("{e:#}")))?;
            debug!(name, path = %path.display(), "Loaded template file");
            return Template::parse(name, &raw);
        }

        match builtin(name) {
            Some(raw) => Template::parse(name, raw),
            None => Err(TodoError::template_not_found(name)),
        }
    }

    /// Every available template, sorted by name.
    ///
    /// # Errors
    ///
    /// Fails when the templates folder exists but cannot be read.
    pub fn list(&self) -> Result<Vec<TemplateInfo>> {
        let mut found: BTreeMap<String, TemplateInfo> = BUILTIN_TEMPLATES
            .iter()
            .map(|(name, raw)| {
                let description = Template::parse(name, raw).ok().and_then(|t| t.description);
                (
                    (*name).to_string(),
                    TemplateInfo {
                        name: (*name).to_string(),
                        source: TemplateSource::Builtin,
                        description,
                    },
                )
            })
            .collect();

        if self.dir.is_dir() {
            let entries = fs::read_dir(&self.dir)
                .with_context(|| format!("Failed to read templates directory: {}", self.dir.display()))
                .map_err(|e| TodoError::operation("template", format!("{e:#}")))?;
            for entry in entries {
                let path = entry?.path();
                if path.extension().is_none_or(|ext| ext != TEMPLATE_EXTENSION) {
                    continue;
                }
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let description = self.load(name).ok().and_then(|t| t.description);
                found.insert(
                    name.to_string(),
                    TemplateInfo {
                        name: name.to_string(),
                        source: TemplateSource::File,
                        description,
                    },
                );
            }
        }
        Ok(found.into_values().collect())
    }

    /// Render `request.name` and create a todo from the result.
    ///
    /// The todo keeps the default sections; every `##` block the template
    /// adds beyond them becomes a custom freeform section.
    ///
    /// # Errors
    ///
    /// Propagates template lookup and rendering errors, and store failures.
    pub fn create_from_template(&self, store: &TodoStore, request: &TemplateRequest<'_>) -> Result<Todo> {
        let template = self.load(request.name)?;

        let mut vars = request.variables.clone();
        vars.insert("task".into(), request.task.to_string());
        vars.insert("priority".into(), request.priority.to_string());
        vars.insert("type".into(), request.todo_type.to_string());
        vars.insert("date".into(), chrono::Local::now().format("%Y-%m-%d").to_string());

        let rendered = template.execute(&vars)?;
        let (body, sections) = compose_body(request.task, &rendered);

        let mut new = NewTodo::new(request.task, request.priority, request.todo_type)
            .with_body(body, sections);
        if let Some(parent) = request.parent_id.filter(|p| !p.is_empty()) {
            new = new.with_parent(parent);
        }
        let todo = store.create_with(new)?;
        info!(id = %todo.id, template = %template.name, "Created todo from template");
        Ok(todo)
    }
}

/// Merge a rendered template into the default section layout.
fn compose_body(task: &str, rendered: &str) -> (String, BTreeMap<String, SectionDefinition>) {
    let mut sections = default_sections();
    let mut body = TodoBody::parse(rendered);

    if body.task().is_none() {
        let heading = format!("{TASK_PREFIX} {task}");
        body.preamble = if body.preamble.is_empty() {
            heading
        } else {
            format!("{heading}\n\n{}", body.preamble)
        };
    }

    let mut next_order = CUSTOM_SECTION_ORDER;
    for block in &body.sections {
        let known = sections.iter().any(|(key, def)| {
            def.title.eq_ignore_ascii_case(&block.title) || *key == normalize_key(&block.title)
        });
        let key = normalize_key(&block.title);
        if known || key.is_empty() {
            continue;
        }
        sections.insert(
            key,
            SectionDefinition::new(block.title.clone(), next_order, SectionSchema::Freeform)
                .custom(true),
        );
        next_order += 1;
    }

    body.reorder(&sections);
    (body.render(), sections)
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(TodoError::validation("template", format!("'{name}' is not a valid template name")))
    }
}

// ============================================================================
// Built-in Templates
// ============================================================================

fn builtin(name: &str) -> Option<&'static str> {
    BUILTIN_TEMPLATES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, raw)| *raw)
}

const BUILTIN_TEMPLATES: [(&str, &str); 5] = [
    ("bug", BUG_TEMPLATE),
    ("feature", FEATURE_TEMPLATE),
    ("prd", PRD_TEMPLATE),
    ("refactor", REFACTOR_TEMPLATE),
    ("research", RESEARCH_TEMPLATE),
];

const BUG_TEMPLATE: &str = r"---
description: Bug fix with reproduction and regression test
---
# Task: {{task}}

## Reproduction Steps

1.

## Expected vs Actual

## Findings & Research

## Checklist

- [ ] Reproduce the bug
- [ ] Write a failing regression test
- [ ] Fix the root cause
- [ ] Verify the fix
";

const FEATURE_TEMPLATE: &str = r"---
description: Feature work driven by tests
---
# Task: {{task}}

Priority: {{priority}} | Created: {{date}}

## Test Strategy

## Checklist

- [ ] Define acceptance criteria
- [ ] Write tests
- [ ] Implement
- [ ] Update documentation
";

const PRD_TEMPLATE: &str = r"---
description: Product requirements document
---
# Task: {{task}}

## Problem Statement

## Goals

## User Stories

## Requirements

## Success Metrics

## Checklist

- [ ] Problem agreed
- [ ] Requirements reviewed
- [ ] Break down into phases
";

const REFACTOR_TEMPLATE: &str = r"---
description: Behaviour-preserving restructuring
---
# Task: {{task}}

## Current Design

## Target Design

## Maintainability Analysis

## Checklist

- [ ] Characterization tests in place
- [ ] Refactor in small steps
- [ ] All tests still pass
";

const RESEARCH_TEMPLATE: &str = r"---
description: Investigation with recorded findings
---
# Task: {{task}}

## Questions

## Findings & Research

## Recommendation
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::WorkingPaths;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_parse_detects_placeholders_once() {
        let t = Template::parse("t", "{{a}} {{ .b }} {{a}}").unwrap();
        assert_eq!(t.placeholders, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_execute_uses_defaults() {
        let raw = "---\ndefaults:\n  owner: team\n---\nOwner: {{owner}} / {{task}}";
        let t = Template::parse("t", raw).unwrap();
        assert_eq!(t.execute(&vars(&[("task", "X")])).unwrap(), "Owner: team / X");
        assert_eq!(
            t.execute(&vars(&[("task", "X"), ("owner", "me")])).unwrap(),
            "Owner: me / X"
        );
    }

    #[test]
    fn test_execute_missing_and_unknown_variables() {
        let t = Template::parse("t", "{{needed}}").unwrap();
        let missing = t.execute(&BTreeMap::new()).unwrap_err();
        assert!(missing.client_message().contains("needed"));

        let unknown = t
            .execute(&vars(&[("needed", "x"), ("surprise", "y")]))
            .unwrap_err();
        assert!(unknown.client_message().contains("surprise"));
    }

    #[test]
    fn test_load_prefers_file_over_builtin() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("bug.md"), "# Task: {{task}}\n\n## Custom").unwrap();
        let manager = TemplateManager::new(temp.path());
        assert_eq!(manager.load("bug").unwrap().body, "# Task: {{task}}\n\n## Custom");
        assert!(manager.load("feature").is_ok());
    }

    #[test]
    fn test_load_missing_template() {
        let temp = TempDir::new().unwrap();
        let manager = TemplateManager::new(temp.path());
        let err = manager.load("nope").unwrap_err();
        assert_eq!(err.client_message(), "Template not found");
        assert!(manager.load("../evil").is_err());
    }

    #[test]
    fn test_list_merges_sources() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("custom.md"), "---\ndescription: Mine\n---\nbody").unwrap();
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();
        let manager = TemplateManager::new(temp.path());
        let list = manager.list().unwrap();

        let names: Vec<_> = list.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["bug", "custom", "feature", "prd", "refactor", "research"]);
        let custom = list.iter().find(|t| t.name == "custom").unwrap();
        assert_eq!(custom.source, TemplateSource::File);
        assert_eq!(custom.description.as_deref(), Some("Mine"));
    }

    #[test]
    fn test_builtins_render_with_standard_variables() {
        let temp = TempDir::new().unwrap();
        let manager = TemplateManager::new(temp.path());
        let standard = vars(&[("task", "T"), ("priority", "high"), ("type", "bug"), ("date", "2025-01-01")]);
        for (name, _) in BUILTIN_TEMPLATES {
            manager.load(name).unwrap().execute(&standard).unwrap();
        }
    }

    #[test]
    fn test_create_from_template_adds_custom_sections() {
        let temp = TempDir::new().unwrap();
        let paths = WorkingPaths::from_root(temp.path());
        let store = TodoStore::new(paths.clone());
        let manager = TemplateManager::new(&paths.templates_dir);

        let request = TemplateRequest {
            name: "bug",
            task: "Login fails",
            priority: Priority::High,
            todo_type: TodoType::Bug,
            parent_id: None,
            variables: &BTreeMap::new(),
        };
        let todo = manager.create_from_template(&store, &request).unwrap();

        assert_eq!(todo.id, "login-fails");
        assert!(todo.sections["reproduction_steps"].custom);
        assert!(todo.sections.contains_key("checklist"));

        let body = store.read_content("login-fails").unwrap();
        assert!(body.starts_with("# Task: Login fails"));
        assert!(body.contains("- [ ] Reproduce the bug"));
        assert!(body.contains("## Reproduction Steps"));
    }
}
