//! File-backed todo store for one working directory.
//!
//! Active todos live in `<W>/.claude/todos/<id>.md`; archived ones are moved
//! under `<W>/.claude/archive/`. Every write goes through a temp file in the
//! destination directory followed by a rename, so readers never observe a
//! partially written todo.

use chrono::{DateTime, Datelike, Duration, Local, Timelike};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, TodoError};
use crate::paths::WorkingPaths;

use super::frontmatter::{parse_document, render_document};
use super::sections::{apply_operation, SectionOperation, TodoBody};
use super::types::{default_sections, Priority, SectionDefinition, TodoStatus, TodoType};
use super::Todo;

/// Maximum length of a generated id before collision suffixes.
const MAX_SLUG_LEN: usize = 50;

const TODO_EXTENSION: &str = "md";

// ============================================================================
// Filters and Updates
// ============================================================================

/// Filter for [`TodoStore::list`]. `None` / `0` disables a criterion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub status: Option<TodoStatus>,
    pub priority: Option<Priority>,
    /// Keep todos started within the last `days` days.
    pub days: u32,
}

impl ListFilter {
    #[must_use]
    pub fn with_status(mut self, status: TodoStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_days(mut self, days: u32) -> Self {
        self.days = days;
        self
    }

    /// Check a todo against every enabled criterion.
    #[must_use]
    pub fn matches(&self, todo: &Todo, now: DateTime<Local>) -> bool {
        if self.status.is_some_and(|s| s != todo.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != todo.priority) {
            return false;
        }
        if self.days > 0 && todo.started < now - Duration::days(i64::from(self.days)) {
            return false;
        }
        true
    }
}

/// Front-matter changes carried by an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataUpdate {
    pub status: Option<TodoStatus>,
    pub priority: Option<Priority>,
    pub parent_id: Option<String>,
    pub current_test: Option<String>,
    pub completed: Option<DateTime<Local>>,
}

impl MetadataUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    #[must_use]
    pub fn status(status: TodoStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn parent(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            ..Self::default()
        }
    }
}

/// Everything needed to create a todo.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTodo {
    pub task: String,
    pub priority: Priority,
    pub todo_type: TodoType,
    pub parent_id: Option<String>,
    /// Pre-rendered markdown body; defaults to empty default sections.
    pub body: Option<String>,
    /// Section definitions; defaults to [`default_sections`].
    pub sections: Option<BTreeMap<String, SectionDefinition>>,
    pub tags: Vec<String>,
}

impl NewTodo {
    pub fn new(task: impl Into<String>, priority: Priority, todo_type: TodoType) -> Self {
        Self {
            task: task.into(),
            priority,
            todo_type,
            parent_id: None,
            body: None,
            sections: None,
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: String, sections: BTreeMap<String, SectionDefinition>) -> Self {
        self.body = Some(body);
        self.sections = Some(sections);
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// A section rewrite carried by an update.
#[derive(Debug, Clone, Copy)]
pub struct SectionEdit<'a> {
    pub key: &'a str,
    pub operation: SectionOperation,
    pub content: &'a str,
}

// ============================================================================
// Store
// ============================================================================

/// Persists todos for a single working directory.
#[derive(Debug, Clone)]
pub struct TodoStore {
    paths: WorkingPaths,
}

impl TodoStore {
    #[must_use]
    pub fn new(paths: WorkingPaths) -> Self {
        Self { paths }
    }

    /// Directory holding active todos.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.paths.todos_dir
    }

    /// Directory archived todos are moved under.
    #[must_use]
    pub fn archive_root(&self) -> PathBuf {
        self.paths.archive_dir()
    }

    /// Path of an active todo. Ids are plain file stems; anything that could
    /// escape the todos directory is rejected.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty or path-like ids.
    pub fn todo_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.base_path().join(format!("{id}.{TODO_EXTENSION}")))
    }

    // ------------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------------

    /// Create a todo with the default sections.
    ///
    /// # Errors
    ///
    /// Fails when the task is empty or the file cannot be written.
    pub fn create(&self, task: &str, priority: Priority, todo_type: TodoType) -> Result<Todo> {
        self.create_with(NewTodo::new(task, priority, todo_type))
    }

    /// Create a todo from a full description. The id is reserved with an
    /// exclusive create so concurrent callers never share a file.
    ///
    /// # Errors
    ///
    /// Fails when the task is empty or spans several lines, or when the file
    /// cannot be written.
    pub fn create_with(&self, new: NewTodo) -> Result<Todo> {
        let task = new.task.trim();
        if task.is_empty() {
            return Err(TodoError::validation("task", "must not be empty"));
        }
        if task.chars().any(char::is_control) {
            return Err(TodoError::validation(
                "task",
                "must be a single line without control characters",
            ));
        }
        fs::create_dir_all(self.base_path())?;

        let started = now_seconds();
        let (id, path) = self.reserve_id(&slugify(task, started))?;

        let sections = new.sections.unwrap_or_else(default_sections);
        let body = match new.body {
            Some(rendered) => rendered,
            None => TodoBody::new(task, &sections).render(),
        };
        let todo = Todo {
            id,
            task: task.to_string(),
            started,
            completed: None,
            status: TodoStatus::InProgress,
            priority: new.priority,
            todo_type: new.todo_type,
            parent_id: new.parent_id.filter(|p| !p.is_empty()),
            current_test: None,
            tags: new.tags,
            sections,
        };

        if let Err(e) = write_atomic(&path, &render_document(&todo, &body)?) {
            let _ = fs::remove_file(&path);
            return Err(e);
        }
        info!(id = %todo.id, todo_type = %todo.todo_type, "Created todo");
        Ok(todo)
    }

    fn reserve_id(&self, slug: &str) -> Result<(String, PathBuf)> {
        for attempt in 1..=1000u32 {
            let candidate = if attempt == 1 {
                slug.to_string()
            } else {
                format!("{slug}-{attempt}")
            };
            let path = self.todo_path(&candidate)?;
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok((candidate, path)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TodoError::conflict(format!("no free id for '{slug}'")))
    }

    // ------------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------------

    /// Load a todo's metadata.
    ///
    /// # Errors
    ///
    /// Returns not-found when no active todo has this id.
    pub fn read(&self, id: &str) -> Result<Todo> {
        self.read_with_content(id).map(|(todo, _)| todo)
    }

    /// Load a todo and its raw markdown body.
    ///
    /// # Errors
    ///
    /// Returns not-found when no active todo has this id.
    pub fn read_with_content(&self, id: &str) -> Result<(Todo, String)> {
        let path = self.todo_path(id)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(TodoError::todo_not_found(id)),
            Err(e) => return Err(e.into()),
        };
        parse_document(&raw)
    }

    /// Load only the body of a todo.
    ///
    /// # Errors
    ///
    /// Returns not-found when no active todo has this id.
    pub fn read_content(&self, id: &str) -> Result<String> {
        self.read_with_content(id).map(|(_, body)| body)
    }

    /// Whether an active todo with this id exists.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.todo_path(id).map(|p| p.is_file()).unwrap_or(false)
    }

    /// List active todos matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Fails when the todos directory cannot be read.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Todo>> {
        self.list_cancellable(filter, &|| false)
    }

    /// Like [`list`](Self::list), checking `is_cancelled` between files.
    ///
    /// # Errors
    ///
    /// Returns `Operation("cancelled")` as soon as cancellation is observed.
    pub fn list_cancellable(
        &self,
        filter: &ListFilter,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<Vec<Todo>> {
        let dir = self.base_path();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let now = Local::now();
        let mut todos = Vec::new();
        for entry in fs::read_dir(dir)? {
            if is_cancelled() {
                return Err(TodoError::cancelled());
            }
            let path = entry?.path();
            if !is_todo_file(&path) {
                continue;
            }
            match load_file(&path) {
                Ok(todo) if filter.matches(&todo, now) => todos.push(todo),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable todo {}: {}", path.display(), e),
            }
        }
        sort_todos(&mut todos);
        Ok(todos)
    }

    /// List archived todos matching `filter` (read-only view).
    ///
    /// # Errors
    ///
    /// Never fails on individual unreadable files; they are skipped.
    pub fn list_archived(&self, filter: &ListFilter) -> Result<Vec<Todo>> {
        let root = self.archive_root();
        if !root.exists() {
            return Ok(Vec::new());
        }
        let now = Local::now();
        let mut todos: Vec<Todo> = WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_todo_file(e.path()))
            .filter_map(|e| match load_file(e.path()) {
                Ok(todo) => Some(todo),
                Err(err) => {
                    warn!("Skipping unreadable archive {}: {}", e.path().display(), err);
                    None
                }
            })
            .filter(|todo| filter.matches(todo, now))
            .collect();
        sort_todos(&mut todos);
        Ok(todos)
    }

    // ------------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------------

    /// Apply front-matter changes and/or a section edit, then rewrite the file.
    ///
    /// Moving to `completed` stamps `completed` with the current time unless
    /// an explicit timestamp is supplied.
    ///
    /// # Errors
    ///
    /// - not-found for unknown ids
    /// - validation for unknown sections or disallowed status transitions
    pub fn update(
        &self,
        id: &str,
        edit: Option<SectionEdit<'_>>,
        metadata: &MetadataUpdate,
    ) -> Result<Todo> {
        let (mut todo, body) = self.read_with_content(id)?;
        apply_metadata(&mut todo, metadata)?;

        let body = match edit {
            Some(edit) => {
                let def = todo.sections.get(edit.key).ok_or_else(|| {
                    TodoError::validation(
                        "section",
                        format!("'{}' is not a section of todo '{id}'", edit.key),
                    )
                })?;
                let mut parsed = TodoBody::parse(&body);
                let existing = parsed.get(edit.key, Some(def)).unwrap_or_default().to_string();
                let updated = apply_operation(&existing, edit.operation, edit.content, def.schema)?;
                parsed.set(edit.key, def, updated);
                parsed.render()
            }
            None => body,
        };

        write_atomic(&self.todo_path(id)?, &render_document(&todo, &body)?)?;
        debug!(id, "Updated todo");
        Ok(todo)
    }

    /// Rewrite a todo's front-matter, re-ordering body blocks to follow its
    /// section definitions. Content of every block is preserved.
    ///
    /// # Errors
    ///
    /// Returns not-found when the todo is not active.
    pub fn save(&self, todo: &Todo) -> Result<()> {
        let (_, body) = self.read_with_content(&todo.id)?;
        let mut parsed = TodoBody::parse(&body);
        parsed.reorder(&todo.sections);
        write_atomic(&self.todo_path(&todo.id)?, &render_document(todo, &parsed.render())?)
    }

    // ------------------------------------------------------------------------
    // Archive
    // ------------------------------------------------------------------------

    /// Daily archive bucket (`YYYY/MM/DD`) for a start time.
    #[must_use]
    pub fn daily_bucket(started: &DateTime<Local>) -> String {
        format!(
            "{:04}/{:02}/{:02}",
            started.year(),
            started.month(),
            started.day()
        )
    }

    /// Move a todo into `archive/<bucket>/<id>.md`. Without a bucket the
    /// daily path of the todo's start date is used.
    ///
    /// Returns the archive path.
    ///
    /// # Errors
    ///
    /// - not-found when the todo is not active (including already archived)
    /// - validation for buckets that escape the archive directory
    /// - conflict when the archive destination already exists
    pub fn archive(&self, id: &str, bucket: Option<&str>) -> Result<PathBuf> {
        let todo = self.read(id)?;
        let bucket = match bucket.map(str::trim).filter(|b| !b.is_empty()) {
            Some(b) => {
                validate_bucket(b)?;
                b.to_string()
            }
            None => Self::daily_bucket(&todo.started),
        };

        let dest_dir = self.archive_root().join(&bucket);
        fs::create_dir_all(&dest_dir)?;
        let dest = dest_dir.join(format!("{id}.{TODO_EXTENSION}"));
        if dest.exists() {
            return Err(TodoError::conflict(format!(
                "archive destination {} already exists",
                dest.display()
            )));
        }

        move_file(&self.todo_path(id)?, &dest)?;
        info!(id, archive = %dest.display(), "Archived todo");
        Ok(dest)
    }

    /// Archive every completed todo whose completion is older than `days`.
    ///
    /// Failures on individual todos are logged and skipped.
    ///
    /// # Errors
    ///
    /// Fails only when the active directory cannot be listed.
    pub fn archive_old(&self, days: u32) -> Result<Vec<String>> {
        let cutoff = Local::now() - Duration::days(i64::from(days));
        let candidates = self.list(&ListFilter::default().with_status(TodoStatus::Completed))?;

        let mut archived = Vec::new();
        for todo in candidates {
            let Some(completed) = todo.completed else {
                continue;
            };
            if completed >= cutoff {
                continue;
            }
            match self.archive(&todo.id, None) {
                Ok(_) => archived.push(todo.id),
                Err(e) => warn!(id = %todo.id, "Failed to archive old todo: {}", e),
            }
        }
        Ok(archived)
    }

    /// Group active todos whose normalized titles are identical.
    ///
    /// # Errors
    ///
    /// Fails when the active directory cannot be listed.
    pub fn find_duplicates(&self) -> Result<Vec<Vec<String>>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for todo in self.list(&ListFilter::default())? {
            groups
                .entry(normalize_title(&todo.task))
                .or_default()
                .push(todo.id);
        }
        Ok(groups
            .into_values()
            .filter(|ids| ids.len() > 1)
            .map(|mut ids| {
                ids.sort();
                ids
            })
            .collect())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn apply_metadata(todo: &mut Todo, metadata: &MetadataUpdate) -> Result<()> {
    if let Some(status) = metadata.status {
        if !todo.status.can_transition_to(status) {
            return Err(TodoError::validation(
                "status",
                format!("cannot move from {} to {}", todo.status, status),
            ));
        }
        todo.status = status;
        if status == TodoStatus::Completed && todo.completed.is_none() {
            todo.completed = Some(now_seconds());
        }
    }
    if let Some(priority) = metadata.priority {
        todo.priority = priority;
    }
    if let Some(parent) = &metadata.parent_id {
        if parent == &todo.id {
            return Err(TodoError::validation("parent_id", "a todo cannot be its own parent"));
        }
        todo.parent_id = Some(parent.clone()).filter(|p| !p.is_empty());
    }
    if let Some(current) = &metadata.current_test {
        todo.current_test = Some(current.clone()).filter(|c| !c.is_empty());
    }
    if let Some(completed) = metadata.completed {
        todo.completed = Some(completed);
    }
    Ok(())
}

/// Current local time truncated to whole seconds, matching on-disk precision.
fn now_seconds() -> DateTime<Local> {
    let now = Local::now();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Derive a filename-safe id from a task title.
///
/// # Example
///
/// ```
/// use todo_mcp::todo::store::slugify;
///
/// let now = chrono::Local::now();
/// assert_eq!(slugify("Phase 1: Design the API!", now), "phase-1-design-the-api");
/// ```
#[must_use]
pub fn slugify(task: &str, now: DateTime<Local>) -> String {
    let mut slug = String::with_capacity(task.len());
    let mut pending_dash = false;
    for c in task.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    if slug.is_empty() {
        slug = format!("todo-{}", now.format("%Y%m%d%H%M%S"));
    }
    slug
}

/// Lowercased title with punctuation stripped and whitespace collapsed.
#[must_use]
pub fn normalize_title(task: &str) -> String {
    task.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(TodoError::validation("id", format!("'{id}' is not a valid todo id")))
    }
}

fn validate_bucket(bucket: &str) -> Result<()> {
    let path = Path::new(bucket);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(TodoError::validation(
            "quarter",
            format!("'{bucket}' must be a relative path inside the archive"),
        ));
    }
    Ok(())
}

fn is_todo_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == TODO_EXTENSION)
}

fn load_file(path: &Path) -> Result<Todo> {
    let raw = fs::read_to_string(path)?;
    parse_document(&raw).map(|(todo, _)| todo)
}

fn sort_todos(todos: &mut [Todo]) {
    todos.sort_by(|a, b| a.started.cmp(&b.started).then_with(|| a.id.cmp(&b.id)));
}

/// Write `content` to `path` through a temp file in the same directory.
///
/// # Errors
///
/// The destination is untouched when any step fails.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| TodoError::internal(format!("{} has no parent", path.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| TodoError::from(e.error))?;
    Ok(())
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(TodoError::todo_not_found(
            from.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default(),
        )),
        Err(_) => {
            // cross-device: copy then remove
            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
    }
}
