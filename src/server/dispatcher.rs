//! Tool-call dispatcher.
//!
//! Every tool follows the same skeleton: parse typed parameters, resolve the
//! manager set for the request's working directory, run the operation, and
//! render a text result. Store work is synchronous filesystem I/O and runs on
//! the blocking pool. Indexing and linking are side channels: their failures
//! are logged and never fail the primary write.

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{ErrorKind, Result, TodoError};
use crate::manager::{ManagerFactory, ManagerSet, RequestContext};
use crate::templates::{TemplateManager, TemplateRequest};
use crate::todo::store::normalize_title;
use crate::todo::{
    conflicting_section, match_item, HierarchyNode, LinkKind, NewTodo, SectionDefinition, SectionEdit,
    SectionOperation, Todo, TodoBody, TodoLinker, TodoStatus, TodoStore, TodoType,
};

use super::format;
use super::params::{
    AddSectionParams, ArchiveParams, Args, CleanOperation, CleanParams, CreateMultiParams,
    CreateParams, LinkParams, ReadFormat, ReadParams, ReorderSectionsParams, SearchParams,
    SectionsParams, StatsParams, TemplateParams, UpdateParams,
};
use super::tools::Tool;

/// Minimum share of the new task's words another title must contain to be
/// reported as similar.
const SIMILARITY_THRESHOLD: f64 = 0.6;
const MAX_SIMILAR: usize = 5;

/// Result of one tool call as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutcome {
    #[must_use]
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// Runs tool calls against the manager factory.
#[derive(Debug, Clone)]
pub struct TodoServer {
    factory: ManagerFactory,
    auto_archive: bool,
    request_timeout: Duration,
}

impl TodoServer {
    #[must_use]
    pub fn new(factory: ManagerFactory, config: &ServerConfig) -> Self {
        Self {
            factory,
            auto_archive: config.auto_archive,
            request_timeout: config.request_timeout(),
        }
    }

    #[must_use]
    pub fn factory(&self) -> &ManagerFactory {
        &self.factory
    }

    /// A fresh request context with the configured deadline.
    #[must_use]
    pub fn context(&self) -> RequestContext {
        RequestContext::new(self.request_timeout)
    }

    /// Run a tool by name. Never fails: errors become an `is_error`
    /// outcome carrying the client-facing message.
    pub async fn call_tool(&self, name: &str, args: &Value, ctx: RequestContext) -> ToolOutcome {
        let result = match name.parse::<Tool>() {
            Ok(tool) => match tokio::time::timeout(ctx.remaining(), self.dispatch(tool, args, &ctx)).await {
                Ok(result) => result,
                Err(_) => Err(TodoError::cancelled()),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(text) => ToolOutcome::success(text),
            Err(e) => {
                match e.kind() {
                    ErrorKind::NotFound | ErrorKind::Validation | ErrorKind::Conflict => {
                        debug!(tool = name, "Tool call rejected: {}", e);
                    }
                    _ => warn!(tool = name, "Tool call failed: {}", e),
                }
                ToolOutcome::error(e.client_message())
            }
        }
    }

    /// Run a tool, returning the raw result.
    ///
    /// # Errors
    ///
    /// Any error of the operation, unchanged.
    pub async fn dispatch(&self, tool: Tool, args: &Value, ctx: &RequestContext) -> Result<String> {
        let args = Args::new(args)?;
        debug!(tool = %tool, working_dir = ctx.working_directory().unwrap_or("-"), "Dispatching tool call");
        match tool {
            Tool::Create => self.create(CreateParams::parse(args)?, ctx).await,
            Tool::CreateMulti => self.create_multi(CreateMultiParams::parse(args)?, ctx).await,
            Tool::Read => self.read(ReadParams::parse(args)?, ctx).await,
            Tool::Update => self.update(UpdateParams::parse(args)?, ctx).await,
            Tool::Search => self.search(SearchParams::parse(args)?, ctx).await,
            Tool::Archive => self.archive(ArchiveParams::parse(args)?, ctx).await,
            Tool::Link => self.link(LinkParams::parse(args)?, ctx).await,
            Tool::Stats => self.stats(StatsParams::parse(args)?, ctx).await,
            Tool::Clean => self.clean(CleanParams::parse(args)?, ctx).await,
            Tool::Template => self.template(TemplateParams::parse(args)?, ctx).await,
            Tool::Sections => self.sections(SectionsParams::parse(args)?, ctx).await,
            Tool::AddSection => self.add_section(AddSectionParams::parse(args)?, ctx).await,
            Tool::ReorderSections => {
                self.reorder_sections(ReorderSectionsParams::parse(args)?, ctx)
                    .await
            }
        }
    }

    // ========================================================================
    // Create
    // ========================================================================

    async fn create(&self, params: CreateParams, ctx: &RequestContext) -> Result<String> {
        let managers = self.factory.get_managers(ctx).await?;
        verify_required_parent(&managers, params.todo_type, params.parent_id.as_deref()).await?;

        let (store, templates) = (managers.store.clone(), managers.templates.clone());
        let request = params.clone();
        let (todo, template_warning) =
            blocking(move || create_todo(&store, &templates, &request)).await?;

        let mut warnings: Vec<String> = template_warning.into_iter().collect();
        let todo = match &params.parent_id {
            Some(parent) => match link_child(&managers, parent, &todo.id).await {
                Ok(linked) => linked,
                Err(e) if e.kind() == ErrorKind::Operation => return Err(e),
                Err(e) => {
                    warn!(id = %todo.id, parent = %parent, "Created todo but could not link it: {}", e);
                    warnings.push(format!("not linked to parent '{parent}': {}", e.client_message()));
                    todo
                }
            },
            None => todo,
        };
        reindex(&managers, &todo).await;

        let store = managers.store.clone();
        let (id, task) = (todo.id.clone(), todo.task.clone());
        let (path, others) = blocking(move || {
            Ok((store.todo_path(&id)?, store.list(&Default::default())?))
        })
        .await?;
        let similar = similar_todos(&todo.id, &task, &others);

        let mut response = json!({
            "id": todo.id,
            "path": path.display().to_string(),
            "message": format!("Created {} todo '{}'", todo.todo_type, todo.task),
        });
        if let Some(hint) = creation_hint(&todo) {
            response["hint"] = json!(hint);
        }
        if !similar.is_empty() {
            response["similar_todos"] = serde_json::to_value(&similar)?;
        }
        if !warnings.is_empty() {
            response["warning"] = json!(warnings.join("; "));
        }
        format::to_json(&response)
    }

    async fn create_multi(&self, params: CreateMultiParams, ctx: &RequestContext) -> Result<String> {
        require_parent(params.parent.todo_type, None, "parent.type")?;
        let managers = self.factory.get_managers(ctx).await?;

        let store = managers.store.clone();
        let spec = params.parent.clone();
        let parent = blocking(move || store.create(&spec.task, spec.priority, spec.todo_type)).await?;
        reindex(&managers, &parent).await;

        let mut children = Vec::with_capacity(params.children.len());
        let mut failures = Vec::new();
        for spec in params.children {
            let store = managers.store.clone();
            let task = spec.task.clone();
            let created = blocking(move || store.create(&spec.task, spec.priority, spec.todo_type)).await;
            match created {
                Ok(child) => {
                    let child = match link_child(&managers, &parent.id, &child.id).await {
                        Ok(linked) => linked,
                        Err(e) => {
                            warn!(parent = %parent.id, child = %child.id, "Failed to link child: {}", e);
                            child
                        }
                    };
                    reindex(&managers, &child).await;
                    children.push(child);
                }
                Err(e) => {
                    warn!(parent = %parent.id, task = %task, "Failed to create child: {}", e);
                    failures.push(format!("{task}: {}", e.client_message()));
                }
            }
        }
        info!(parent = %parent.id, children = children.len(), "Created multi-phase todo");

        let tree = format::render_tree(&HierarchyNode {
            todo: parent.clone(),
            children: children
                .iter()
                .map(|c| HierarchyNode {
                    todo: c.clone(),
                    children: Vec::new(),
                })
                .collect(),
        });
        let mut summary = json!({
            "parent_id": parent.id,
            "children_created": children.len(),
            "children": children.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
        });
        if !failures.is_empty() {
            summary["failed"] = json!(failures);
        }
        Ok(format!(
            "Created multi-phase todo with {} children:\n\n{tree}\n{}",
            children.len(),
            format::to_json(&summary)?
        ))
    }

    // ========================================================================
    // Read / Update
    // ========================================================================

    async fn read(&self, params: ReadParams, ctx: &RequestContext) -> Result<String> {
        let managers = self.factory.get_managers(ctx).await?;
        let store = managers.store.clone();

        if let Some(id) = params.id {
            return match params.format {
                ReadFormat::Full => {
                    let (todo, body) = blocking(move || store.read_with_content(&id)).await?;
                    format::full(&todo, &body)
                }
                ReadFormat::Summary | ReadFormat::List => {
                    let todo = blocking(move || store.read(&id)).await?;
                    format::single(&todo)
                }
            };
        }

        let (filter, include_archived, cancel) = (params.filter, params.include_archived, ctx.clone());
        let (todos, archived) = blocking(move || {
            let todos = store.list_cancellable(&filter, &|| cancel.is_cancelled())?;
            let archived = if include_archived {
                store.list_archived(&filter)?
            } else {
                Vec::new()
            };
            Ok((todos, archived))
        })
        .await?;

        match params.format {
            ReadFormat::Summary => Ok(format::summary(&todos, &archived)),
            ReadFormat::List | ReadFormat::Full => format::list(&todos, &archived),
        }
    }

    async fn update(&self, params: UpdateParams, ctx: &RequestContext) -> Result<String> {
        let managers = self.factory.get_managers(ctx).await?;
        let store = managers.store.clone();
        let UpdateParams {
            id,
            section,
            metadata,
        } = params;

        let write = {
            let (id, section, metadata) = (id.clone(), section.clone(), metadata.clone());
            blocking(move || {
                if let Some(parent) = metadata.parent_id.as_deref().filter(|p| !p.is_empty()) {
                    check_parent(&store, parent, Some(id.as_str()), "metadata.parent_id")?;
                }
                if let Some(section) = &section {
                    if section.operation != SectionOperation::Toggle {
                        let todo = store.read(&id)?;
                        let schema = todo.schema_of(&section.section).ok_or_else(|| {
                            TodoError::validation(
                                "section",
                                format!("'{}' is not a section of todo '{id}'", section.section),
                            )
                        })?;
                        schema.validate(&section.content)?;
                    }
                }
                let edit = section.as_ref().map(|s| SectionEdit {
                    key: &s.section,
                    operation: s.operation,
                    content: &s.content,
                });
                let todo = store.update(&id, edit, &metadata)?;
                let body = store.read_content(&id)?;
                Ok((todo, body))
            })
        };
        let (todo, body) = write.await?;

        if metadata.status == Some(TodoStatus::Completed) && self.auto_archive {
            let store = managers.store.clone();
            let archive_id = id.clone();
            let path = blocking(move || store.archive(&archive_id, None)).await?;
            managers.unindex(&id).await;
            return Ok(format!(
                "Todo '{id}' completed and archived to {}",
                path.display()
            ));
        }
        managers.index(&todo, &body).await;

        let mut changes = Vec::new();
        if let Some(section) = &section {
            changes.push(format!("section '{}' ({})", section.section, section.operation));
        }
        if !metadata.is_empty() {
            changes.push(format!("metadata ({})", metadata_fields(&metadata).join(", ")));
        }
        let mut receipt = format!("Updated todo '{id}': {}\nStatus: {}", changes.join(", "), todo.status);

        if let Some(section) = section.filter(|s| s.operation == SectionOperation::Toggle) {
            let content = TodoBody::parse(&body)
                .get(&section.section, todo.sections.get(&section.section))
                .unwrap_or_default()
                .to_string();
            if let Some(item) = match_item(&content, &section.content) {
                let state = serde_json::to_value(item.status)?;
                receipt.push_str(&format!(
                    "\nItem '{}' is now {}",
                    item.text,
                    state.as_str().unwrap_or_default()
                ));
            }
        }
        Ok(receipt)
    }

    // ========================================================================
    // Search / Archive / Link
    // ========================================================================

    async fn search(&self, params: SearchParams, ctx: &RequestContext) -> Result<String> {
        let managers = self.factory.get_managers(ctx).await?;
        let indexer = managers
            .indexer
            .as_ref()
            .ok_or_else(|| TodoError::operation("search", "search not available"))?;
        if ctx.is_cancelled() {
            return Err(TodoError::cancelled());
        }
        let results = indexer
            .search_todos(&params.query, &params.filters, params.limit)
            .await?;
        format::to_json(&json!({
            "query": params.query,
            "count": results.len(),
            "results": results,
        }))
    }

    async fn archive(&self, params: ArchiveParams, ctx: &RequestContext) -> Result<String> {
        let managers = self.factory.get_managers(ctx).await?;
        let store = managers.store.clone();
        let ArchiveParams { id, quarter } = params;

        let archive_id = id.clone();
        let path = blocking(move || store.archive(&archive_id, quarter.as_deref())).await?;
        managers.unindex(&id).await;
        format::to_json(&json!({
            "id": id,
            "archive_path": path.display().to_string(),
            "message": format!("Archived todo '{id}'"),
        }))
    }

    async fn link(&self, params: LinkParams, ctx: &RequestContext) -> Result<String> {
        let managers = self.factory.get_managers(ctx).await?;
        let store = managers.store.clone();
        let LinkParams {
            parent_id,
            child_id,
            kind,
        } = params;

        let (parent, child) = (parent_id.clone(), child_id.clone());
        let linked = blocking(move || TodoLinker::new(&store).link(&parent, &child, kind)).await?;
        reindex(&managers, &linked).await;
        format::to_json(&json!({
            "parent_id": parent_id,
            "child_id": child_id,
            "link_type": kind.to_string(),
            "message": format!("Linked '{child_id}' under '{parent_id}'"),
        }))
    }

    // ========================================================================
    // Stats / Clean / Templates
    // ========================================================================

    async fn stats(&self, params: StatsParams, ctx: &RequestContext) -> Result<String> {
        let managers = self.factory.get_managers(ctx).await?;
        let engine = managers.stats.clone();
        let cancel = ctx.clone();
        let stats = blocking(move || engine.generate_cancellable(params.period, &|| cancel.is_cancelled())).await?;
        format::to_json(&stats)
    }

    async fn clean(&self, params: CleanParams, ctx: &RequestContext) -> Result<String> {
        let managers = self.factory.get_managers(ctx).await?;
        let store = managers.store.clone();

        match params.operation {
            CleanOperation::ArchiveOld => {
                let days = params.days;
                let archived = blocking(move || store.archive_old(days)).await?;
                for id in &archived {
                    managers.unindex(id).await;
                }
                let mut text = format!(
                    "Archived {} completed todo(s) older than {days} days",
                    archived.len()
                );
                for id in &archived {
                    text.push_str(&format!("\n  - {id}"));
                }
                Ok(text)
            }
            CleanOperation::FindDuplicates => {
                let groups = blocking(move || store.find_duplicates()).await?;
                if groups.is_empty() {
                    return Ok("No duplicate todos found".to_string());
                }
                let mut text = format!("Found {} group(s) of duplicate todos:", groups.len());
                for group in &groups {
                    text.push_str(&format!("\n  - {}", group.join(", ")));
                }
                Ok(text)
            }
        }
    }

    async fn template(&self, params: TemplateParams, ctx: &RequestContext) -> Result<String> {
        let managers = self.factory.get_managers(ctx).await?;
        let templates = managers.templates.clone();

        let Some(name) = params.template.clone() else {
            let dir = templates.dir().display().to_string();
            let list = blocking(move || templates.list()).await?;
            return format::to_json(&json!({ "directory": dir, "templates": list }));
        };
        verify_required_parent(&managers, params.todo_type, params.parent_id.as_deref()).await?;

        let store = managers.store.clone();
        let request = params.clone();
        let todo = blocking(move || {
            let task = request.task.as_deref().unwrap_or_default();
            templates.create_from_template(
                &store,
                &TemplateRequest {
                    name: &name,
                    task,
                    priority: request.priority,
                    todo_type: request.todo_type,
                    parent_id: None,
                    variables: &request.variables,
                },
            )
        })
        .await?;

        let mut warning = None;
        let todo = match &params.parent_id {
            Some(parent) => match link_child(&managers, parent, &todo.id).await {
                Ok(linked) => linked,
                Err(e) if e.kind() == ErrorKind::Operation => return Err(e),
                Err(e) => {
                    warn!(id = %todo.id, parent = %parent, "Failed to link templated todo: {}", e);
                    warning = Some(format!("not linked to parent '{parent}': {}", e.client_message()));
                    todo
                }
            },
            None => todo,
        };
        reindex(&managers, &todo).await;

        let store = managers.store.clone();
        let id = todo.id.clone();
        let path = blocking(move || store.todo_path(&id)).await?;
        let mut response = json!({
            "id": todo.id,
            "path": path.display().to_string(),
            "template": params.template,
            "message": format!("Created todo '{}' from template", todo.task),
        });
        if let Some(warning) = warning {
            response["warning"] = json!(warning);
        }
        format::to_json(&response)
    }

    // ========================================================================
    // Sections
    // ========================================================================

    async fn sections(&self, params: SectionsParams, ctx: &RequestContext) -> Result<String> {
        let managers = self.factory.get_managers(ctx).await?;
        let store = managers.store.clone();
        let (todo, body) = blocking(move || store.read_with_content(&params.id)).await?;
        format::sections(&todo, &body)
    }

    async fn add_section(&self, params: AddSectionParams, ctx: &RequestContext) -> Result<String> {
        let managers = self.factory.get_managers(ctx).await?;
        let store = managers.store.clone();

        let AddSectionParams {
            id,
            key,
            title,
            schema,
            required,
            order,
        } = params;
        let (todo_id, section_key) = (id.clone(), key.clone());
        blocking(move || {
            let mut todo = store.read(&todo_id)?;
            if todo.sections.contains_key(&section_key) {
                return Err(TodoError::conflict(format!(
                    "section '{section_key}' already exists on todo '{todo_id}'"
                )));
            }
            if let Some(existing) = conflicting_section(&todo.sections, &section_key, &title) {
                return Err(TodoError::conflict(format!(
                    "title '{title}' collides with section '{existing}' on todo '{todo_id}'"
                )));
            }
            todo.sections.insert(
                section_key,
                SectionDefinition::new(title, order, schema)
                    .required(required)
                    .custom(true),
            );
            store.save(&todo)
        })
        .await?;
        info!(id = %id, key = %key, "Added section");
        Ok(format!(
            "Added section '{key}' ({schema}, order {order}) to todo '{id}'"
        ))
    }

    async fn reorder_sections(
        &self,
        params: ReorderSectionsParams,
        ctx: &RequestContext,
    ) -> Result<String> {
        let managers = self.factory.get_managers(ctx).await?;
        let store = managers.store.clone();
        let ReorderSectionsParams { id, order } = params;

        let todo_id = id.clone();
        let count = order.len();
        let keys = blocking(move || {
            let mut todo = store.read(&todo_id)?;
            apply_order(&mut todo, &order)?;
            store.save(&todo)?;
            Ok(crate::todo::ordered_keys(&todo.sections)
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>())
        })
        .await?;
        Ok(format!(
            "Reordered {count} section(s) of todo '{id}'\nOrder: {}",
            keys.join(", ")
        ))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Phases and subtasks cannot be created without a parent.
fn require_parent(todo_type: TodoType, parent_id: Option<&str>, field: &str) -> Result<()> {
    if todo_type.requires_parent() && parent_id.map_or(true, |p| p.trim().is_empty()) {
        return Err(TodoError::validation(
            field,
            format!("a {todo_type} todo must have a parent"),
        ));
    }
    Ok(())
}

/// Verify a parent named by the caller exists and, for an existing child,
/// that linking would not create a cycle.
fn check_parent(store: &TodoStore, parent: &str, child: Option<&str>, field: &str) -> Result<()> {
    if !store.exists(parent) {
        return Err(TodoError::validation(
            field,
            format!("parent todo '{parent}' does not exist"),
        ));
    }
    match child {
        Some(child) => TodoLinker::new(store).check(parent, child),
        None => Ok(()),
    }
}

/// Parent-requiring todos need a parent that exists before anything is written.
async fn verify_required_parent(
    managers: &Arc<ManagerSet>,
    todo_type: TodoType,
    parent_id: Option<&str>,
) -> Result<()> {
    require_parent(todo_type, parent_id, "parent_id")?;
    match parent_id {
        Some(parent) if todo_type.requires_parent() => {
            let store = managers.store.clone();
            let parent = parent.to_string();
            blocking(move || check_parent(&store, &parent, None, "parent_id")).await
        }
        _ => Ok(()),
    }
}

/// Run synchronous store work on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TodoError::internal(format!("blocking task failed: {e}")))?
}

async fn link_child(managers: &Arc<ManagerSet>, parent: &str, child: &str) -> Result<Todo> {
    let store = managers.store.clone();
    let (parent, child) = (parent.to_string(), child.to_string());
    blocking(move || TodoLinker::new(&store).link(&parent, &child, LinkKind::ParentChild)).await
}

/// Re-read the body and push it to the index. Best-effort.
async fn reindex(managers: &Arc<ManagerSet>, todo: &Todo) {
    if !managers.has_search() {
        return;
    }
    let store = managers.store.clone();
    let id = todo.id.clone();
    match blocking(move || store.read_content(&id)).await {
        Ok(body) => managers.index(todo, &body).await,
        Err(e) => warn!(id = %todo.id, "Skipping index update: {}", e),
    }
}

/// Create the todo described by `params`. Returns a warning when a `prd`
/// todo fell back to default sections.
fn create_todo(
    store: &TodoStore,
    templates: &TemplateManager,
    params: &CreateParams,
) -> Result<(Todo, Option<String>)> {
    let no_vars = BTreeMap::new();
    let mut warning = None;
    let templated = if let Some(name) = &params.template {
        Some(templates.create_from_template(store, &template_request(name, params, &no_vars))?)
    } else if params.todo_type == TodoType::Prd {
        match templates.create_from_template(store, &template_request("prd", params, &no_vars)) {
            Ok(todo) => Some(todo),
            Err(e) => {
                warn!(task = %params.task, "PRD template failed, using default sections: {}", e);
                warning = Some(format!(
                    "prd template could not be applied ({}); default sections used",
                    e.client_message()
                ));
                None
            }
        }
    } else {
        None
    };

    let todo = match templated {
        Some(mut todo) if !params.tags.is_empty() => {
            todo.tags = params.tags.clone();
            store.save(&todo)?;
            todo
        }
        Some(todo) => todo,
        None => store.create_with(
            NewTodo::new(&params.task, params.priority, params.todo_type).with_tags(params.tags.clone()),
        )?,
    };
    Ok((todo, warning))
}

fn template_request<'a>(
    name: &'a str,
    params: &'a CreateParams,
    variables: &'a BTreeMap<String, String>,
) -> TemplateRequest<'a> {
    TemplateRequest {
        name,
        task: &params.task,
        priority: params.priority,
        todo_type: params.todo_type,
        parent_id: None,
        variables,
    }
}

#[derive(Debug, Serialize)]
struct SimilarTodo {
    id: String,
    task: String,
    similarity: f64,
}

fn similar_todos(id: &str, task: &str, others: &[Todo]) -> Vec<SimilarTodo> {
    let normalized = normalize_title(task);
    let words: HashSet<&str> = normalized.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let mut similar: Vec<SimilarTodo> = others
        .iter()
        .filter(|t| t.id != id)
        .filter_map(|t| {
            let other = normalize_title(&t.task);
            let shared = other
                .split_whitespace()
                .collect::<HashSet<_>>()
                .intersection(&words)
                .count();
            let ratio = shared as f64 / words.len() as f64;
            (ratio >= SIMILARITY_THRESHOLD).then(|| SimilarTodo {
                id: t.id.clone(),
                task: t.task.clone(),
                similarity: (ratio * 100.0).round() / 100.0,
            })
        })
        .collect();
    similar.sort_by(|a, b| b.similarity.total_cmp(&a.similarity).then_with(|| a.id.cmp(&b.id)));
    similar.truncate(MAX_SIMILAR);
    similar
}

fn multi_phase_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(phases?|stages?|milestones?|multi[- ]?step)\b")
            .expect("multi-phase pattern is a valid regex")
    })
}

fn creation_hint(todo: &Todo) -> Option<&'static str> {
    match todo.todo_type {
        TodoType::MultiPhase => Some("Add phases with todo_create using type 'phase' and this id as parent_id"),
        TodoType::Phase | TodoType::Subtask => None,
        _ if multi_phase_regex().is_match(&todo.task) => {
            Some("This looks like multi-phase work; todo_create_multi creates a parent with phase children")
        }
        _ => None,
    }
}

fn metadata_fields(metadata: &crate::todo::MetadataUpdate) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if metadata.status.is_some() {
        fields.push("status");
    }
    if metadata.priority.is_some() {
        fields.push("priority");
    }
    if metadata.parent_id.is_some() {
        fields.push("parent_id");
    }
    if metadata.current_test.is_some() {
        fields.push("current_test");
    }
    if metadata.completed.is_some() {
        fields.push("completed");
    }
    fields
}

fn apply_order(todo: &mut Todo, order: &BTreeMap<String, i64>) -> Result<()> {
    for (raw, position) in order {
        let key = crate::todo::normalize_key(raw);
        let def = todo.sections.get_mut(&key).ok_or_else(|| {
            TodoError::validation(
                format!("order.{raw}"),
                format!("'{raw}' is not a section of todo '{}'", todo.id),
            )
        })?;
        def.order = *position;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockIndexerFactory;
    use tempfile::TempDir;

    async fn server(dir: &TempDir) -> (TodoServer, Arc<MockIndexerFactory>) {
        let indexers = Arc::new(MockIndexerFactory::new());
        let config = ServerConfig::new(dir.path());
        let factory = ManagerFactory::new(&config, indexers.clone()).await.unwrap();
        (TodoServer::new(factory, &config), indexers)
    }

    async fn call(server: &TodoServer, tool: &str, args: Value) -> ToolOutcome {
        server.call_tool(tool, &args, server.context()).await
    }

    async fn create(server: &TodoServer, args: Value) -> String {
        let out = call(server, "todo_create", args).await;
        assert!(!out.is_error, "{}", out.text);
        let value: Value = serde_json::from_str(&out.text).unwrap();
        value["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_create_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;

        let id = create(&server, json!({"task": "Write parser", "priority": "low", "type": "bug"})).await;
        assert_eq!(id, "write-parser");

        let out = call(&server, "todo_read", json!({"id": id})).await;
        let value: Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(value["task"], "Write parser");
        assert_eq!(value["priority"], "low");
        assert_eq!(value["type"], "bug");
        assert_eq!(value["status"], "in_progress");
    }

    #[tokio::test]
    async fn test_phase_requires_parent() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let out = call(&server, "todo_create", json!({"task": "Phase 1: Plan", "type": "phase"})).await;
        assert!(out.is_error);
        assert!(out.text.contains("parent_id"));
    }

    #[tokio::test]
    async fn test_create_links_to_parent_and_reports_similar() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let parent = create(&server, json!({"task": "Build login flow", "type": "multi-phase"})).await;

        let out = call(
            &server,
            "todo_create",
            json!({"task": "Build login flow tests", "type": "phase", "parent_id": parent}),
        )
        .await;
        let value: Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(value["similar_todos"][0]["id"], parent.as_str());

        let child = value["id"].as_str().unwrap();
        let out = call(&server, "todo_read", json!({"id": child})).await;
        let value: Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(value["parent_id"], parent.as_str());
    }

    #[tokio::test]
    async fn test_create_with_missing_parent() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let out = call(
            &server,
            "todo_create",
            json!({"task": "Orphan step", "type": "subtask", "parent_id": "nope"}),
        )
        .await;
        assert!(out.is_error);
        assert!(out.text.contains("parent todo 'nope' does not exist"), "{}", out.text);
        assert!(!dir.path().join(".claude/todos/orphan-step.md").exists());

        let out = call(
            &server,
            "todo_create",
            json!({"task": "Loose feature", "parent_id": "nope"}),
        )
        .await;
        assert!(!out.is_error, "{}", out.text);
        let value: Value = serde_json::from_str(&out.text).unwrap();
        assert!(value["warning"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_template_phase_requires_parent() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let out = call(
            &server,
            "todo_template",
            json!({"template": "bug", "task": "Orphan phase", "type": "phase"}),
        )
        .await;
        assert!(out.is_error);
        assert!(out.text.contains("parent_id"), "{}", out.text);
        assert!(!dir.path().join(".claude/todos/orphan-phase.md").exists());

        let parent = create(&server, json!({"task": "Release train", "type": "multi-phase"})).await;
        let out = call(
            &server,
            "todo_template",
            json!({"template": "bug", "task": "Fix release notes", "type": "phase", "parent_id": parent}),
        )
        .await;
        assert!(!out.is_error, "{}", out.text);
        let value: Value = serde_json::from_str(&out.text).unwrap();
        let read = call(&server, "todo_read", json!({"id": value["id"]})).await;
        let read: Value = serde_json::from_str(&read.text).unwrap();
        assert_eq!(read["parent_id"], parent.as_str());
    }

    #[tokio::test]
    async fn test_create_multi_rejects_phase_parent() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let out = call(
            &server,
            "todo_create_multi",
            json!({
                "parent": {"task": "Nested plan", "type": "phase"},
                "children": [{"task": "Step one"}]
            }),
        )
        .await;
        assert!(out.is_error);
        assert!(out.text.contains("parent.type"), "{}", out.text);
        assert!(!dir.path().join(".claude/todos/nested-plan.md").exists());
        assert!(!dir.path().join(".claude/todos/step-one.md").exists());
    }

    #[tokio::test]
    async fn test_update_parent_goes_through_linker() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let alpha = create(&server, json!({"task": "Alpha"})).await;
        let beta = create(&server, json!({"task": "Beta"})).await;

        let out = call(
            &server,
            "todo_update",
            json!({"id": alpha, "metadata": {"parent_id": "does-not-exist"}}),
        )
        .await;
        assert!(out.is_error);
        assert!(out.text.contains("metadata.parent_id"), "{}", out.text);

        let out = call(&server, "todo_update", json!({"id": alpha, "metadata": {"parent_id": beta}})).await;
        assert!(!out.is_error, "{}", out.text);
        let out = call(&server, "todo_update", json!({"id": beta, "metadata": {"parent_id": alpha}})).await;
        assert!(out.is_error);
        assert!(out.text.contains("ancestor"), "{}", out.text);

        let read = call(&server, "todo_read", json!({"id": beta})).await;
        let read: Value = serde_json::from_str(&read.text).unwrap();
        assert!(read.get("parent_id").map_or(true, Value::is_null));

        let out = call(&server, "todo_update", json!({"id": alpha, "metadata": {"parent_id": ""}})).await;
        assert!(!out.is_error, "{}", out.text);
    }

    #[tokio::test]
    async fn test_prd_uses_builtin_template() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let id = create(&server, json!({"task": "Checkout redesign", "type": "prd"})).await;
        let out = call(&server, "todo_read", json!({"id": id, "format": "full"})).await;
        assert!(!out.is_error);
        assert!(!out.text.contains("\"warning\""));
    }

    #[tokio::test]
    async fn test_unknown_template_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let out = call(&server, "todo_create", json!({"task": "x", "template": "nope"})).await;
        assert!(out.is_error);
        assert_eq!(out.text, "Template not found");
    }

    #[tokio::test]
    async fn test_update_section_and_receipt() {
        let dir = TempDir::new().unwrap();
        let (server, indexers) = server(&dir).await;
        let id = create(&server, json!({"task": "Cache layer"})).await;

        let out = call(
            &server,
            "todo_update",
            json!({"id": id, "section": "findings", "operation": "append", "content": "LRU is enough"}),
        )
        .await;
        assert!(!out.is_error, "{}", out.text);
        assert!(out.text.contains("section 'findings' (append)"));

        let index = &indexers.created()[0];
        assert!(index.index_count() >= 2);
    }

    #[tokio::test]
    async fn test_update_unknown_section_is_validation() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let id = create(&server, json!({"task": "Cache layer"})).await;
        let out = call(
            &server,
            "todo_update",
            json!({"id": id, "section": "nonsense", "content": "x"}),
        )
        .await;
        assert!(out.is_error);
        assert!(out.text.starts_with("Invalid parameter: section"));
    }

    #[tokio::test]
    async fn test_update_missing_todo() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let out = call(&server, "todo_update", json!({"id": "ghost", "metadata": {"status": "blocked"}})).await;
        assert_eq!(out, ToolOutcome::error("Todo not found"));
    }

    #[tokio::test]
    async fn test_completion_without_auto_archive_keeps_todo() {
        let dir = TempDir::new().unwrap();
        let indexers = Arc::new(MockIndexerFactory::new());
        let config = ServerConfig::new(dir.path()).with_auto_archive(false);
        let factory = ManagerFactory::new(&config, indexers).await.unwrap();
        let server = TodoServer::new(factory, &config);

        let id = create(&server, json!({"task": "Ship it"})).await;
        let out = call(&server, "todo_update", json!({"id": id, "metadata": {"status": "completed"}})).await;
        assert!(out.text.contains("Status: completed"), "{}", out.text);

        let out = call(&server, "todo_read", json!({"id": id})).await;
        let value: Value = serde_json::from_str(&out.text).unwrap();
        assert!(value["completed"].is_string());
    }

    #[tokio::test]
    async fn test_search_without_index() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path());
        let factory = ManagerFactory::new(&config, Arc::new(MockIndexerFactory::new().failing()))
            .await
            .unwrap();
        let server = TodoServer::new(factory, &config);
        create(&server, json!({"task": "Still works"})).await;

        let out = call(&server, "todo_search", json!({"query": "works"})).await;
        assert_eq!(out, ToolOutcome::error("search failed: search not available"));
    }

    #[tokio::test]
    async fn test_search_finds_indexed_todo() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let id = create(&server, json!({"task": "Rate limiter"})).await;
        let out = call(&server, "todo_search", json!({"query": "rate", "limit": "5"})).await;
        let value: Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(value["count"], 1);
        assert_eq!(value["results"][0]["id"], id.as_str());
    }

    #[tokio::test]
    async fn test_archive_with_bucket_and_twice() {
        let dir = TempDir::new().unwrap();
        let (server, indexers) = server(&dir).await;
        let id = create(&server, json!({"task": "Old idea"})).await;

        let out = call(&server, "todo_archive", json!({"id": id, "quarter": "2025-Q1"})).await;
        let value: Value = serde_json::from_str(&out.text).unwrap();
        assert!(value["archive_path"]
            .as_str()
            .unwrap()
            .ends_with(&format!("archive/2025-Q1/{id}.md")));
        assert!(!indexers.created()[0].contains(&id));

        let again = call(&server, "todo_archive", json!({"id": id})).await;
        assert_eq!(again, ToolOutcome::error("Todo not found"));
    }

    #[tokio::test]
    async fn test_link_rejects_cycles() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let a = create(&server, json!({"task": "Alpha"})).await;
        let b = create(&server, json!({"task": "Beta"})).await;

        let out = call(&server, "todo_link", json!({"parent_id": a, "child_id": b})).await;
        assert!(!out.is_error, "{}", out.text);
        let out = call(&server, "todo_link", json!({"parent_id": b, "child_id": a})).await;
        assert!(out.is_error);
        assert!(out.text.contains("parent_id"));
    }

    #[tokio::test]
    async fn test_stats_and_clean() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        create(&server, json!({"task": "Fix login"})).await;
        create(&server, json!({"task": "Fix  login!"})).await;

        let out = call(&server, "todo_stats", json!({"period": "week"})).await;
        let value: Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(value["total"], 2);

        let out = call(&server, "todo_clean", json!({"operation": "find_duplicates"})).await;
        assert!(out.text.contains("fix-login, fix-login-2"), "{}", out.text);

        let out = call(&server, "todo_clean", json!({})).await;
        assert!(out.text.starts_with("Archived 0 completed"));
    }

    #[tokio::test]
    async fn test_template_list_and_create() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let out = call(&server, "todo_template", json!({})).await;
        let value: Value = serde_json::from_str(&out.text).unwrap();
        let names: Vec<&str> = value["templates"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert!(names.contains(&"bug"));

        let out = call(
            &server,
            "todo_template",
            json!({"template": "bug", "task": "Crash on save", "type": "bug"}),
        )
        .await;
        assert!(!out.is_error, "{}", out.text);
    }

    #[tokio::test]
    async fn test_add_and_reorder_sections() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let id = create(&server, json!({"task": "Sections"})).await;

        let out = call(
            &server,
            "todo_add_section",
            json!({"id": id, "key": "risks", "title": "Risks", "schema": "checklist"}),
        )
        .await;
        assert!(!out.is_error, "{}", out.text);
        let dup = call(&server, "todo_add_section", json!({"id": id, "key": "risks", "title": "Risks"})).await;
        assert!(dup.text.starts_with("Resource conflict"));

        let out = call(&server, "todo_reorder_sections", json!({"id": id, "order": {"risks": 0}})).await;
        assert!(out.text.contains("Order: risks, findings"), "{}", out.text);

        let out = call(&server, "todo_reorder_sections", json!({"id": id, "order": {"ghost": 1}})).await;
        assert!(out.text.contains("order.ghost"));

        let out = call(&server, "todo_sections", json!({"id": id})).await;
        let value: Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(value["sections"][0]["key"], "risks");
        assert_eq!(value["sections"][0]["order"], 0);
        assert_eq!(value["sections"][0]["hasContent"], false);
    }

    #[tokio::test]
    async fn test_add_section_title_collision_keeps_content() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let id = create(&server, json!({"task": "Gamma"})).await;
        call(
            &server,
            "todo_update",
            json!({"id": id, "section": "checklist", "operation": "replace", "content": "- [ ] keep me"}),
        )
        .await;

        for title in ["Checklist", "checklist", "Working Scratchpad"] {
            let out = call(
                &server,
                "todo_add_section",
                json!({"id": id, "key": "extra", "title": title}),
            )
            .await;
            assert!(out.is_error);
            assert!(out.text.starts_with("Resource conflict"), "{}", out.text);
        }

        let out = call(&server, "todo_read", json!({"id": id, "format": "full"})).await;
        let value: Value = serde_json::from_str(&out.text).unwrap();
        let sections = value["sections"].as_array().unwrap();
        assert!(sections.iter().all(|s| s["key"] != "extra"));
        let checklist = sections.iter().find(|s| s["key"] == "checklist").unwrap();
        assert_eq!(checklist["content"], "- [ ] keep me");
    }

    #[tokio::test]
    async fn test_toggle_receipt_names_substring_match() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let id = create(&server, json!({"task": "Deploy"})).await;
        call(
            &server,
            "todo_update",
            json!({"id": id, "section": "checklist", "operation": "replace", "content": "- [ ] Deploy to Staging"}),
        )
        .await;

        let out = call(
            &server,
            "todo_update",
            json!({"id": id, "section": "checklist", "operation": "toggle", "content": "staging"}),
        )
        .await;
        assert!(!out.is_error, "{}", out.text);
        assert!(
            out.text.contains("Item 'Deploy to Staging' is now in_progress"),
            "{}",
            out.text
        );
    }

    #[tokio::test]
    async fn test_multiline_task_rejected() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let out = call(&server, "todo_create", json!({"task": "Line one\nLine two"})).await;
        assert!(out.is_error);
        assert!(out.text.starts_with("Invalid parameter: task"), "{}", out.text);
        assert!(!dir.path().join(".claude/todos/line-one-line-two.md").exists());
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments() {
        let dir = TempDir::new().unwrap();
        let (server, _) = server(&dir).await;
        let out = call(&server, "todo_delete", json!({})).await;
        assert!(out.is_error);
        assert!(out.text.contains("unknown tool"));

        let out = call(&server, "todo_read", json!("not an object")).await;
        assert!(out.text.contains("arguments"));
    }

    #[test]
    fn test_similarity_threshold() {
        let other = |id: &str, task: &str| Todo {
            id: id.into(),
            task: task.into(),
            started: chrono::Local::now(),
            completed: None,
            status: TodoStatus::InProgress,
            priority: crate::todo::Priority::High,
            todo_type: TodoType::Feature,
            parent_id: None,
            current_test: None,
            tags: vec![],
            sections: Default::default(),
        };
        let others = vec![
            other("a", "Add user login page"),
            other("b", "Refactor storage"),
            other("self", "Add login page"),
        ];
        let found = similar_todos("self", "Add login page", &others);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
        assert!((found[0].similarity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_creation_hint() {
        let mut todo = Todo {
            id: "x".into(),
            task: "Migrate in three phases".into(),
            started: chrono::Local::now(),
            completed: None,
            status: TodoStatus::InProgress,
            priority: crate::todo::Priority::High,
            todo_type: TodoType::Feature,
            parent_id: None,
            current_test: None,
            tags: vec![],
            sections: Default::default(),
        };
        assert!(creation_hint(&todo).is_some_and(|h| h.contains("todo_create_multi")));
        todo.task = "Fix typo".into();
        assert!(creation_hint(&todo).is_none());
    }
}
