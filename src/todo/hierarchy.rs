//! Parent/child trees reconstructed from `parent_id` back-references.
//!
//! The whole active set is scanned into an id index; roots have no parent,
//! orphans point at a parent that is not in the set. Siblings are ordered by
//! start time, then id.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::error::{Result, TodoError};

use super::store::{MetadataUpdate, TodoStore};
use super::Todo;

/// A todo with its children.
#[derive(Debug, Clone, Serialize)]
pub struct HierarchyNode {
    pub todo: Todo,
    pub children: Vec<HierarchyNode>,
}

impl HierarchyNode {
    /// Number of nodes in this subtree, including itself.
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(HierarchyNode::size).sum::<usize>()
    }
}

/// Forest built from a set of todos.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Hierarchy {
    pub roots: Vec<HierarchyNode>,
    /// Todos whose parent is missing from the set (or that sit on a cycle).
    pub orphans: Vec<HierarchyNode>,
}

impl Hierarchy {
    /// Whether any parent relationship exists at all.
    #[must_use]
    pub fn has_relationships(&self) -> bool {
        !self.orphans.is_empty() || self.roots.iter().any(|r| !r.children.is_empty())
    }
}

/// Build the forest for `todos`.
#[must_use]
pub fn build_hierarchy(todos: &[Todo]) -> Hierarchy {
    let ids: HashSet<&str> = todos.iter().map(|t| t.id.as_str()).collect();
    let mut children: HashMap<&str, Vec<&Todo>> = HashMap::new();
    let mut roots: Vec<&Todo> = Vec::new();
    let mut orphans: Vec<&Todo> = Vec::new();

    for todo in todos {
        match todo.parent() {
            None => roots.push(todo),
            Some(parent) if ids.contains(parent) && parent != todo.id => {
                children.entry(parent).or_default().push(todo);
            }
            Some(_) => orphans.push(todo),
        }
    }

    sort_siblings(&mut roots);
    sort_siblings(&mut orphans);
    for siblings in children.values_mut() {
        sort_siblings(siblings);
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut hierarchy = Hierarchy {
        roots: roots
            .into_iter()
            .map(|t| build_node(t, &children, &mut visited))
            .collect(),
        orphans: orphans
            .into_iter()
            .map(|t| build_node(t, &children, &mut visited))
            .collect(),
    };

    // Anything left unvisited hangs off a parent cycle.
    let mut on_cycle: Vec<&Todo> = todos
        .iter()
        .filter(|t| !visited.contains(t.id.as_str()))
        .collect();
    sort_siblings(&mut on_cycle);
    for todo in on_cycle {
        if !visited.contains(todo.id.as_str()) {
            let node = build_node(todo, &children, &mut visited);
            hierarchy.orphans.push(node);
        }
    }
    hierarchy
}

fn build_node<'a>(
    todo: &'a Todo,
    children: &HashMap<&str, Vec<&'a Todo>>,
    visited: &mut HashSet<&'a str>,
) -> HierarchyNode {
    visited.insert(todo.id.as_str());
    let mut nodes = Vec::new();
    if let Some(kids) = children.get(todo.id.as_str()) {
        for &child in kids {
            if !visited.contains(child.id.as_str()) {
                nodes.push(build_node(child, children, visited));
            }
        }
    }
    HierarchyNode {
        todo: todo.clone(),
        children: nodes,
    }
}

fn sort_siblings(todos: &mut [&Todo]) {
    todos.sort_by(|a, b| a.started.cmp(&b.started).then_with(|| a.id.cmp(&b.id)));
}

// ============================================================================
// Linking
// ============================================================================

/// Relationship created by [`TodoLinker::link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkKind {
    #[default]
    ParentChild,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentChild => write!(f, "parent-child"),
        }
    }
}

impl FromStr for LinkKind {
    type Err = TodoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "parent-child" => Ok(Self::ParentChild),
            other => Err(TodoError::validation(
                "link_type",
                format!("'{other}' is not supported (only parent-child)"),
            )),
        }
    }
}

/// Links todos through the store.
#[derive(Debug, Clone, Copy)]
pub struct TodoLinker<'a> {
    store: &'a TodoStore,
}

impl<'a> TodoLinker<'a> {
    #[must_use]
    pub fn new(store: &'a TodoStore) -> Self {
        Self { store }
    }

    /// Set `child_id`'s parent to `parent_id`.
    ///
    /// # Errors
    ///
    /// - validation on self-links and links that would create a cycle
    /// - not-found when either todo is missing
    /// - operation when the child cannot be rewritten
    pub fn link(&self, parent_id: &str, child_id: &str, kind: LinkKind) -> Result<Todo> {
        self.check(parent_id, child_id)?;

        let child = self
            .store
            .update(child_id, None, &MetadataUpdate::parent(parent_id))
            .map_err(|e| match e {
                TodoError::NotFound { .. } | TodoError::Validation { .. } => e,
                other => TodoError::operation("link", other.to_string()),
            })?;
        info!(parent = parent_id, child = child_id, kind = %kind, "Linked todos");
        Ok(child)
    }

    /// Verify that `child_id` may take `parent_id` as its parent without
    /// writing anything.
    ///
    /// # Errors
    ///
    /// Same validation and not-found errors as [`TodoLinker::link`].
    pub fn check(&self, parent_id: &str, child_id: &str) -> Result<()> {
        if parent_id == child_id {
            return Err(TodoError::validation(
                "child_id",
                "a todo cannot be linked to itself",
            ));
        }
        let parent = self.store.read(parent_id)?;
        self.store.read(child_id)?;

        if self.is_ancestor(child_id, &parent)? {
            return Err(TodoError::validation(
                "parent_id",
                format!("linking would make '{child_id}' its own ancestor"),
            ));
        }
        Ok(())
    }

    /// Clear a todo's parent.
    ///
    /// # Errors
    ///
    /// Returns not-found when the todo is missing.
    pub fn unlink(&self, child_id: &str) -> Result<Todo> {
        self.store
            .update(child_id, None, &MetadataUpdate::parent(""))
    }

    /// Walk up from `start` looking for `candidate`.
    fn is_ancestor(&self, candidate: &str, start: &Todo) -> Result<bool> {
        let mut seen = HashSet::new();
        let mut current = start.parent().map(str::to_string);
        while let Some(id) = current {
            if id == candidate {
                return Ok(true);
            }
            if !seen.insert(id.clone()) {
                return Ok(false);
            }
            current = match self.store.read(&id) {
                Ok(todo) => todo.parent().map(str::to_string),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::WorkingPaths;
    use crate::todo::types::{Priority, TodoType};
    use chrono::{Duration, Local};
    use tempfile::TempDir;

    fn todo(id: &str, parent: Option<&str>, offset_secs: i64) -> Todo {
        Todo {
            id: id.into(),
            task: id.into(),
            started: Local::now() + Duration::seconds(offset_secs),
            completed: None,
            status: Default::default(),
            priority: Priority::High,
            todo_type: TodoType::Feature,
            parent_id: parent.map(str::to_string),
            current_test: None,
            tags: vec![],
            sections: Default::default(),
        }
    }

    #[test]
    fn test_roots_children_and_orphans() {
        let todos = vec![
            todo("root", None, 0),
            todo("b", Some("root"), 2),
            todo("a", Some("root"), 1),
            todo("lost", Some("missing"), 0),
        ];
        let h = build_hierarchy(&todos);
        assert_eq!(h.roots.len(), 1);
        let kids: Vec<_> = h.roots[0].children.iter().map(|n| n.todo.id.as_str()).collect();
        assert_eq!(kids, vec!["a", "b"]);
        assert_eq!(h.orphans.len(), 1);
        assert_eq!(h.orphans[0].todo.id, "lost");
        assert!(h.has_relationships());
    }

    #[test]
    fn test_siblings_tie_break_by_id() {
        let mut todos = vec![
            todo("root", None, 0),
            todo("z", Some("root"), 5),
            todo("y", Some("root"), 5),
        ];
        let started = todos[1].started;
        todos[2].started = started;
        let h = build_hierarchy(&todos);
        assert_eq!(h.roots[0].children[0].todo.id, "y");
    }

    #[test]
    fn test_cycles_surface_as_orphans() {
        let todos = vec![todo("a", Some("b"), 0), todo("b", Some("a"), 1)];
        let h = build_hierarchy(&todos);
        assert!(h.roots.is_empty());
        let total: usize = h.orphans.iter().map(HierarchyNode::size).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_flat_set_has_no_relationships() {
        let h = build_hierarchy(&[todo("a", None, 0), todo("b", None, 1)]);
        assert!(!h.has_relationships());
    }

    #[test]
    fn test_link_sets_parent() {
        let temp = TempDir::new().unwrap();
        let store = TodoStore::new(WorkingPaths::from_root(temp.path()));
        store.create("Parent", Priority::High, TodoType::MultiPhase).unwrap();
        store.create("Child", Priority::High, TodoType::Phase).unwrap();

        let linker = TodoLinker::new(&store);
        let child = linker.link("parent", "child", LinkKind::ParentChild).unwrap();
        assert_eq!(child.parent(), Some("parent"));
        assert_eq!(store.read("child").unwrap().parent(), Some("parent"));

        linker.unlink("child").unwrap();
        assert_eq!(store.read("child").unwrap().parent(), None);
    }

    #[test]
    fn test_link_errors() {
        let temp = TempDir::new().unwrap();
        let store = TodoStore::new(WorkingPaths::from_root(temp.path()));
        store.create("A", Priority::High, TodoType::Feature).unwrap();
        store.create("B", Priority::High, TodoType::Feature).unwrap();
        let linker = TodoLinker::new(&store);

        assert_eq!(
            linker.link("a", "a", LinkKind::ParentChild).unwrap_err().kind(),
            crate::error::ErrorKind::Validation
        );
        assert!(linker.link("a", "missing", LinkKind::ParentChild).unwrap_err().is_not_found());
        assert!(linker.link("missing", "a", LinkKind::ParentChild).unwrap_err().is_not_found());

        linker.link("a", "b", LinkKind::ParentChild).unwrap();
        let err = linker.link("b", "a", LinkKind::ParentChild).unwrap_err();
        assert!(err.client_message().contains("ancestor"));
    }

    #[test]
    fn test_link_kind_parsing() {
        assert_eq!("parent-child".parse::<LinkKind>().unwrap(), LinkKind::ParentChild);
        assert!("blocks".parse::<LinkKind>().is_err());
    }
}
