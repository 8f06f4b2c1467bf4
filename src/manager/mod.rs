//! Working-directory scoped managers.
//!
//! A [`ManagerSet`] bundles everything that serves one working directory:
//! the todo store, the (optional) search index, stats and templates. The
//! [`ManagerFactory`] caches sets per directory.

pub mod context;
pub mod factory;

pub use context::{RequestContext, DEFAULT_REQUEST_TIMEOUT};
pub use factory::ManagerFactory;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::index::TodoIndexer;
use crate::paths::WorkingPaths;
use crate::stats::StatsEngine;
use crate::templates::TemplateManager;
use crate::todo::{Todo, TodoLinker, TodoStore};

/// Managers rooted at one working directory.
pub struct ManagerSet {
    pub paths: WorkingPaths,
    pub store: TodoStore,
    /// `None` when the index could not be opened in time; search is then
    /// unavailable but every lifecycle operation still works.
    pub indexer: Option<Arc<dyn TodoIndexer>>,
    pub stats: StatsEngine,
    pub templates: TemplateManager,
}

impl fmt::Debug for ManagerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerSet")
            .field("paths", &self.paths)
            .field("has_indexer", &self.indexer.is_some())
            .finish_non_exhaustive()
    }
}

impl ManagerSet {
    /// Assemble a set. `template_dir` overrides the working directory's
    /// templates folder.
    #[must_use]
    pub fn new(
        paths: WorkingPaths,
        indexer: Option<Arc<dyn TodoIndexer>>,
        template_dir: Option<&Path>,
    ) -> Self {
        let store = TodoStore::new(paths.clone());
        let templates = TemplateManager::new(template_dir.unwrap_or(&paths.templates_dir));
        Self {
            stats: StatsEngine::new(store.clone()),
            store,
            indexer,
            templates,
            paths,
        }
    }

    #[must_use]
    pub fn has_search(&self) -> bool {
        self.indexer.is_some()
    }

    #[must_use]
    pub fn linker(&self) -> TodoLinker<'_> {
        TodoLinker::new(&self.store)
    }

    /// Index a todo; failures are logged and swallowed.
    pub async fn index(&self, todo: &Todo, body: &str) {
        if let Some(indexer) = &self.indexer {
            if let Err(e) = indexer.index_todo(todo, body).await {
                warn!(id = %todo.id, "Failed to index todo: {}", e);
            }
        }
    }

    /// Remove a todo from the index; failures are logged and swallowed.
    pub async fn unindex(&self, id: &str) {
        if let Some(indexer) = &self.indexer {
            if let Err(e) = indexer.delete_todo(id).await {
                warn!(id, "Failed to remove todo from index: {}", e);
            }
        }
    }

    /// Close the index if present.
    pub(crate) async fn close(&self) {
        if let Some(indexer) = &self.indexer {
            if let Err(e) = indexer.close().await {
                warn!(dir = %self.paths.working_dir.display(), "Failed to close index: {}", e);
            }
        }
    }
}
