//! Full-text indexing of todos.
//!
//! The rest of the server only sees the [`TodoIndexer`] trait and treats it
//! as best-effort: failures are logged by callers and never fail a lifecycle
//! operation. A manager set without an indexer simply has search disabled.
//!
//! [`FileIndex`] is the default backend: an in-memory inverted index
//! persisted as JSON under `<W>/.claude/index/`.

pub mod file_index;

pub use file_index::{FileIndex, FileIndexFactory};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::paths::WorkingPaths;
use crate::todo::{Todo, TodoStatus};

/// Filters accepted by [`TodoIndexer::search_todos`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub status: Option<TodoStatus>,
    /// Inclusive lower bound on the start date.
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on the start date.
    pub date_to: Option<NaiveDate>,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f64,
    pub snippet: String,
    pub task: String,
}

/// Search backend for one working directory.
///
/// Implementations must tolerate concurrent calls.
#[async_trait]
pub trait TodoIndexer: Send + Sync {
    /// Add or refresh a todo.
    async fn index_todo(&self, todo: &Todo, body: &str) -> Result<()>;

    /// Remove a todo; unknown ids are not an error.
    async fn delete_todo(&self, id: &str) -> Result<()>;

    /// Ranked search, best first, at most `limit` results.
    async fn search_todos(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Flush and release resources.
    async fn close(&self) -> Result<()>;

    /// Number of documents currently indexed.
    async fn indexed_count(&self) -> u64;
}

/// Opens an indexer for a working directory.
///
/// The manager factory bounds the time it waits on [`open`](Self::open);
/// a slow backend degrades the manager set to "no search" instead of
/// blocking lifecycle operations.
#[async_trait]
pub trait IndexerFactory: Send + Sync {
    async fn open(&self, paths: &WorkingPaths) -> Result<Arc<dyn TodoIndexer>>;
}
