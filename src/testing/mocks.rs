//! Mock search backends.
//!
//! These mocks provide controllable test doubles for the index, enabling
//! deterministic tests of the manager factory and dispatcher.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, TodoError};
use crate::index::{IndexerFactory, SearchFilters, SearchResult, TodoIndexer};
use crate::paths::WorkingPaths;
use crate::todo::Todo;

/// In-memory index that counts calls.
///
/// # Example
///
/// ```rust,ignore
/// let index = MockIndexer::new();
/// index.index_todo(&todo, "body").await?;
/// assert_eq!(index.indexed_count().await, 1);
/// ```
#[derive(Debug, Default)]
pub struct MockIndexer {
    docs: Mutex<BTreeMap<String, (String, String)>>,
    fail_writes: AtomicBool,
    index_calls: AtomicU32,
    delete_calls: AtomicU32,
    close_calls: AtomicU32,
}

impl MockIndexer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every index/delete call fail.
    #[must_use]
    pub fn with_failing_writes(self) -> Self {
        self.fail_writes.store(true, Ordering::Relaxed);
        self
    }

    #[must_use]
    pub fn index_count(&self) -> u32 {
        self.index_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn delete_count(&self) -> u32 {
        self.delete_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn close_count(&self) -> u32 {
        self.close_calls.load(Ordering::Relaxed)
    }

    /// Whether `id` is currently indexed.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.docs.lock().map(|d| d.contains_key(id)).unwrap_or(false)
    }

    fn write_guard(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(TodoError::operation("index", "mock write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl TodoIndexer for MockIndexer {
    async fn index_todo(&self, todo: &Todo, body: &str) -> Result<()> {
        self.index_calls.fetch_add(1, Ordering::Relaxed);
        self.write_guard()?;
        self.docs
            .lock()
            .map_err(|_| TodoError::internal("mock index lock poisoned"))?
            .insert(todo.id.clone(), (todo.task.clone(), body.to_lowercase()));
        Ok(())
    }

    async fn delete_todo(&self, id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        self.write_guard()?;
        self.docs
            .lock()
            .map_err(|_| TodoError::internal("mock index lock poisoned"))?
            .remove(id);
        Ok(())
    }

    async fn search_todos(
        &self,
        query: &str,
        _filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let needle = query.to_lowercase();
        let docs = self
            .docs
            .lock()
            .map_err(|_| TodoError::internal("mock index lock poisoned"))?;
        Ok(docs
            .iter()
            .filter(|(_, (task, body))| task.to_lowercase().contains(&needle) || body.contains(&needle))
            .take(limit)
            .map(|(id, (task, _))| SearchResult {
                id: id.clone(),
                score: 1.0,
                snippet: task.clone(),
                task: task.clone(),
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn indexed_count(&self) -> u64 {
        self.docs.lock().map(|d| d.len() as u64).unwrap_or(0)
    }
}

/// Factory producing [`MockIndexer`]s, optionally slow or failing.
///
/// Every successfully opened index is retained so tests can inspect it.
#[derive(Debug, Default)]
pub struct MockIndexerFactory {
    delay: Mutex<Option<Duration>>,
    failing: AtomicBool,
    opens: AtomicU32,
    created: Mutex<Vec<Arc<MockIndexer>>>,
}

impl MockIndexerFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every open by `delay` (tokio time, so paused clocks apply).
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(Some(delay));
        self
    }

    /// Make every open fail.
    #[must_use]
    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::Relaxed);
        self
    }

    /// Change the delay for subsequent opens.
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.delay.lock() {
            *slot = delay;
        }
    }

    /// Number of `open` calls, including failed ones.
    #[must_use]
    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Indexes opened so far, in creation order.
    #[must_use]
    pub fn created(&self) -> Vec<Arc<MockIndexer>> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl IndexerFactory for MockIndexerFactory {
    async fn open(&self, _paths: &WorkingPaths) -> Result<Arc<dyn TodoIndexer>> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(TodoError::operation("open index", "mock open failure"));
        }

        let index = Arc::new(MockIndexer::new());
        if let Ok(mut created) = self.created.lock() {
            created.push(Arc::clone(&index));
        }
        Ok(index)
    }
}
