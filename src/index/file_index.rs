//! JSON-persisted inverted index.

use async_trait::async_trait;
use chrono::NaiveDate;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::error::{Result, TodoError};
use crate::paths::WorkingPaths;
use crate::todo::store::write_atomic;
use crate::todo::{Todo, TodoStatus};

use super::{IndexerFactory, SearchFilters, SearchResult, TodoIndexer};

/// File name of the persisted index.
const INDEX_FILE: &str = "todos.json";

/// Lock file suffix for concurrent writer prevention.
const LOCK_SUFFIX: &str = ".lock";

/// Bumped whenever [`IndexedDoc`] changes shape; older files are rebuilt.
const INDEX_VERSION: u32 = 1;

/// Characters of context on each side of a snippet match.
const SNIPPET_CONTEXT: usize = 60;

/// Extra weight for query terms found in the task title.
const TITLE_WEIGHT: f64 = 3.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedDoc {
    task: String,
    status: TodoStatus,
    started: NaiveDate,
    text: String,
    content_hash: String,
    terms: HashMap<String, u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexSnapshot {
    version: u32,
    docs: BTreeMap<String, IndexedDoc>,
}

/// File-backed [`TodoIndexer`].
#[derive(Debug)]
pub struct FileIndex {
    path: PathBuf,
    docs: RwLock<HashMap<String, IndexedDoc>>,
    persist_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl FileIndex {
    /// Load the index stored in `dir`, starting empty when the file is
    /// missing, corrupted or from an incompatible version.
    ///
    /// # Errors
    ///
    /// Fails only when the directory cannot be created.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(INDEX_FILE);

        let docs = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<IndexSnapshot>(&raw) {
                Ok(snapshot) if snapshot.version == INDEX_VERSION => {
                    snapshot.docs.into_iter().collect()
                }
                Ok(snapshot) => {
                    warn!(
                        "Incompatible index version {} (supported: {}). Rebuilding.",
                        snapshot.version, INDEX_VERSION
                    );
                    HashMap::new()
                }
                Err(e) => {
                    warn!("Corrupted index at {}: {}. Starting fresh.", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), docs = docs.len(), "Opened file index");
        Ok(Self {
            path,
            docs: RwLock::new(docs),
            persist_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Location of the persisted index.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_docs(&self) -> Result<RwLockReadGuard<'_, HashMap<String, IndexedDoc>>> {
        self.docs
            .read()
            .map_err(|e| TodoError::internal(format!("Index lock poisoned: {e}")))
    }

    fn write_docs(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, IndexedDoc>>> {
        self.docs
            .write()
            .map_err(|e| TodoError::internal(format!("Index lock poisoned: {e}")))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TodoError::operation("index", "index is closed"));
        }
        Ok(())
    }

    /// Write the current state to disk. Snapshots are taken while holding
    /// the persist lock so a later write never carries older data.
    async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let json = {
            let docs = self.read_docs()?;
            let snapshot = IndexSnapshot {
                version: INDEX_VERSION,
                docs: docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            };
            serde_json::to_string(&snapshot)?
        };
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_locked(&path, &json))
            .await
            .map_err(|e| TodoError::internal(format!("index persist task failed: {e}")))?
    }
}

fn write_locked(path: &Path, json: &str) -> Result<()> {
    let lock_path = path.with_extension(format!("json{LOCK_SUFFIX}"));
    let lock_file = File::create(&lock_path)?;
    FileExt::lock_exclusive(&lock_file)
        .map_err(|e| TodoError::operation("index", format!("failed to acquire index lock: {e}")))?;
    let result = write_atomic(path, json);
    if let Err(e) = FileExt::unlock(&lock_file) {
        warn!(path = %lock_path.display(), "Failed to release index lock: {}", e);
    }
    result
}

#[async_trait]
impl TodoIndexer for FileIndex {
    async fn index_todo(&self, todo: &Todo, body: &str) -> Result<()> {
        self.ensure_open()?;
        let text = format!("{}\n{}", todo.task, body);
        let hash = content_hash(&text, todo.status);
        {
            let mut docs = self.write_docs()?;
            if docs.get(&todo.id).is_some_and(|d| d.content_hash == hash) {
                return Ok(());
            }
            docs.insert(
                todo.id.clone(),
                IndexedDoc {
                    task: todo.task.clone(),
                    status: todo.status,
                    started: todo.started.date_naive(),
                    terms: term_counts(&text),
                    text,
                    content_hash: hash,
                },
            );
        }
        self.persist().await
    }

    async fn delete_todo(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let removed = self.write_docs()?.remove(id).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(())
    }

    async fn search_todos(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_open()?;
        let terms = tokenize(query);
        if terms.is_empty() {
            return Err(TodoError::validation(
                "query",
                "must contain at least one searchable word",
            ));
        }

        let docs = self.read_docs()?;
        let mut results: Vec<SearchResult> = docs
            .iter()
            .filter(|(_, doc)| matches_filters(doc, filters))
            .filter_map(|(id, doc)| {
                let score = score(doc, &terms);
                (score > 0.0).then(|| SearchResult {
                    id: id.clone(),
                    score,
                    snippet: snippet(&doc.text, &terms),
                    task: doc.task.clone(),
                })
            })
            .collect();
        drop(docs);

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.persist().await?;
        info!(path = %self.path.display(), "Closed file index");
        Ok(())
    }

    async fn indexed_count(&self) -> u64 {
        self.read_docs().map(|d| d.len() as u64).unwrap_or(0)
    }
}

/// Opens a [`FileIndex`] in the working directory's index folder.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileIndexFactory;

#[async_trait]
impl IndexerFactory for FileIndexFactory {
    async fn open(&self, paths: &WorkingPaths) -> Result<Arc<dyn TodoIndexer>> {
        let dir = paths.index_dir.clone();
        let index = tokio::task::spawn_blocking(move || FileIndex::open(&dir))
            .await
            .map_err(|e| TodoError::internal(format!("index open task failed: {e}")))??;
        Ok(Arc::new(index))
    }
}

// ============================================================================
// Text Processing
// ============================================================================

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

fn term_counts(text: &str) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for term in tokenize(text) {
        *counts.entry(term).or_insert(0) += 1;
    }
    counts
}

fn content_hash(text: &str, status: TodoStatus) -> String {
    let mut hasher = Sha256::new();
    hasher.update(status.as_str().as_bytes());
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn matches_filters(doc: &IndexedDoc, filters: &SearchFilters) -> bool {
    if filters.status.is_some_and(|s| s != doc.status) {
        return false;
    }
    if filters.date_from.is_some_and(|from| doc.started < from) {
        return false;
    }
    if filters.date_to.is_some_and(|to| doc.started > to) {
        return false;
    }
    true
}

fn score(doc: &IndexedDoc, terms: &[String]) -> f64 {
    let title_terms = tokenize(&doc.task);
    terms
        .iter()
        .map(|term| {
            let exact = f64::from(doc.terms.get(term).copied().unwrap_or(0));
            let prefix: f64 = doc
                .terms
                .iter()
                .filter(|(t, _)| *t != term && t.starts_with(term.as_str()))
                .map(|(_, n)| f64::from(*n) * 0.5)
                .sum();
            let title = if title_terms.iter().any(|t| t.starts_with(term.as_str())) {
                TITLE_WEIGHT
            } else {
                0.0
            };
            exact + prefix + title
        })
        .sum()
}

fn snippet(text: &str, terms: &[String]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let lowered: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();

    let pos = terms
        .iter()
        .filter_map(|term| {
            let needle: Vec<char> = term.chars().collect();
            lowered.windows(needle.len()).position(|w| w == needle.as_slice())
        })
        .min()
        .unwrap_or(0);

    let start = pos.saturating_sub(SNIPPET_CONTEXT);
    let end = (pos + SNIPPET_CONTEXT * 2).min(chars.len());
    let window: String = chars[start..end].iter().collect();
    let mut out = window.split_whitespace().collect::<Vec<_>>().join(" ");
    if start > 0 {
        out.insert_str(0, "...");
    }
    if end < chars.len() {
        out.push_str("...");
    }
    out
}
