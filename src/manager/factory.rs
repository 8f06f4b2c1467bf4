//! Concurrent cache of manager sets keyed by working directory.
//!
//! # Lookup protocol
//!
//! 1. No working directory on the request: the base set is returned.
//! 2. Read lock; on hit the entry's access time is refreshed.
//! 3. Write lock; re-check, since another caller may have created the set
//!    between the two locks.
//! 4. Circuit breaker: after `max_attempts` consecutive failures for a
//!    directory, creation is skipped and the base set returned until
//!    `backoff` has elapsed since the last failure.
//! 5. Directories are created, the index is opened under a time budget and
//!    the new set is cached.
//!
//! A sweeper task evicts sets idle for longer than the idle threshold. Index
//! handles are closed by whichever path removes their set from the cache
//! (eviction or [`ManagerFactory::shutdown`]), so each is closed once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{FactoryConfig, ServerConfig};
use crate::error::{Result, TodoError};
use crate::index::{IndexerFactory, TodoIndexer};
use crate::paths::WorkingPaths;

use super::{ManagerSet, RequestContext};

// ============================================================================
// State
// ============================================================================

struct CachedSet {
    set: Arc<ManagerSet>,
    /// Milliseconds since the factory epoch.
    last_accessed: AtomicU64,
}

impl CachedSet {
    fn touch(&self, now_ms: u64) {
        self.last_accessed.store(now_ms, Ordering::Relaxed);
    }

    fn idle_for(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.last_accessed.load(Ordering::Relaxed)))
    }
}

#[derive(Debug, Clone, Copy)]
struct BreakerState {
    attempts: u32,
    last_failure: Instant,
}

#[derive(Default)]
struct FactoryState {
    sets: HashMap<PathBuf, CachedSet>,
    breakers: HashMap<PathBuf, BreakerState>,
}

struct SweeperHandle {
    stop: oneshot::Sender<()>,
    done: oneshot::Receiver<()>,
}

struct FactoryInner {
    config: FactoryConfig,
    template_dir: Option<PathBuf>,
    indexers: Arc<dyn IndexerFactory>,
    base: Arc<ManagerSet>,
    state: RwLock<FactoryState>,
    epoch: Instant,
    creations: AtomicU64,
    creation_attempts: AtomicU64,
    sweeper: Mutex<Option<SweeperHandle>>,
    shut_down: AtomicBool,
}

// ============================================================================
// Factory
// ============================================================================

/// Hands out [`ManagerSet`]s per working directory.
///
/// Cloning is cheap; clones share the same cache.
#[derive(Clone)]
pub struct ManagerFactory {
    inner: Arc<FactoryInner>,
}

impl std::fmt::Debug for ManagerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerFactory")
            .field("base", &self.inner.base.paths.working_dir)
            .field("creations", &self.creation_count())
            .finish_non_exhaustive()
    }
}

impl ManagerFactory {
    /// Build the factory and its base managers for
    /// `config.default_working_dir`.
    ///
    /// # Errors
    ///
    /// Fails when the base directories cannot be created.
    pub async fn new(config: &ServerConfig, indexers: Arc<dyn IndexerFactory>) -> Result<Self> {
        let paths = WorkingPaths::resolve("", &config.default_working_dir)?;
        create_dirs(&paths).await?;
        let budget = config.factory.indexer_timeout();
        let indexer = open_indexer(&indexers, &paths, budget).await;
        let base = ManagerSet::new(paths, indexer, config.template_dir.as_deref());
        info!(dir = %base.paths.working_dir.display(), search = base.has_search(), "Base managers ready");

        Ok(Self {
            inner: Arc::new(FactoryInner {
                config: config.factory.clone(),
                template_dir: config.template_dir.clone(),
                indexers,
                base: Arc::new(base),
                state: RwLock::new(FactoryState::default()),
                epoch: Instant::now(),
                creations: AtomicU64::new(0),
                creation_attempts: AtomicU64::new(0),
                sweeper: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Managers used when a request names no working directory.
    #[must_use]
    pub fn base(&self) -> Arc<ManagerSet> {
        Arc::clone(&self.inner.base)
    }

    /// Resolve the manager set for a request.
    ///
    /// # Errors
    ///
    /// - validation when the working directory is not a usable path
    /// - operation when its directories cannot be created
    /// - operation after [`shutdown`](Self::shutdown)
    pub async fn get_managers(&self, ctx: &RequestContext) -> Result<Arc<ManagerSet>> {
        let inner = &self.inner;
        if inner.shut_down.load(Ordering::Acquire) {
            return Err(TodoError::operation("get managers", "server is shutting down"));
        }
        let Some(raw) = ctx.working_directory() else {
            return Ok(self.base());
        };
        let paths = WorkingPaths::resolve(raw, &inner.base.paths.working_dir)?;
        if paths.working_dir == inner.base.paths.working_dir {
            return Ok(self.base());
        }
        let key = paths.working_dir.clone();

        {
            let state = inner.state.read().await;
            if let Some(cached) = state.sets.get(&key) {
                cached.touch(inner.now_ms());
                debug!(dir = %key.display(), "Manager cache hit");
                return Ok(Arc::clone(&cached.set));
            }
        }

        let mut state = inner.state.write().await;
        if let Some(cached) = state.sets.get(&key) {
            cached.touch(inner.now_ms());
            debug!(dir = %key.display(), "Manager cache hit after write lock");
            return Ok(Arc::clone(&cached.set));
        }

        if let Some(breaker) = state.breakers.get(&key).copied() {
            if breaker.attempts >= inner.config.max_attempts {
                if breaker.last_failure.elapsed() < inner.config.backoff() {
                    warn!(
                        dir = %key.display(),
                        attempts = breaker.attempts,
                        "Circuit breaker open, using base managers"
                    );
                    return Ok(self.base());
                }
                debug!(dir = %key.display(), "Circuit breaker backoff elapsed, retrying");
                state.breakers.remove(&key);
            }
        }

        inner.creation_attempts.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = create_dirs(&paths).await {
            let breaker = state.breakers.entry(key.clone()).or_insert(BreakerState {
                attempts: 0,
                last_failure: Instant::now(),
            });
            breaker.attempts += 1;
            breaker.last_failure = Instant::now();
            warn!(
                dir = %key.display(),
                attempts = breaker.attempts,
                "Failed to prepare working directory: {}", e
            );
            return Err(e);
        }

        let budget = ctx.remaining().min(inner.config.indexer_timeout());
        let indexer = open_indexer(&inner.indexers, &paths, budget).await;
        let set = Arc::new(ManagerSet::new(paths, indexer, inner.template_dir.as_deref()));

        state.sets.insert(
            key.clone(),
            CachedSet {
                set: Arc::clone(&set),
                last_accessed: AtomicU64::new(inner.now_ms()),
            },
        );
        state.breakers.remove(&key);
        inner.creations.fetch_add(1, Ordering::Relaxed);
        info!(dir = %key.display(), search = set.has_search(), "Created managers");
        Ok(set)
    }

    /// Number of cached (non-base) sets.
    pub async fn cached_count(&self) -> usize {
        self.inner.state.read().await.sets.len()
    }

    /// Whether a set for `dir` is cached.
    pub async fn is_cached(&self, dir: &Path) -> bool {
        self.inner.state.read().await.sets.contains_key(dir)
    }

    /// Sets successfully created since start.
    #[must_use]
    pub fn creation_count(&self) -> u64 {
        self.inner.creations.load(Ordering::Relaxed)
    }

    /// Creation attempts since start, including failed ones.
    #[must_use]
    pub fn creation_attempts(&self) -> u64 {
        self.inner.creation_attempts.load(Ordering::Relaxed)
    }

    /// Evict every set idle for longer than the threshold and close its
    /// index. Returns the number of evicted sets.
    pub async fn evict_idle(&self) -> usize {
        self.inner.evict_idle().await
    }

    /// Start the periodic eviction task. Calling it twice is a no-op.
    pub fn start_sweeper(&self) {
        let Ok(mut slot) = self.inner.sweeper.lock() else {
            warn!("Sweeper lock poisoned, not starting sweeper");
            return;
        };
        if slot.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let inner = Arc::clone(&self.inner);
        let interval = inner.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let evicted = inner.evict_idle().await;
                        debug!(evicted, "Sweep finished");
                    }
                }
            }
            let _ = done_tx.send(());
        });

        *slot = Some(SweeperHandle {
            stop: stop_tx,
            done: done_rx,
        });
        debug!(interval_secs = interval.as_secs(), "Sweeper started");
    }

    /// Stop the sweeper and close every index, base included. Later calls
    /// are no-ops and later lookups fail.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let handle = inner.sweeper.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            let _ = handle.stop.send(());
            let _ = handle.done.await;
            debug!("Sweeper stopped");
        }

        let drained: Vec<CachedSet> = {
            let mut state = inner.state.write().await;
            state.breakers.clear();
            state.sets.drain().map(|(_, cached)| cached).collect()
        };
        for cached in &drained {
            cached.set.close().await;
        }
        inner.base.close().await;
        info!(closed = drained.len(), "Manager factory shut down");
    }
}

impl FactoryInner {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    async fn evict_idle(&self) -> usize {
        let now = self.now_ms();
        let threshold = self.config.idle_threshold();

        let evicted: Vec<(PathBuf, Arc<ManagerSet>)> = {
            let mut state = self.state.write().await;
            let stale: Vec<PathBuf> = state
                .sets
                .iter()
                .filter(|(_, cached)| cached.idle_for(now) > threshold)
                .map(|(key, _)| key.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|key| state.sets.remove(&key).map(|c| (key, c.set)))
                .collect()
        };

        for (key, set) in &evicted {
            set.close().await;
            info!(dir = %key.display(), "Evicted idle managers");
        }
        evicted.len()
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn create_dirs(paths: &WorkingPaths) -> Result<()> {
    let dirs: Vec<PathBuf> = paths
        .required_dirs()
        .iter()
        .map(|d| d.to_path_buf())
        .collect();
    tokio::task::spawn_blocking(move || -> Result<()> {
        for dir in &dirs {
            std::fs::create_dir_all(dir).map_err(|e| {
                TodoError::operation(
                    "create working directory",
                    format!("{}: {e}", dir.display()),
                )
            })?;
        }
        Ok(())
    })
    .await
    .map_err(|e| TodoError::internal(format!("directory task failed: {e}")))?
}

/// Open an index within `budget`. On timeout the open keeps running in the
/// background and whatever it produces is closed, never leaked.
async fn open_indexer(
    indexers: &Arc<dyn IndexerFactory>,
    paths: &WorkingPaths,
    budget: Duration,
) -> Option<Arc<dyn TodoIndexer>> {
    let (tx, mut rx) = oneshot::channel::<Result<Arc<dyn TodoIndexer>>>();
    let factory = Arc::clone(indexers);
    let task_paths = paths.clone();

    tokio::spawn(async move {
        let result = factory.open(&task_paths).await;
        if let Err(Ok(orphan)) = tx.send(result) {
            if let Err(e) = orphan.close().await {
                warn!("Failed to close abandoned index: {}", e);
            }
        }
    });

    match tokio::time::timeout(budget, &mut rx).await {
        Ok(Ok(Ok(indexer))) => Some(indexer),
        Ok(Ok(Err(e))) => {
            warn!(dir = %paths.working_dir.display(), "Search disabled, index failed to open: {}", e);
            None
        }
        Ok(Err(_)) => {
            warn!(dir = %paths.working_dir.display(), "Search disabled, index task ended early");
            None
        }
        Err(_) => {
            rx.close();
            if let Ok(Ok(late)) = rx.try_recv() {
                if let Err(e) = late.close().await {
                    warn!("Failed to close late index: {}", e);
                }
            }
            warn!(
                dir = %paths.working_dir.display(),
                timeout_ms = budget.as_millis() as u64,
                "Search disabled, index open timed out"
            );
            None
        }
    }
}
