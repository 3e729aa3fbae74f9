//! The `PostStore` facade.
//!
//! Wires the registry, pool manager, size monitor, rollover controller,
//! write path and federated search into the object a transport layer talks
//! to.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use postvault_persistence::backends::DefaultBackendFactory;
//! use postvault_persistence::config::EngineConfig;
//! use postvault_persistence::engine::PostStore;
//! use postvault_persistence::registry::JsonFileRegistryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostStore::open(
//!     Arc::new(JsonFileRegistryStore::new("registry.json")),
//!     Arc::new(DefaultBackendFactory::new()),
//!     EngineConfig::from_env()?,
//! )?;
//! store.initialize_all().await;
//!
//! let hits = store.search("rust", 50).await?;
//! for post in &hits.posts {
//!     println!("{} {}", post.created_at, post.text);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::backends::{BackendFactory, RecordBackend};
use crate::config::EngineConfig;
use crate::error::StorageResult;
use crate::migrate::{self, MigrationReport};
use crate::monitor::SizeMonitor;
use crate::pool::PoolManager;
use crate::registry::{RegistryState, RegistryStore};
use crate::rollover::RolloverController;
use crate::search::FederatedSearch;
use crate::types::{
    BackendStatus, EngineStatus, InsertReport, NewPost, SearchResult, capacity_percent,
};
use crate::write::WritePath;

/// Multi-database post store.
///
/// Cheap to share behind an `Arc`; every method takes `&self` and may be
/// called concurrently.
#[derive(Debug)]
pub struct PostStore {
    config: EngineConfig,
    pools: Arc<PoolManager>,
    monitor: Arc<SizeMonitor>,
    rollover: Arc<RolloverController>,
    writer: WritePath,
    searcher: FederatedSearch,
}

impl PostStore {
    /// Loads the registry from `store` and builds the engine.
    pub fn open(
        store: Arc<dyn RegistryStore>,
        factory: Arc<dyn BackendFactory>,
        config: EngineConfig,
    ) -> StorageResult<Self> {
        let state = store.load()?;
        Self::new(state, store, factory, config)
    }

    /// Builds the engine over an already loaded registry.
    pub fn new(
        state: RegistryState,
        store: Arc<dyn RegistryStore>,
        factory: Arc<dyn BackendFactory>,
        config: EngineConfig,
    ) -> StorageResult<Self> {
        config.validate()?;
        state.validate()?;

        info!(
            backends = state.len(),
            current_index = state.current_index(),
            size_limit_bytes = state.size_limit_bytes(),
            "Opening post store"
        );

        let pools = Arc::new(PoolManager::new(factory));
        let monitor = Arc::new(SizeMonitor::new(Arc::clone(&pools), config.size_cache_ttl));
        let rollover = Arc::new(RolloverController::new(state, store, Arc::clone(&monitor)));
        let writer = WritePath::new(Arc::clone(&pools), Arc::clone(&monitor), Arc::clone(&rollover));
        let searcher = FederatedSearch::new(Arc::clone(&pools), Arc::clone(&rollover), &config);

        Ok(Self {
            config,
            pools,
            monitor,
            rollover,
            writer,
            searcher,
        })
    }

    /// Connects every backend and ensures its schema.
    ///
    /// Failures are logged and returned as ordinals; they do not stop the
    /// remaining backends.
    #[instrument(skip(self))]
    pub async fn initialize_all(&self) -> Vec<usize> {
        let mut failed = Vec::new();
        for descriptor in self.rollover.descriptors() {
            if let Err(e) = self.pools.acquire(&descriptor).await {
                warn!(backend = %descriptor.label(), error = %e, "Backend initialization failed");
                failed.push(descriptor.id);
            }
        }
        info!(
            backends = self.rollover.len(),
            failed = failed.len(),
            "Backend initialization finished"
        );
        failed
    }

    /// Validates and stores a batch of posts.
    #[instrument(skip(self, posts), fields(batch = posts.len()))]
    pub async fn insert_batch(&self, posts: Vec<NewPost>) -> StorageResult<InsertReport> {
        let report = self.writer.insert_batch(posts).await?;
        info!(
            inserted = report.inserted,
            failed = report.failed,
            active = report.active_descriptor_id,
            "Batch inserted"
        );
        Ok(report)
    }

    /// Searches every backend for `keyword`.
    #[instrument(skip(self))]
    pub async fn search(&self, keyword: &str, limit: usize) -> StorageResult<SearchResult> {
        self.searcher.search(keyword, limit).await
    }

    /// Reports the registry and the active backend's fill level.
    ///
    /// Never fails; values that cannot be measured are `None`.
    #[instrument(skip(self))]
    pub async fn status(&self) -> EngineStatus {
        let state = self.rollover.snapshot();
        let backends = state
            .descriptors()
            .iter()
            .map(|d| BackendStatus {
                id: d.id,
                database: d.database.clone(),
                exhausted: d.exhausted,
            })
            .collect();

        let mut status = EngineStatus {
            total_backends: state.len(),
            active_index: state.phase().active_index(),
            active_database: state.active().map(|d| d.database.clone()),
            size_limit_bytes: state.size_limit_bytes(),
            active_size_bytes: None,
            active_post_count: None,
            capacity_used_percent: None,
            backends,
        };

        if let Some(active) = state.active() {
            match self.monitor.measure(active).await {
                Ok(bytes) => {
                    status.active_size_bytes = Some(bytes);
                    status.capacity_used_percent =
                        Some(capacity_percent(bytes, state.size_limit_bytes()));
                }
                Err(e) => warn!(backend = %active.label(), error = %e, "Active backend size unknown"),
            }
            match self.pools.acquire(active).await {
                Ok(backend) => match backend.count().await {
                    Ok(count) => status.active_post_count = Some(count),
                    Err(e) => warn!(backend = %active.label(), error = %e, "Post count unknown"),
                },
                Err(e) => warn!(backend = %active.label(), error = %e, "Active backend unreachable"),
            }
        }

        status
    }

    /// Copies every backend's posts into `target`.
    #[instrument(skip(self, target), fields(destination = target.name()))]
    pub async fn migrate_all(
        &self,
        target: Arc<dyn RecordBackend>,
        batch_size: usize,
    ) -> StorageResult<MigrationReport> {
        let descriptors = self.rollover.descriptors();
        migrate::migrate_all(&self.pools, &descriptors, target, batch_size).await
    }

    /// A copy of the current registry.
    pub fn registry(&self) -> RegistryState {
        self.rollover.snapshot()
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The pool manager, for direct access to connected backends.
    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }
}
