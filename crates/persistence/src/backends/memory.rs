//! In-memory backend for tests and embedding.
//!
//! Keeps posts in a process-local map. The reported size is the sum of the
//! serialized rows unless overridden, and the backend can be switched
//! unreachable or slowed down at runtime to exercise rollover, partial
//! failure and timeout handling without a database server.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::sleep;

use crate::error::{BackendError, RecordError, StorageResult};
use crate::types::{BackendDescriptor, Post};

use super::{BackendFactory, BackendKind, RecordBackend};

/// Process-local backend.
pub struct MemoryBackend {
    name: String,
    posts: RwLock<HashMap<String, Post>>,
    size_override: RwLock<Option<u64>>,
    latency: RwLock<Duration>,
    reachable: AtomicBool,
    writable: AtomicBool,
    search_calls: AtomicUsize,
}

impl Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("name", &self.name)
            .field("posts", &self.posts.read().len())
            .field("reachable", &self.is_reachable())
            .finish_non_exhaustive()
    }
}

impl MemoryBackend {
    /// Creates an empty, reachable backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            posts: RwLock::new(HashMap::new()),
            size_override: RwLock::new(None),
            latency: RwLock::new(Duration::ZERO),
            reachable: AtomicBool::new(true),
            writable: AtomicBool::new(true),
            search_calls: AtomicUsize::new(0),
        }
    }

    /// Reports `bytes` as the database size instead of the computed one.
    pub fn set_size(&self, bytes: u64) {
        *self.size_override.write() = Some(bytes);
    }

    /// Goes back to computing the size from the stored rows.
    pub fn clear_size(&self) {
        *self.size_override.write() = None;
    }

    /// Makes every operation fail with `Unreachable` (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns whether the backend currently answers.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Makes inserts fail with `Unreachable` while reads keep answering.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    /// Delays every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Number of `search_text` calls received.
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Number of stored posts.
    pub fn len(&self) -> usize {
        self.posts.read().len()
    }

    /// Returns true if no post is stored.
    pub fn is_empty(&self) -> bool {
        self.posts.read().is_empty()
    }

    /// Returns the stored post with the given id.
    pub fn get(&self, id: &str) -> Option<Post> {
        self.posts.read().get(id).cloned()
    }

    /// Stores a post directly, replacing any post with the same id.
    pub fn put(&self, post: Post) {
        self.posts.write().insert(post.id.clone(), post);
    }

    async fn enter(&self) -> StorageResult<()> {
        tokio::task::yield_now().await;
        let latency = *self.latency.read();
        if !latency.is_zero() {
            sleep(latency).await;
        }
        if !self.is_reachable() {
            return Err(BackendError::Unreachable {
                backend: self.name.clone(),
                message: "backend is switched off".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn computed_size(&self) -> u64 {
        self.posts
            .read()
            .values()
            .map(|p| serde_json::to_vec(p).map(|v| v.len() as u64).unwrap_or(0))
            .sum()
    }
}

/// Lowercased alphanumeric terms of a keyword.
fn terms(keyword: &str) -> Vec<String> {
    keyword
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        self.enter().await
    }

    async fn insert(&self, post: &Post) -> StorageResult<()> {
        self.enter().await?;
        if !self.writable.load(Ordering::SeqCst) {
            return Err(BackendError::Unreachable {
                backend: self.name.clone(),
                message: "backend rejects writes".to_string(),
            }
            .into());
        }
        let mut posts = self.posts.write();
        if posts.contains_key(&post.id) {
            return Err(RecordError::DuplicateKey {
                id: post.id.clone(),
                backend: self.name.clone(),
            }
            .into());
        }
        posts.insert(post.id.clone(), post.clone());
        Ok(())
    }

    async fn search_text(&self, keyword: &str, limit: usize) -> StorageResult<Vec<Post>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;

        let terms = terms(keyword);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let posts = self.posts.read();
        let mut scored: Vec<(usize, &Post)> = posts
            .values()
            .filter_map(|post| {
                let text = post.text.to_lowercase();
                let mut score = 0;
                for term in &terms {
                    let hits = text.matches(term.as_str()).count();
                    if hits == 0 {
                        return None;
                    }
                    score += hits;
                }
                Some((score, post))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
                .then_with(|| a.1.id.cmp(&b.1.id))
        });

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, post)| post.clone())
            .collect())
    }

    async fn database_size(&self) -> StorageResult<u64> {
        self.enter().await?;
        if let Some(bytes) = *self.size_override.read() {
            return Ok(bytes);
        }
        Ok(self.computed_size())
    }

    async fn count(&self) -> StorageResult<u64> {
        self.enter().await?;
        Ok(self.posts.read().len() as u64)
    }

    async fn scan(&self, offset: usize, limit: usize) -> StorageResult<Vec<Post>> {
        self.enter().await?;
        let mut posts: Vec<Post> = self.posts.read().values().cloned().collect();
        posts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(posts.into_iter().skip(offset).take(limit).collect())
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.enter().await
    }
}

/// Hands out one shared [`MemoryBackend`] per database name.
///
/// Tests keep a handle on the factory to reach the backends the engine
/// connected to and inject faults.
#[derive(Clone, Default)]
pub struct MemoryBackendFactory {
    backends: Arc<RwLock<HashMap<String, Arc<MemoryBackend>>>>,
    connects: Arc<AtomicUsize>,
}

impl Debug for MemoryBackendFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackendFactory")
            .field("backends", &self.backends.read().len())
            .finish_non_exhaustive()
    }
}

impl MemoryBackendFactory {
    /// Creates a factory with no backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the backend for `database`, creating it if needed.
    pub fn backend(&self, database: &str) -> Arc<MemoryBackend> {
        if let Some(existing) = self.backends.read().get(database) {
            return Arc::clone(existing);
        }
        let mut backends = self.backends.write();
        Arc::clone(
            backends
                .entry(database.to_string())
                .or_insert_with(|| Arc::new(MemoryBackend::new(database))),
        )
    }

    /// Returns the backend for `database` if it was created.
    pub fn get(&self, database: &str) -> Option<Arc<MemoryBackend>> {
        self.backends.read().get(database).cloned()
    }

    /// Number of `connect` calls served, successful or not.
    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendFactory for MemoryBackendFactory {
    async fn connect(&self, descriptor: &BackendDescriptor) -> StorageResult<Arc<dyn RecordBackend>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if descriptor.kind != BackendKind::Memory {
            return Err(BackendError::UnsupportedKind {
                kind: descriptor.kind.to_string(),
            }
            .into());
        }
        let backend = self.backend(&descriptor.database);
        backend.health_check().await?;
        Ok(backend)
    }
}
