//! Database backend implementations.
//!
//! Every registered database is served by a [`RecordBackend`], created from
//! its [`BackendDescriptor`] by a [`BackendFactory`]. Drivers are gated
//! behind feature flags.
//!
//! # Available Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | PostgreSQL | `postgres` | Production shards; `tsvector` full-text search |
//! | SQLite | `sqlite` (default) | Embedded/local shards; FTS5 full-text search |
//! | Memory | always | Process-local shards with fault injection, for tests |

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, StorageResult};
use crate::types::{BackendDescriptor, Post};

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryBackend, MemoryBackendFactory};

/// Identifies the driver behind a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// PostgreSQL database.
    #[default]
    Postgres,
    /// SQLite database (file-based or in-memory).
    Sqlite,
    /// Process-local map.
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

/// Uniform query/execute contract implemented by every driver.
///
/// Implementations are internally pooled and shared through `Arc`; every
/// method may be called concurrently.
#[async_trait]
pub trait RecordBackend: Send + Sync + Debug {
    /// The driver kind.
    fn kind(&self) -> BackendKind;

    /// Label used in logs and errors.
    fn name(&self) -> &str;

    /// Creates the posts table and its indexes if missing. Idempotent.
    async fn ensure_schema(&self) -> StorageResult<()>;

    /// Inserts one post. Fails with `DuplicateKey` on a primary-key conflict.
    async fn insert(&self, post: &Post) -> StorageResult<()>;

    /// Full-text search over `text`, best matches first, at most `limit` rows.
    async fn search_text(&self, keyword: &str, limit: usize) -> StorageResult<Vec<Post>>;

    /// Backend-native on-disk size in bytes.
    async fn database_size(&self) -> StorageResult<u64>;

    /// Number of stored posts.
    async fn count(&self) -> StorageResult<u64>;

    /// A page of posts ordered by `created_at` then `id`.
    async fn scan(&self, offset: usize, limit: usize) -> StorageResult<Vec<Post>>;

    /// Verifies the backend answers a trivial query.
    async fn health_check(&self) -> StorageResult<()>;
}

/// Creates live backends from descriptors.
///
/// Connecting performs the network/auth handshake; failure is reported as
/// `BackendError::Unreachable`.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Connects to the database described by `descriptor`.
    async fn connect(&self, descriptor: &BackendDescriptor) -> StorageResult<Arc<dyn RecordBackend>>;
}

/// Factory dispatching on [`BackendKind`] to the compiled-in drivers.
#[derive(Debug, Clone, Default)]
pub struct DefaultBackendFactory {
    memory: MemoryBackendFactory,
}

impl DefaultBackendFactory {
    /// Creates a factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared in-memory backends created by this factory.
    pub fn memory(&self) -> &MemoryBackendFactory {
        &self.memory
    }
}

#[async_trait]
impl BackendFactory for DefaultBackendFactory {
    async fn connect(&self, descriptor: &BackendDescriptor) -> StorageResult<Arc<dyn RecordBackend>> {
        match descriptor.kind {
            BackendKind::Memory => self.memory.connect(descriptor).await,

            #[cfg(feature = "sqlite")]
            BackendKind::Sqlite => {
                // Opening the pool connects synchronously.
                let descriptor = descriptor.clone();
                let backend = tokio::task::spawn_blocking(move || {
                    sqlite::SqliteBackend::from_descriptor(&descriptor)
                })
                .await
                .map_err(|e| BackendError::Internal {
                    backend: "sqlite".to_string(),
                    message: format!("SQLite open task failed: {}", e),
                    source: Some(Box::new(e)),
                })??;
                Ok(Arc::new(backend))
            }

            #[cfg(feature = "postgres")]
            BackendKind::Postgres => {
                let backend = postgres::PostgresBackend::connect(descriptor).await?;
                Ok(Arc::new(backend))
            }

            #[allow(unreachable_patterns)]
            other => Err(BackendError::UnsupportedKind {
                kind: other.to_string(),
            }
            .into()),
        }
    }
}
