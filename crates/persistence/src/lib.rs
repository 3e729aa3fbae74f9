//! Postvault persistence layer.
//!
//! Spreads one logical dataset of collected social-media posts across an
//! ordered list of independently sized databases, rolls over to the next
//! database when the active one reaches its size ceiling, and answers
//! keyword queries by fanning out to every database concurrently and merging
//! the answers.
//!
//! # Backend Features
//!
//! Enable backends with feature flags in `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! postvault-persistence = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! Available features:
//! - `sqlite` (default) - SQLite shards with FTS5 full-text search
//! - `postgres` - PostgreSQL shards with `tsvector` full-text search
//! - `logging` - [`logging::init_logging`] helper for binaries
//!
//! The in-memory backend is always available.
//!
//! # Architecture
//!
//! - [`registry`] - ordered backend descriptors, the active index and its durable store
//! - [`backends`] - the [`RecordBackend`](backends::RecordBackend) contract and its drivers
//! - [`pool`] - one lazily connected backend per descriptor
//! - [`monitor`] - backend size measurement
//! - [`rollover`] - retires full backends, exactly once under concurrent writers
//! - [`write`] - per-record batch inserts into the active backend
//! - [`search`] / [`merger`] - concurrent fan-out, de-duplication and ordering
//! - [`engine`] - the [`PostStore`] facade
//! - [`migrate`] - consolidation of every backend into one
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use postvault_persistence::backends::MemoryBackendFactory;
//! use postvault_persistence::config::EngineConfig;
//! use postvault_persistence::registry::{InMemoryRegistryStore, RegistryState};
//! use postvault_persistence::types::{BackendDescriptor, NewPost};
//! use postvault_persistence::PostStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let state = RegistryState::new(
//!     500 * 1024 * 1024,
//!     vec![
//!         BackendDescriptor::memory(0, "posts_0"),
//!         BackendDescriptor::memory(1, "posts_1"),
//!     ],
//! )?;
//! let store = PostStore::new(
//!     state.clone(),
//!     Arc::new(InMemoryRegistryStore::new(&state)),
//!     Arc::new(MemoryBackendFactory::new()),
//!     EngineConfig::default(),
//! )?;
//!
//! let post: NewPost = serde_json::from_str(
//!     r#"{"tweetId": "1", "userId": "7", "username": "ferris",
//!         "displayName": "Ferris", "text": "hello from rust",
//!         "createdAt": "Mon Jan 19 21:23:43 +0000 2026",
//!         "tweetUrl": "https://x.com/ferris/status/1", "viewCount": "12"}"#,
//! )?;
//! let report = store.insert_batch(vec![post]).await?;
//! assert_eq!(report.inserted, 1);
//!
//! let hits = store.search("rust", 10).await?;
//! assert_eq!(hits.posts[0].id, "1");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod engine;
pub mod error;
pub mod merger;
pub mod migrate;
pub mod monitor;
pub mod pool;
pub mod registry;
pub mod rollover;
pub mod search;
pub mod types;
pub mod write;

#[cfg(feature = "logging")]
pub mod logging;

// Re-export commonly used types at crate root
pub use backends::{BackendFactory, BackendKind, RecordBackend};
pub use config::{EngineConfig, RegistryConfig};
pub use engine::PostStore;
pub use error::{StorageError, StorageResult};
pub use registry::{Phase, RegistryState, RegistryStore};
pub use types::{BackendDescriptor, InsertReport, NewPost, Post, SearchResult};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
