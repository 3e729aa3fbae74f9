//! SQLite backend implementation.
//!
//! Serves a shard from a SQLite file (or an in-memory database), which suits
//! local collection runs and tests that need real full-text search.
//!
//! # Example
//!
//! ```no_run
//! use postvault_persistence::backends::RecordBackend;
//! use postvault_persistence::backends::sqlite::SqliteBackend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::open("./data/posts_0.db")?;
//! backend.ensure_schema().await?;
//! let hits = backend.search_text("rust", 20).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! - `posts`: one row per post; `id` is unique, `hashtags` and `media` are
//!   JSON arrays, `created_at` is an RFC 3339 UTC string with fixed precision
//!   so that it sorts lexicographically.
//! - `posts_fts`: FTS5 external-content index over `posts.text`, maintained
//!   by triggers and ranked with `bm25`. Without FTS5 the backend matches
//!   terms with `LIKE`.

mod backend;
pub(crate) mod schema;

pub use backend::{SqliteBackend, SqliteBackendConfig};
