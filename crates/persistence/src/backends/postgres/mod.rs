//! PostgreSQL backend implementation.
//!
//! Connection pooling via deadpool-postgres, native `TIMESTAMPTZ` and
//! `TEXT[]` columns, and full-text search over a trigger-maintained
//! `tsvector` column with a GIN index.
//!
//! # Example
//!
//! ```no_run
//! use postvault_persistence::backends::RecordBackend;
//! use postvault_persistence::backends::postgres::PostgresBackend;
//! use postvault_persistence::types::BackendDescriptor;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptor = BackendDescriptor::postgres(0, "localhost", 5432, "posts_0")
//!     .with_credentials("postgres", Some("postgres".to_string()));
//! let backend = PostgresBackend::connect(&descriptor).await?;
//! backend.ensure_schema().await?;
//! println!("{} bytes", backend.database_size().await?);
//! # Ok(())
//! # }
//! ```

mod backend;
pub(crate) mod schema;

pub use backend::{PostgresBackend, PostgresConfig, is_connection_error};
