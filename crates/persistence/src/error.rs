//! Error types for the persistence layer.
//!
//! Errors are grouped by category: per-record errors (validation and
//! primary-key conflicts), backend errors (connectivity and query failures
//! against one database), registry errors (rollover state and capacity),
//! search errors and configuration errors.
//!
//! The engine absorbs per-record and per-backend failures locally and reports
//! them through counts and omissions. Only registry exhaustion, persistence
//! failures and invalid requests surface as operation-level errors.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Errors local to a single record.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Errors raised by one database backend.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Registry and rollover errors.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Search request errors.
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Configuration errors.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StorageError {
    /// Returns true if the error means a backend could not be reached.
    ///
    /// The write path treats these as a trigger for one more rollover check;
    /// the search path drops the backend from the merge.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, StorageError::Backend(BackendError::Unreachable { .. }))
    }

    /// Returns true if the error is a primary-key conflict.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StorageError::Record(RecordError::DuplicateKey { .. }))
    }

    /// Returns true if every registered backend is at capacity.
    pub fn is_capacity_exhausted(&self) -> bool {
        matches!(
            self,
            StorageError::Registry(RegistryError::CapacityExhausted { .. })
        )
    }
}

/// Errors local to a single record. They never abort a batch.
#[derive(Error, Debug)]
pub enum RecordError {
    /// The record failed validation.
    #[error("malformed record: field '{field}' {message}")]
    MalformedRecord { field: String, message: String },

    /// A record with the same primary key already exists in the target backend.
    #[error("duplicate key '{id}' in backend {backend}")]
    DuplicateKey { id: String, backend: String },
}

impl RecordError {
    /// Creates a validation error for a field that is absent or empty.
    pub fn missing(field: &str) -> Self {
        RecordError::MalformedRecord {
            field: field.to_string(),
            message: "is required".to_string(),
        }
    }

    /// Creates a validation error for a field with an unusable value.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        RecordError::MalformedRecord {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Errors originating from a database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend could not be reached (network, authentication, pool).
    #[error("backend unreachable: {backend}: {message}")]
    Unreachable { backend: String, message: String },

    /// A query against the backend failed.
    #[error("query failed on {backend}: {message}")]
    QueryFailed { backend: String, message: String },

    /// Creating or verifying the schema failed.
    #[error("schema initialization failed on {backend}: {message}")]
    SchemaFailed { backend: String, message: String },

    /// The descriptor names a backend kind that is not compiled in.
    #[error("backend kind '{kind}' is not available in this build")]
    UnsupportedKind { kind: String },

    /// Internal backend error.
    #[error("internal error in {backend}: {message}")]
    Internal {
        backend: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Errors related to the database registry and rollover.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Every registered backend is at or over the size ceiling.
    #[error(
        "capacity exhausted: all {backends} registered backends are at or over the size limit ({inserted} records inserted before exhaustion)"
    )]
    CapacityExhausted { backends: usize, inserted: usize },

    /// The registry violates one of its invariants.
    #[error("invalid registry state: {message}")]
    InvalidState { message: String },

    /// The registry could not be persisted.
    #[error("failed to persist registry to {path}: {message}")]
    Persist { path: String, message: String },

    /// The registry could not be loaded.
    #[error("failed to load registry from {path}: {message}")]
    Load { path: String, message: String },
}

/// Errors related to search requests.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The keyword was empty or whitespace.
    #[error("search keyword cannot be empty")]
    EmptyKeyword,
}

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A duration setting was zero.
    #[error("{setting} must be greater than zero")]
    ZeroDuration { setting: String },

    /// A numeric setting was out of range.
    #[error("invalid value for {setting}: {message}")]
    InvalidValue { setting: String, message: String },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Internal {
            backend: "unknown".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(BackendError::QueryFailed {
            backend: "sqlite".to_string(),
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::Unreachable {
            backend: "sqlite".to_string(),
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        // A closed connection means the server went away mid-query.
        if err.is_closed() {
            return StorageError::Backend(BackendError::Unreachable {
                backend: "postgres".to_string(),
                message: err.to_string(),
            });
        }
        StorageError::Backend(BackendError::Internal {
            backend: "postgres".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}
