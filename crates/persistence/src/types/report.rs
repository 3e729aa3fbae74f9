//! Results returned by the engine's operations.

use serde::Serialize;

use super::Post;

/// Outcome of one `insert_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    /// Records written.
    pub inserted: usize,

    /// Records rejected (malformed, duplicate or unwritable).
    pub failed: usize,

    /// Ordinal of the active backend after the batch.
    pub active_descriptor_id: usize,

    /// Size of the active backend after the batch; `None` if it could not be measured.
    pub active_size_bytes: Option<u64>,

    /// One entry per failed record, in input order.
    pub failures: Vec<RecordFailure>,
}

impl InsertReport {
    pub(crate) fn record_failure(&mut self, index: usize, id: Option<&str>, message: String) {
        self.failed += 1;
        self.failures.push(RecordFailure {
            index,
            id: id.map(str::to_string),
            message,
        });
    }
}

/// Why a single record of a batch was not written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    /// Position of the record in the submitted batch.
    pub index: usize,

    /// Post id, if the record had one.
    pub id: Option<String>,

    /// Error message.
    pub message: String,
}

/// The merged answer to a federated keyword search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    /// Posts ordered by `created_at` descending, at most `limit` long.
    pub posts: Vec<Post>,

    /// Ordinals whose sub-query completed.
    pub answered_backends: Vec<usize>,

    /// Ordinals whose sub-query failed, timed out or was cancelled.
    pub failed_backends: Vec<usize>,
}

impl SearchResult {
    /// Number of posts returned.
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    /// Returns true if no post matched.
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// Returns true if backends were queried and none of them answered.
    pub fn all_failed(&self) -> bool {
        self.answered_backends.is_empty() && !self.failed_backends.is_empty()
    }

    /// Ids of the returned posts, in result order.
    pub fn ids(&self) -> Vec<&str> {
        self.posts.iter().map(|p| p.id.as_str()).collect()
    }
}

/// Snapshot of the registry and the active backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    /// Number of registered backends.
    pub total_backends: usize,

    /// Ordinal of the active backend; `None` once every backend is exhausted.
    pub active_index: Option<usize>,

    /// Database name of the active backend.
    pub active_database: Option<String>,

    /// Size ceiling per backend, in bytes.
    pub size_limit_bytes: u64,

    /// Measured size of the active backend; `None` if unknown.
    pub active_size_bytes: Option<u64>,

    /// Row count of the active backend; `None` if unknown.
    pub active_post_count: Option<u64>,

    /// `active_size_bytes / size_limit_bytes * 100`, rounded to two decimals.
    pub capacity_used_percent: Option<f64>,

    /// Per-descriptor retirement flags.
    pub backends: Vec<BackendStatus>,
}

impl EngineStatus {
    /// Returns true once every backend is exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.active_index.is_none()
    }
}

/// Per-descriptor entry of [`EngineStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub id: usize,
    pub database: String,
    pub exhausted: bool,
}

/// Percentage of `limit` used by `size`, rounded to two decimals.
pub(crate) fn capacity_percent(size: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 100.0;
    }
    let pct = size as f64 / limit as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}
