//! Consolidation of every registered backend into one target backend.
//!
//! Each source is scanned in `created_at` order, one page at a time, and
//! every post is inserted into the target. Posts the target already holds
//! are skipped, so a migration can be re-run after an interruption.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::backends::RecordBackend;
use crate::error::{ConfigError, StorageResult};
use crate::pool::PoolManager;
use crate::types::BackendDescriptor;

/// Outcome of migrating one source backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceMigration {
    /// Ordinal of the source.
    pub id: usize,
    /// Database name of the source.
    pub database: String,
    /// Posts read from the source.
    pub scanned: usize,
    /// Posts written to the target.
    pub migrated: usize,
    /// Posts the target already had.
    pub skipped: usize,
    /// Posts the target rejected.
    pub failed: usize,
    /// Why the source was not (fully) migrated.
    pub error: Option<String>,
}

/// Outcome of [`migrate_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Per-source outcomes in ordinal order.
    pub sources: Vec<SourceMigration>,
    /// Total posts written to the target.
    pub migrated: usize,
    /// Total posts the target already had.
    pub skipped: usize,
    /// Total posts the target rejected.
    pub failed: usize,
}

impl MigrationReport {
    /// Ordinals of the sources that could not be read completely.
    pub fn incomplete_sources(&self) -> Vec<usize> {
        self.sources
            .iter()
            .filter(|s| s.error.is_some())
            .map(|s| s.id)
            .collect()
    }
}

/// Copies every post of every descriptor into `target`.
///
/// Unreachable sources are reported and skipped. Fails only if `batch_size`
/// is zero or the target schema cannot be created.
pub async fn migrate_all(
    pools: &PoolManager,
    descriptors: &[BackendDescriptor],
    target: Arc<dyn RecordBackend>,
    batch_size: usize,
) -> StorageResult<MigrationReport> {
    if batch_size == 0 {
        return Err(ConfigError::InvalidValue {
            setting: "batch_size".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into());
    }

    target.ensure_schema().await?;
    info!(destination = target.name(), sources = descriptors.len(), batch_size, "Starting migration");

    let mut report = MigrationReport::default();
    for descriptor in descriptors {
        let source = migrate_source(pools, descriptor, target.as_ref(), batch_size).await;
        report.migrated += source.migrated;
        report.skipped += source.skipped;
        report.failed += source.failed;
        report.sources.push(source);
    }

    info!(
        migrated = report.migrated,
        skipped = report.skipped,
        failed = report.failed,
        "Migration finished"
    );
    Ok(report)
}

async fn migrate_source(
    pools: &PoolManager,
    descriptor: &BackendDescriptor,
    target: &dyn RecordBackend,
    batch_size: usize,
) -> SourceMigration {
    let mut outcome = SourceMigration {
        id: descriptor.id,
        database: descriptor.database.clone(),
        ..Default::default()
    };

    let source = match pools.acquire(descriptor).await {
        Ok(source) => source,
        Err(e) => {
            warn!(backend = %descriptor.label(), error = %e, "Source unreachable, skipping");
            outcome.error = Some(e.to_string());
            return outcome;
        }
    };

    let mut offset = 0;
    loop {
        let page = match source.scan(offset, batch_size).await {
            Ok(page) => page,
            Err(e) => {
                warn!(backend = %descriptor.label(), offset, error = %e, "Scan failed, stopping source");
                outcome.error = Some(e.to_string());
                break;
            }
        };
        let fetched = page.len();
        outcome.scanned += fetched;

        for post in &page {
            match target.insert(post).await {
                Ok(()) => outcome.migrated += 1,
                Err(e) if e.is_duplicate() => outcome.skipped += 1,
                Err(e) => {
                    warn!(id = %post.id, error = %e, "Failed to migrate post");
                    outcome.failed += 1;
                }
            }
        }

        if fetched < batch_size {
            break;
        }
        offset += fetched;
    }

    info!(
        backend = %descriptor.label(),
        scanned = outcome.scanned,
        migrated = outcome.migrated,
        skipped = outcome.skipped,
        "Source migrated"
    );
    outcome
}
