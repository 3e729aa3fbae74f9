//! Write path.
//!
//! Inserts a batch of posts one record at a time into whichever backend is
//! active when the record is written. Per-record problems (malformed input,
//! duplicate keys, an unwritable backend) are counted in the report and never
//! abort the batch. The batch fails as a whole only when every backend is
//! exhausted or a rollover cannot be persisted.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::{RegistryError, StorageError, StorageResult};
use crate::monitor::SizeMonitor;
use crate::pool::PoolManager;
use crate::registry::Phase;
use crate::rollover::RolloverController;
use crate::types::{BackendDescriptor, InsertReport, NewPost, Post};

/// Routes inserts to the active backend.
#[derive(Debug, Clone)]
pub struct WritePath {
    pools: Arc<PoolManager>,
    monitor: Arc<SizeMonitor>,
    rollover: Arc<RolloverController>,
}

impl WritePath {
    /// Creates a write path over shared components.
    pub fn new(
        pools: Arc<PoolManager>,
        monitor: Arc<SizeMonitor>,
        rollover: Arc<RolloverController>,
    ) -> Self {
        Self {
            pools,
            monitor,
            rollover,
        }
    }

    /// Validates and inserts `posts`, reporting per-record outcomes.
    pub async fn insert_batch(&self, posts: Vec<NewPost>) -> StorageResult<InsertReport> {
        if self.rollover.phase() == Phase::Exhausted {
            return Err(self.exhausted(0));
        }

        let mut report = InsertReport::default();

        if posts.is_empty() {
            if let Some(active) = self.rollover.active() {
                report.active_descriptor_id = active.id;
            }
            return Ok(report);
        }

        if self.rollover.check().await? == Phase::Exhausted {
            return Err(self.exhausted(0));
        }

        for (index, raw) in posts.into_iter().enumerate() {
            let raw_id = raw.id().map(str::to_string);
            let post = match raw.validate() {
                Ok(post) => post,
                Err(e) => {
                    warn!(index, id = ?raw_id, error = %e, "Rejected malformed record");
                    report.record_failure(index, raw_id.as_deref(), e.to_string());
                    continue;
                }
            };

            // Re-resolve per record so rollovers by other writers are honored.
            let Some(target) = self.rollover.active() else {
                return Err(self.exhausted(report.inserted));
            };

            match self.insert_into(&target, &post).await {
                Ok(()) => report.inserted += 1,
                Err(e) if e.is_unreachable() => {
                    self.retry_after_unreachable(&mut report, index, &target, &post, e)
                        .await?;
                }
                Err(e) => {
                    if e.is_duplicate() {
                        warn!(index, id = %post.id, backend = %target.label(), "Duplicate key");
                    } else {
                        warn!(index, id = %post.id, backend = %target.label(), error = %e, "Insert failed");
                    }
                    report.record_failure(index, Some(&post.id), e.to_string());
                }
            }
        }

        self.finish(&mut report).await;

        debug!(
            inserted = report.inserted,
            failed = report.failed,
            active = report.active_descriptor_id,
            "Batch written"
        );
        Ok(report)
    }

    /// One more rollover check, with a fresh size, after the active backend
    /// stopped answering.
    ///
    /// Exhaustion fails the batch. A backend change retries the record once
    /// on the new active backend. Otherwise the record fails.
    async fn retry_after_unreachable(
        &self,
        report: &mut InsertReport,
        index: usize,
        target: &BackendDescriptor,
        post: &Post,
        cause: StorageError,
    ) -> StorageResult<()> {
        warn!(backend = %target.label(), error = %cause, "Active backend unreachable, re-checking rollover");

        match self.rollover.check_fresh().await? {
            Phase::Exhausted => Err(self.exhausted(report.inserted)),
            Phase::Active(now) if now != target.id => {
                let Some(next) = self.rollover.descriptor(now) else {
                    report.record_failure(index, Some(&post.id), cause.to_string());
                    return Ok(());
                };
                match self.insert_into(&next, post).await {
                    Ok(()) => report.inserted += 1,
                    Err(e) => {
                        warn!(index, id = %post.id, backend = %next.label(), error = %e, "Retry failed");
                        report.record_failure(index, Some(&post.id), e.to_string());
                    }
                }
                Ok(())
            }
            Phase::Active(_) => {
                report.record_failure(index, Some(&post.id), cause.to_string());
                Ok(())
            }
        }
    }

    async fn insert_into(&self, descriptor: &BackendDescriptor, post: &Post) -> StorageResult<()> {
        let backend = self.pools.acquire(descriptor).await?;
        backend.insert(post).await
    }

    /// Fills in the active backend and its size after the batch.
    async fn finish(&self, report: &mut InsertReport) {
        match self.rollover.active() {
            Some(active) => {
                report.active_descriptor_id = active.id;
                report.active_size_bytes = match self.monitor.measure_fresh(&active).await {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!(backend = %active.label(), error = %e, "Active backend size unknown");
                        None
                    }
                };
            }
            None => {
                report.active_descriptor_id = self.rollover.len().saturating_sub(1);
            }
        }
    }

    fn exhausted(&self, inserted: usize) -> StorageError {
        let backends = self.rollover.len();
        error!(backends, inserted, "Capacity exhausted, rejecting writes");
        RegistryError::CapacityExhausted { backends, inserted }.into()
    }
}
