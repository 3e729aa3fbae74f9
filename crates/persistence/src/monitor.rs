//! Size monitor.
//!
//! Measures the on-disk size of a backend with its native size query. A
//! failed measurement means "size unknown", never "over the limit".
//! Measurements can be reused for a short TTL to keep size queries off the
//! hot write path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::StorageResult;
use crate::pool::PoolManager;
use crate::types::BackendDescriptor;

/// Measures backend sizes through the pool manager.
#[derive(Debug)]
pub struct SizeMonitor {
    pools: Arc<PoolManager>,
    ttl: Duration,
    cache: Mutex<HashMap<usize, (u64, Instant)>>,
}

impl SizeMonitor {
    /// Creates a monitor. A zero `ttl` always measures.
    pub fn new(pools: Arc<PoolManager>, ttl: Duration) -> Self {
        Self {
            pools,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Size of the backend in bytes, possibly from the cache.
    pub async fn measure(&self, descriptor: &BackendDescriptor) -> StorageResult<u64> {
        if !self.ttl.is_zero() {
            if let Some((bytes, at)) = self.cache.lock().get(&descriptor.id).copied() {
                if at.elapsed() < self.ttl {
                    return Ok(bytes);
                }
            }
        }
        self.measure_fresh(descriptor).await
    }

    /// Size of the backend in bytes, bypassing the cache.
    pub async fn measure_fresh(&self, descriptor: &BackendDescriptor) -> StorageResult<u64> {
        let backend = self.pools.acquire(descriptor).await?;
        let started = Instant::now();
        let bytes = backend.database_size().await?;
        debug!(
            backend = %descriptor.label(),
            bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Measured backend size"
        );
        if !self.ttl.is_zero() {
            self.cache.lock().insert(descriptor.id, (bytes, Instant::now()));
        }
        Ok(bytes)
    }

    /// Drops the cached measurement for `ordinal`.
    pub fn invalidate(&self, ordinal: usize) {
        self.cache.lock().remove(&ordinal);
    }

    /// The configured cache TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
