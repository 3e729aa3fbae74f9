//! Connection pool manager.
//!
//! Holds at most one pooled [`RecordBackend`] per descriptor ordinal,
//! created on first use. Concurrent first acquisitions of the same ordinal
//! share a single connection attempt. A failed attempt is not remembered,
//! so the next acquisition retries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::backends::{BackendFactory, RecordBackend};
use crate::error::StorageResult;
use crate::types::BackendDescriptor;

type Slot = Arc<OnceCell<Arc<dyn RecordBackend>>>;

/// Lazily connects and caches one backend per descriptor.
pub struct PoolManager {
    factory: Arc<dyn BackendFactory>,
    slots: Mutex<HashMap<usize, Slot>>,
}

impl fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("connected", &self.connected())
            .finish_non_exhaustive()
    }
}

impl PoolManager {
    /// Creates a manager that connects through `factory`.
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the pooled backend for `descriptor`, connecting on first use.
    ///
    /// The first successful connection also ensures the schema exists.
    pub async fn acquire(
        &self,
        descriptor: &BackendDescriptor,
    ) -> StorageResult<Arc<dyn RecordBackend>> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(descriptor.id).or_default())
        };

        let backend = slot
            .get_or_try_init(|| async {
                let backend = self.factory.connect(descriptor).await.inspect_err(|e| {
                    warn!(backend = %descriptor.label(), error = %e, "Connection failed");
                })?;
                backend.ensure_schema().await.inspect_err(|e| {
                    warn!(backend = %descriptor.label(), error = %e, "Schema initialization failed");
                })?;
                info!(backend = %descriptor.label(), kind = %descriptor.kind, "Backend connected, schema ready");
                Ok::<_, crate::error::StorageError>(backend)
            })
            .await?;

        Ok(Arc::clone(backend))
    }

    /// Returns the backend for `ordinal` if it is already connected.
    pub fn cached(&self, ordinal: usize) -> Option<Arc<dyn RecordBackend>> {
        self.slots
            .lock()
            .get(&ordinal)
            .and_then(|slot| slot.get().cloned())
    }

    /// Number of connected backends.
    pub fn connected(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }
}
