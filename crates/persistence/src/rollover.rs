//! Rollover controller.
//!
//! Retires the active backend once it reaches the size ceiling and promotes
//! the next one. The states are `Active(i)` and the terminal `Exhausted`.
//!
//! Measuring happens outside the lock. The transition itself is a
//! compare-and-advance under one `parking_lot::Mutex`: it only fires if the
//! active index is still the one that was measured, so concurrent writers
//! that observe the same full backend promote its successor exactly once.
//! The successor state is persisted before it replaces the in-memory state;
//! if persisting fails nothing changes and the error surfaces.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::StorageResult;
use crate::monitor::SizeMonitor;
use crate::registry::{Phase, RegistryState, RegistryStore};
use crate::types::BackendDescriptor;

/// Owns the registry state and performs rollovers.
#[derive(Debug)]
pub struct RolloverController {
    state: Mutex<RegistryState>,
    store: Arc<dyn RegistryStore>,
    monitor: Arc<SizeMonitor>,
}

impl RolloverController {
    /// Creates a controller over a loaded registry.
    pub fn new(state: RegistryState, store: Arc<dyn RegistryStore>, monitor: Arc<SizeMonitor>) -> Self {
        Self {
            state: Mutex::new(state),
            store,
            monitor,
        }
    }

    /// A copy of the current registry.
    pub fn snapshot(&self) -> RegistryState {
        self.state.lock().clone()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.state.lock().phase()
    }

    /// The active descriptor, if any.
    pub fn active(&self) -> Option<BackendDescriptor> {
        self.state.lock().active().cloned()
    }

    /// The descriptor with the given ordinal.
    pub fn descriptor(&self, ordinal: usize) -> Option<BackendDescriptor> {
        self.state.lock().descriptor(ordinal).cloned()
    }

    /// All descriptors in ordinal order.
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.state.lock().descriptors().to_vec()
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Returns true if no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }

    /// Measures the active backend and rolls over while it is full.
    ///
    /// Returns the phase writes should use. An unmeasurable backend stays
    /// active. If a promoted backend is itself already full the check
    /// repeats, at most once per descriptor. Sizes come from the monitor's
    /// cache when it is enabled.
    pub async fn check(&self) -> StorageResult<Phase> {
        self.check_with(false).await
    }

    /// Like [`check`](Self::check) but always queries the backend.
    pub async fn check_fresh(&self) -> StorageResult<Phase> {
        self.check_with(true).await
    }

    async fn check_with(&self, fresh: bool) -> StorageResult<Phase> {
        loop {
            let (descriptor, limit) = {
                let state = self.state.lock();
                match state.active() {
                    Some(d) => (d.clone(), state.size_limit_bytes()),
                    None => return Ok(Phase::Exhausted),
                }
            };

            let measured = if fresh {
                self.monitor.measure_fresh(&descriptor).await
            } else {
                self.monitor.measure(&descriptor).await
            };
            let size = match measured {
                Ok(size) => size,
                Err(e) => {
                    warn!(
                        backend = %descriptor.label(),
                        error = %e,
                        "Backend size unknown, not rolling over"
                    );
                    return Ok(self.phase());
                }
            };

            if size < limit {
                return Ok(self.phase());
            }

            match self.advance_from(descriptor.id, size)? {
                Phase::Exhausted => return Ok(Phase::Exhausted),
                Phase::Active(_) => continue,
            }
        }
    }

    /// Retires `measured_index` if it is still the active backend.
    ///
    /// Returns the phase after the attempt. A caller that lost the race gets
    /// the phase another writer already advanced to.
    pub fn advance_from(&self, measured_index: usize, measured_size: u64) -> StorageResult<Phase> {
        let mut state = self.state.lock();
        if state.current_index() != measured_index {
            return Ok(state.phase());
        }

        let next = state.retired(measured_index)?;
        if let Err(e) = self.store.save(&next) {
            error!(
                backend = measured_index,
                error = %e,
                "Failed to persist rollover, registry unchanged"
            );
            return Err(e.into());
        }
        *state = next;
        self.monitor.invalidate(measured_index);

        let phase = state.phase();
        match phase {
            Phase::Active(to) => info!(
                from = measured_index,
                to,
                size_bytes = measured_size,
                limit_bytes = state.size_limit_bytes(),
                "Rolled over to next backend"
            ),
            Phase::Exhausted => error!(
                last = measured_index,
                backends = state.len(),
                size_bytes = measured_size,
                "All backends exhausted, writes will fail"
            ),
        }
        Ok(phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackendFactory;
    use crate::pool::PoolManager;
    use crate::registry::InMemoryRegistryStore;
    use std::time::Duration;

    fn controller(n: usize) -> (MemoryBackendFactory, Arc<InMemoryRegistryStore>, RolloverController) {
        let factory = MemoryBackendFactory::new();
        let pools = Arc::new(PoolManager::new(Arc::new(factory.clone())));
        let monitor = Arc::new(SizeMonitor::new(pools, Duration::ZERO));
        let descriptors = (0..n)
            .map(|i| BackendDescriptor::memory(i, format!("m{}", i)))
            .collect();
        let state = RegistryState::new(1000, descriptors).unwrap();
        let store = Arc::new(InMemoryRegistryStore::new(&state));
        let controller = RolloverController::new(state, store.clone(), monitor);
        (factory, store, controller)
    }

    #[tokio::test]
    async fn test_below_limit_stays_active() {
        let (factory, store, controller) = controller(2);
        factory.backend("m0").set_size(999);
        assert_eq!(controller.check().await.unwrap(), Phase::Active(0));
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_at_limit_rolls_over_and_persists() {
        let (factory, store, controller) = controller(2);
        factory.backend("m0").set_size(1200);
        assert_eq!(controller.check().await.unwrap(), Phase::Active(1));
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.saved().unwrap().current_index, 1);
        assert!(controller.descriptor(0).unwrap().exhausted);
    }

    #[tokio::test]
    async fn test_cascades_over_full_successors() {
        let (factory, store, controller) = controller(3);
        factory.backend("m0").set_size(1000);
        factory.backend("m1").set_size(5000);
        assert_eq!(controller.check().await.unwrap(), Phase::Active(2));
        assert_eq!(store.save_count(), 2);
    }

    #[tokio::test]
    async fn test_last_backend_full_is_exhausted() {
        let (factory, store, controller) = controller(1);
        factory.backend("m0").set_size(1000);
        assert_eq!(controller.check().await.unwrap(), Phase::Exhausted);
        assert_eq!(store.saved().unwrap().current_index, 1);
        assert_eq!(controller.check().await.unwrap(), Phase::Exhausted);
    }

    #[tokio::test]
    async fn test_unmeasurable_backend_stays_active() {
        let (factory, _store, controller) = controller(2);
        factory.backend("m0").set_reachable(false);
        assert_eq!(controller.check().await.unwrap(), Phase::Active(0));
    }

    #[tokio::test]
    async fn test_fresh_check_bypasses_size_cache() {
        let factory = MemoryBackendFactory::new();
        let pools = Arc::new(PoolManager::new(Arc::new(factory.clone())));
        let monitor = Arc::new(SizeMonitor::new(pools, Duration::from_secs(60)));
        let descriptors = vec![BackendDescriptor::memory(0, "m0"), BackendDescriptor::memory(1, "m1")];
        let state = RegistryState::new(1000, descriptors).unwrap();
        let store = Arc::new(InMemoryRegistryStore::new(&state));
        let controller = RolloverController::new(state, store, monitor);

        factory.backend("m0").set_size(10);
        assert_eq!(controller.check().await.unwrap(), Phase::Active(0));
        factory.backend("m0").set_size(1000);
        assert_eq!(controller.check().await.unwrap(), Phase::Active(0));
        assert_eq!(controller.check_fresh().await.unwrap(), Phase::Active(1));
    }

    #[test]
    fn test_stale_advance_is_a_no_op() {
        let (_factory, store, controller) = controller(3);
        assert_eq!(controller.advance_from(0, 1000).unwrap(), Phase::Active(1));
        assert_eq!(controller.advance_from(0, 1000).unwrap(), Phase::Active(1));
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn test_persist_failure_leaves_state_unchanged() {
        let (_factory, store, controller) = controller(2);
        store.set_fail_saves(true);
        let err = controller.advance_from(0, 1000).unwrap_err();
        assert!(matches!(
            err,
            crate::error::StorageError::Registry(crate::error::RegistryError::Persist { .. })
        ));
        assert_eq!(controller.phase(), Phase::Active(0));
        assert!(!controller.descriptor(0).unwrap().exhausted);
    }
}
