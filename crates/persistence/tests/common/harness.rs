//! Engine harness over in-memory backends.

use std::sync::Arc;

use postvault_persistence::backends::{MemoryBackend, MemoryBackendFactory};
use postvault_persistence::config::EngineConfig;
use postvault_persistence::registry::{InMemoryRegistryStore, RegistryState};
use postvault_persistence::types::{BackendDescriptor, Post};
use postvault_persistence::PostStore;

/// Database name of the in-memory backend with ordinal `i`.
pub fn shard_name(i: usize) -> String {
    format!("shard_{}", i)
}

/// A [`PostStore`] whose backends and registry store the test can reach.
pub struct TestContext {
    pub factory: MemoryBackendFactory,
    pub registry: Arc<InMemoryRegistryStore>,
    pub store: Arc<PostStore>,
}

impl TestContext {
    /// `backends` in-memory shards sharing a `size_limit` byte ceiling.
    pub fn new(backends: usize, size_limit: u64) -> Self {
        Self::with_config(backends, size_limit, EngineConfig::default())
    }

    pub fn with_config(backends: usize, size_limit: u64, config: EngineConfig) -> Self {
        let descriptors = (0..backends)
            .map(|i| BackendDescriptor::memory(i, shard_name(i)))
            .collect();
        let state = RegistryState::new(size_limit, descriptors).expect("valid registry");
        Self::from_state(state, config)
    }

    pub fn from_state(state: RegistryState, config: EngineConfig) -> Self {
        let factory = MemoryBackendFactory::new();
        let registry = Arc::new(InMemoryRegistryStore::new(&state));
        let store = PostStore::new(state, registry.clone(), Arc::new(factory.clone()), config)
            .expect("engine should open");
        Self {
            factory,
            registry,
            store: Arc::new(store),
        }
    }

    /// The backend with ordinal `i`, created on first use.
    pub fn backend(&self, i: usize) -> Arc<MemoryBackend> {
        self.factory.backend(&shard_name(i))
    }

    /// Stores `posts` directly in backend `i`, bypassing the write path.
    pub fn seed(&self, i: usize, posts: impl IntoIterator<Item = Post>) {
        let backend = self.backend(i);
        for post in posts {
            backend.put(post);
        }
    }

    pub fn current_index(&self) -> usize {
        self.store.registry().current_index()
    }
}
