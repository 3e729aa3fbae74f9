//! SQLite backend integration tests.
//!
//! Run the backend on its own and as the shards of a `PostStore`, with real
//! FTS5 search and page-based size measurement.

#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::*;
use postvault_persistence::backends::sqlite::{SqliteBackend, SqliteBackendConfig};
use postvault_persistence::backends::{BackendFactory, DefaultBackendFactory, RecordBackend};
use postvault_persistence::config::EngineConfig;
use postvault_persistence::error::StorageResult;
use postvault_persistence::registry::{InMemoryRegistryStore, RegistryState};
use postvault_persistence::types::{BackendDescriptor, ViewCount};
use postvault_persistence::PostStore;

async fn create_backend() -> SqliteBackend {
    let backend = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
    backend
        .ensure_schema()
        .await
        .expect("Failed to initialize schema");
    backend
}

fn sqlite_store(descriptors: Vec<BackendDescriptor>, size_limit: u64) -> PostStore {
    let state = RegistryState::new(size_limit, descriptors).expect("valid registry");
    PostStore::new(
        state.clone(),
        Arc::new(InMemoryRegistryStore::new(&state)),
        Arc::new(DefaultBackendFactory::new()),
        EngineConfig::default(),
    )
    .expect("engine should open")
}

// ============================================================================
// Schema
// ============================================================================

#[tokio::test]
async fn test_schema_enables_fts() {
    let backend = create_backend().await;
    assert!(backend.fts_enabled());
    assert!(backend.health_check().await.is_ok());
    assert_eq!(backend.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ensure_schema_is_idempotent() {
    let backend = create_backend().await;
    backend.insert(&stored_post("1", "kept", 0)).await.unwrap();
    backend.ensure_schema().await.unwrap();
    assert_eq!(backend.count().await.unwrap(), 1);
}

// ============================================================================
// Insert
// ============================================================================

#[tokio::test]
async fn test_insert_round_trips_every_field() {
    let backend = create_backend().await;
    let mut post = PostFixture::new("1001", "full record")
        .hashtags(&["rust", "sqlite"])
        .views(ViewCount::Integer(99))
        .stored();
    post.like_count = 7;
    post.verified = true;
    post.language = Some("en".to_string());
    post.author_location = Some("Berlin".to_string());
    post.media = vec!["https://pbs.example/1.jpg".to_string()];

    backend.insert(&post).await.unwrap();

    let page = backend.scan(0, 10).await.unwrap();
    assert_eq!(page, vec![post]);
}

#[tokio::test]
async fn test_duplicate_id_is_rejected() {
    let backend = create_backend().await;
    backend.insert(&stored_post("1", "first", 0)).await.unwrap();

    let err = backend
        .insert(&stored_post("1", "second", 1))
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
    assert_eq!(backend.count().await.unwrap(), 1);
}

// ============================================================================
// Search
// ============================================================================

#[tokio::test]
async fn test_fts_search_matches_terms() {
    let backend = create_backend().await;
    backend.insert(&stored_post("1", "Rust ownership explained", 0)).await.unwrap();
    backend.insert(&stored_post("2", "Python packaging woes", 1)).await.unwrap();
    backend.insert(&stored_post("3", "rust and sqlite together", 2)).await.unwrap();

    let hits = backend.search_text("rust", 10).await.unwrap();
    let mut ids: Vec<&str> = hits.iter().map(|p| p.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["1", "3"]);

    let both = backend.search_text("rust sqlite", 10).await.unwrap();
    assert_eq!(both.len(), 1);
    assert_eq!(both[0].id, "3");
}

#[tokio::test]
async fn test_fts_search_stems_words() {
    let backend = create_backend().await;
    backend.insert(&stored_post("1", "the crawler keeps running", 0)).await.unwrap();

    let hits = backend.search_text("runs", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_search_honours_limit() {
    let backend = create_backend().await;
    for n in 0..20 {
        backend
            .insert(&stored_post(&format!("p{}", n), "limited rust", n))
            .await
            .unwrap();
    }
    assert_eq!(backend.search_text("rust", 5).await.unwrap().len(), 5);
    assert!(backend.search_text("rust", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_tolerates_query_syntax() {
    let backend = create_backend().await;
    backend.insert(&stored_post("1", "rust OR go", 0)).await.unwrap();

    for keyword in ["\"rust", "rust*", "(rust", "rust -go", "NEAR(rust", "^"] {
        let result = backend.search_text(keyword, 10).await;
        assert!(result.is_ok(), "keyword {:?} failed: {:?}", keyword, result);
    }
}

// ============================================================================
// Size and Scan
// ============================================================================

#[tokio::test]
async fn test_database_size_grows_with_rows() {
    let backend = create_backend().await;
    let before = backend.database_size().await.unwrap();

    for n in 0..200 {
        let text = format!("post number {} {}", n, "padding text ".repeat(20));
        backend
            .insert(&stored_post(&format!("p{}", n), &text, n))
            .await
            .unwrap();
    }

    let after = backend.database_size().await.unwrap();
    assert!(after > before, "size did not grow: {} -> {}", before, after);
}

#[tokio::test]
async fn test_scan_pages_in_creation_order() {
    let backend = create_backend().await;
    for (id, minutes) in [("c", 30), ("a", 10), ("b", 20), ("d", 40)] {
        backend.insert(&stored_post(id, "x", minutes)).await.unwrap();
    }

    let first: Vec<String> = backend.scan(0, 2).await.unwrap().into_iter().map(|p| p.id).collect();
    let second: Vec<String> = backend.scan(2, 2).await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(first, vec!["a", "b"]);
    assert_eq!(second, vec!["c", "d"]);
    assert!(backend.scan(4, 2).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_file_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posts_0.db");

    {
        let backend = SqliteBackend::open(&path).unwrap();
        backend.ensure_schema().await.unwrap();
        backend.insert(&stored_post("1", "durable rust", 0)).await.unwrap();
    }

    let reopened = SqliteBackend::open(&path).unwrap();
    reopened.ensure_schema().await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 1);
    assert_eq!(reopened.search_text("durable", 5).await.unwrap()[0].id, "1");
}

// ============================================================================
// Engine over SQLite Shards
// ============================================================================

#[tokio::test]
async fn test_engine_searches_across_sqlite_shards() {
    let store = sqlite_store(
        vec![
            BackendDescriptor::sqlite(0, ":memory:"),
            BackendDescriptor::sqlite(1, ":memory:"),
        ],
        u64::MAX,
    );
    assert!(store.initialize_all().await.is_empty());

    // Write the same id into both shards directly.
    let registry = store.registry();
    for (ordinal, text) in [(0, "shared rust from zero"), (1, "shared rust from one")] {
        let backend = store
            .pools()
            .acquire(registry.descriptor(ordinal).unwrap())
            .await
            .unwrap();
        backend.insert(&stored_post("42", text, ordinal as i64)).await.unwrap();
        backend
            .insert(&stored_post(&format!("own-{}", ordinal), text, 10 + ordinal as i64))
            .await
            .unwrap();
    }

    let result = store.search("rust", 10).await.unwrap();
    assert_eq!(result.ids(), vec!["own-1", "own-0", "42"]);
    assert_eq!(result.posts[2].text, "shared rust from zero");
    assert_well_formed(&result);
}

#[tokio::test]
async fn test_engine_rolls_over_between_sqlite_files() {
    let dir = tempfile::tempdir().unwrap();

    let probe = SqliteBackend::open(dir.path().join("probe.db")).unwrap();
    probe.ensure_schema().await.unwrap();
    let empty_size = probe.database_size().await.unwrap();

    let descriptors = (0..2)
        .map(|i| {
            let path = dir.path().join(format!("posts_{}.db", i));
            BackendDescriptor::sqlite(i, path.to_string_lossy().into_owned())
        })
        .collect();
    let store = sqlite_store(descriptors, empty_size + 4096);

    let posts = (0..100)
        .map(|n| {
            let text = format!("sqlite rollover {} {}", n, "filler ".repeat(30));
            new_post(&format!("a{}", n), &text, n)
        })
        .collect();
    let first = store.insert_batch(posts).await.unwrap();
    assert_eq!(first.inserted, 100);
    assert_eq!(first.active_descriptor_id, 0);
    assert!(first.active_size_bytes.unwrap() > empty_size + 4096);

    let second = store
        .insert_batch(vec![new_post("b0", "sqlite rollover tail", 200)])
        .await
        .unwrap();
    assert_eq!(second.active_descriptor_id, 1);
    assert_eq!(store.registry().current_index(), 1);

    let result = store.search("rollover", 1000).await.unwrap();
    assert_eq!(result.len(), 101);
    assert_eq!(result.posts[0].id, "b0");
    assert_eq!(result.answered_backends, vec![0, 1]);
}

/// Hands out backends the test opened itself, by ordinal.
struct OpenedBackends(Vec<Arc<SqliteBackend>>);

#[async_trait]
impl BackendFactory for OpenedBackends {
    async fn connect(
        &self,
        descriptor: &BackendDescriptor,
    ) -> StorageResult<Arc<dyn RecordBackend>> {
        Ok(self.0[descriptor.id].clone())
    }
}

#[tokio::test]
async fn test_locked_shard_is_cut_off_by_sub_query_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let locked_path = dir.path().join("locked.db");

    let fast = SqliteBackend::in_memory().unwrap();
    let locked = SqliteBackend::with_config(
        "sqlite:locked",
        &locked_path,
        SqliteBackendConfig {
            connection_timeout_ms: 3000,
            busy_timeout_ms: 3000,
            enable_wal: false,
            ..Default::default()
        },
    )
    .unwrap();

    let descriptors = vec![
        BackendDescriptor::sqlite(0, ":memory:"),
        BackendDescriptor::sqlite(1, locked_path.to_string_lossy().into_owned()),
    ];
    let state = RegistryState::new(u64::MAX, descriptors).unwrap();
    let config = EngineConfig::builder()
        .sub_query_timeout(Duration::from_millis(100))
        .search_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let store = PostStore::new(
        state.clone(),
        Arc::new(InMemoryRegistryStore::new(&state)),
        Arc::new(OpenedBackends(vec![Arc::new(fast), Arc::new(locked)])),
        config,
    )
    .unwrap();
    assert!(store.initialize_all().await.is_empty());
    store
        .insert_batch(vec![new_post("a", "locked rust", 0)])
        .await
        .unwrap();

    // Without WAL an exclusive lock makes every reader wait in the busy handler.
    let holder = rusqlite::Connection::open(&locked_path).unwrap();
    holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let started = Instant::now();
    let result = store.search("rust", 10).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(1), "search took {:?}", elapsed);
    assert_eq!(result.ids(), vec!["a"]);
    assert_eq!(result.answered_backends, vec![0]);
    assert_eq!(result.failed_backends, vec![1]);

    holder.execute_batch("ROLLBACK").unwrap();
}
