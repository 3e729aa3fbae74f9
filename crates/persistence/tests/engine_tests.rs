//! Engine facade tests: startup initialization, status reporting and
//! consolidation of every backend into one.

mod common;

use std::sync::Arc;

use common::*;
use postvault_persistence::backends::{MemoryBackend, RecordBackend};
use postvault_persistence::error::{ConfigError, StorageError};

// ============================================================================
// Initialization
// ============================================================================

#[tokio::test]
async fn test_initialize_all_reports_failed_backends() {
    let ctx = TestContext::new(3, 1_000_000);
    ctx.backend(1).set_reachable(false);

    let failed = ctx.store.initialize_all().await;

    assert_eq!(failed, vec![1]);
    assert_eq!(ctx.store.pools().connected(), 2);
    assert!(ctx.store.pools().cached(0).is_some());
    assert!(ctx.store.pools().cached(1).is_none());
    assert!(ctx.store.pools().cached(2).is_some());
}

#[tokio::test]
async fn test_initialize_all_does_not_reconnect() {
    let ctx = TestContext::new(2, 1_000_000);
    assert!(ctx.store.initialize_all().await.is_empty());
    assert!(ctx.store.initialize_all().await.is_empty());
    assert_eq!(ctx.factory.connect_calls(), 2);
}

// ============================================================================
// Status
// ============================================================================

#[tokio::test]
async fn test_status_reports_active_fill_level() {
    let ctx = TestContext::new(3, 1000);
    ctx.seed(0, [stored_post("a", "x", 0), stored_post("b", "y", 1)]);
    ctx.backend(0).set_size(250);

    let status = ctx.store.status().await;

    assert_eq!(status.total_backends, 3);
    assert_eq!(status.active_index, Some(0));
    assert_eq!(status.active_database.as_deref(), Some("shard_0"));
    assert_eq!(status.size_limit_bytes, 1000);
    assert_eq!(status.active_size_bytes, Some(250));
    assert_eq!(status.active_post_count, Some(2));
    assert_eq!(status.capacity_used_percent, Some(25.0));
    assert!(!status.is_exhausted());
    assert_eq!(status.backends.len(), 3);
    assert!(status.backends.iter().all(|b| !b.exhausted));
}

#[tokio::test]
async fn test_status_follows_rollover() {
    let ctx = TestContext::new(2, 1000);
    ctx.backend(0).set_size(1000);
    ctx.backend(1).set_size(0);
    ctx.store
        .insert_batch(vec![new_post("a", "x", 0)])
        .await
        .unwrap();

    let status = ctx.store.status().await;
    assert_eq!(status.active_index, Some(1));
    assert_eq!(status.active_database.as_deref(), Some("shard_1"));
    assert!(status.backends[0].exhausted);
    assert!(!status.backends[1].exhausted);
}

#[tokio::test]
async fn test_status_when_exhausted() {
    let ctx = TestContext::new(1, 1000);
    ctx.backend(0).set_size(1000);
    assert!(ctx.store.insert_batch(vec![new_post("a", "x", 0)]).await.is_err());

    let status = ctx.store.status().await;
    assert!(status.is_exhausted());
    assert_eq!(status.active_index, None);
    assert_eq!(status.active_database, None);
    assert_eq!(status.active_size_bytes, None);
    assert_eq!(status.capacity_used_percent, None);
}

#[tokio::test]
async fn test_status_never_fails_on_unreachable_active() {
    let ctx = TestContext::new(2, 1000);
    ctx.backend(0).set_reachable(false);

    let status = ctx.store.status().await;
    assert_eq!(status.active_index, Some(0));
    assert_eq!(status.active_size_bytes, None);
    assert_eq!(status.active_post_count, None);
    assert_eq!(status.capacity_used_percent, None);
}

#[tokio::test]
async fn test_status_serializes_for_transport() {
    let ctx = TestContext::new(2, 1000);
    ctx.backend(0).set_size(500);
    let json = serde_json::to_value(ctx.store.status().await).unwrap();
    assert_eq!(json["total_backends"], 2);
    assert_eq!(json["active_index"], 0);
    assert_eq!(json["capacity_used_percent"], 50.0);
}

// ============================================================================
// Migration
// ============================================================================

fn seeded_for_migration() -> TestContext {
    let ctx = TestContext::new(3, 1_000_000_000);
    ctx.seed(0, (0..5).map(|n| stored_post(&format!("a{}", n), "alpha", n)));
    ctx.seed(1, (0..3).map(|n| stored_post(&format!("b{}", n), "beta", n)));
    ctx.seed(2, (0..4).map(|n| stored_post(&format!("c{}", n), "gamma", n)));
    ctx
}

#[tokio::test]
async fn test_migrate_all_copies_every_backend() {
    let ctx = seeded_for_migration();
    let target = Arc::new(MemoryBackend::new("consolidated"));
    target.put(stored_post("b1", "beta", 1));

    let report = ctx.store.migrate_all(target.clone(), 2).await.unwrap();

    assert_eq!(report.migrated, 11);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert!(report.incomplete_sources().is_empty());
    assert_eq!(target.len(), 12);
    let scanned: Vec<usize> = report.sources.iter().map(|s| s.scanned).collect();
    assert_eq!(scanned, vec![5, 3, 4]);
}

#[tokio::test]
async fn test_migrate_all_is_rerunnable() {
    let ctx = seeded_for_migration();
    let target = Arc::new(MemoryBackend::new("consolidated"));

    ctx.store.migrate_all(target.clone(), 10).await.unwrap();
    let again = ctx.store.migrate_all(target.clone(), 10).await.unwrap();

    assert_eq!(again.migrated, 0);
    assert_eq!(again.skipped, 12);
    assert_eq!(target.count().await.unwrap(), 12);
}

#[tokio::test]
async fn test_migrate_all_skips_unreachable_source() {
    let ctx = seeded_for_migration();
    ctx.backend(1).set_reachable(false);
    let target = Arc::new(MemoryBackend::new("consolidated"));

    let report = ctx.store.migrate_all(target.clone(), 4).await.unwrap();

    assert_eq!(report.incomplete_sources(), vec![1]);
    assert_eq!(report.migrated, 9);
    assert!(report.sources[1].error.is_some());
}

#[tokio::test]
async fn test_migrate_all_rejects_zero_batch_size() {
    let ctx = seeded_for_migration();
    let target = Arc::new(MemoryBackend::new("consolidated"));

    let err = ctx.store.migrate_all(target, 0).await.unwrap_err();
    assert!(matches!(err, StorageError::Config(ConfigError::InvalidValue { .. })));
}

#[tokio::test]
async fn test_migrate_all_fails_on_unreachable_target() {
    let ctx = seeded_for_migration();
    let target = Arc::new(MemoryBackend::new("consolidated"));
    target.set_reachable(false);

    let err = ctx.store.migrate_all(target, 10).await.unwrap_err();
    assert!(err.is_unreachable());
}
