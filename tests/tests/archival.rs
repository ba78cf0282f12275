//! Archival worker tests: cold-write-then-hot-delete, crash recovery and
//! single-flight across workers.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use findings_core::{ArchivalSettings, FindingStatus, HotRemoval, PipelineConfig, Severity};
use findings_store::{ColdStorage, FindingsStore, InMemoryColdStorage, InMemoryFindingsStore};
use integration_tests::{
    fixtures,
    mocks::{Crash, CrashingStore, FlakyColdStorage},
    setup::{test_config, TestContext},
};
use worker::{ArchivalWorker, InFlightRegistry};

/// The day the seeded records expire.
fn expiry_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap()
}

async fn seed(ctx: &TestContext, ids: &[&str]) {
    for id in ids {
        ctx.processor
            .ingest_at(
                fixtures::normalized(id, Severity::Medium, fixtures::jan_first()),
                fixtures::jan_first(),
            )
            .await
            .unwrap();
    }
}

fn crashing_context(mode: Crash) -> (TestContext, Arc<CrashingStore>) {
    let hot = Arc::new(InMemoryFindingsStore::new());
    let crashing = CrashingStore::new(hot.clone(), mode);
    let ctx = TestContext::with_stores(test_config(), hot, crashing.clone(), None);
    (ctx, crashing)
}

/// A record is always retrievable from the hot store or present in cold
/// storage.
async fn assert_nothing_lost(ctx: &TestContext, ids: &[&str]) {
    for id in ids {
        let hot = ctx.store.get(id).await.unwrap();
        let cold = ctx.cold.keys_for(id);
        assert!(
            hot.is_some() || !cold.is_empty(),
            "{} is in neither hot nor cold storage",
            id
        );
    }
}

#[tokio::test]
async fn test_sweep_moves_expiring_records_to_cold() {
    let ctx = TestContext::new();
    seed(&ctx, &["f1", "f2", "f3"]).await;

    let report = ctx.archival.sweep_at(expiry_day()).await.unwrap();
    assert_eq!(report.examined, 3);
    assert_eq!(report.archived, 3);
    assert_eq!(report.failed, 0);
    assert!(!report.checkpointed);

    assert!(ctx.hot.is_empty());
    assert_eq!(ctx.cold.len(), 3);

    let key = &ctx.cold.keys_for("f1")[0];
    let object = ctx.cold.get(key).await.unwrap().expect("archived object");
    assert_eq!(object.finding.id, "f1");
    assert_eq!(object.retention_days, 90);
    assert_eq!(object.archived_at, expiry_day());
}

#[tokio::test]
async fn test_records_outside_lookahead_stay_hot() {
    let ctx = TestContext::new();
    seed(&ctx, &["f1"]).await;

    let report = ctx
        .archival
        .sweep_at(expiry_day() - chrono::Duration::days(2))
        .await
        .unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(ctx.hot.len(), 1);
    assert!(ctx.cold.is_empty());
}

/// The worker dies after the cold write for f2 but before its hot delete.
/// f2 stays retrievable, and the next sweep finishes the delete without
/// writing cold storage again.
#[tokio::test]
async fn test_crash_between_cold_write_and_hot_delete() {
    let (ctx, crashing) = crashing_context(Crash::Fail);
    seed(&ctx, &["f1", "f2", "f3"]).await;
    crashing.crash_on("f2");

    let report = ctx.archival.sweep_at(expiry_day()).await.unwrap();
    assert_eq!(report.archived, 2);
    assert_eq!(report.failed, 1);

    let f2 = ctx.store.get("f2").await.unwrap().expect("f2 still retrievable");
    assert_eq!(f2.status, FindingStatus::Active);
    assert_eq!(ctx.cold.keys_for("f2").len(), 1);
    assert_eq!(ctx.cold.write_count(), 3);
    assert_nothing_lost(&ctx, &["f1", "f2", "f3"]).await;

    crashing.heal();
    let report = ctx.archival.sweep_at(expiry_day()).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.archived, 1);
    assert_eq!(report.resumed, 1);

    assert!(ctx.store.get("f2").await.unwrap().is_none());
    assert_eq!(ctx.cold.write_count(), 3);
    assert_eq!(ctx.cold.len(), 3);
}

/// A hot delete that never returns is cut off by the call timeout; the
/// record stays active.
#[tokio::test]
async fn test_hanging_hot_delete_times_out() {
    let (ctx, crashing) = crashing_context(Crash::Hang);
    seed(&ctx, &["f1", "f2"]).await;
    crashing.crash_on("f2");

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        ctx.archival.sweep_at(expiry_day()),
    )
    .await
    .expect("sweep bounded by call timeout")
    .unwrap();

    assert_eq!(report.archived, 1);
    assert_eq!(report.failed, 1);
    assert!(ctx.store.get("f2").await.unwrap().is_some());
    assert_nothing_lost(&ctx, &["f1", "f2"]).await;
}

/// A failed cold write never leads to a hot delete.
#[tokio::test]
async fn test_cold_write_failure_leaves_record_active() {
    let hot = Arc::new(InMemoryFindingsStore::new());
    let cold = Arc::new(InMemoryColdStorage::new());
    let flaky = FlakyColdStorage::new(cold.clone());
    let ctx = TestContext::with_stores(
        test_config(),
        hot.clone(),
        hot,
        Some((cold, flaky.clone() as Arc<dyn ColdStorage>)),
    );
    seed(&ctx, &["f1", "f2"]).await;
    flaky.fail_writes_for("f1");

    let report = ctx.archival.sweep_at(expiry_day()).await.unwrap();
    assert_eq!(report.archived, 1);
    assert_eq!(report.failed, 1);

    let f1 = ctx.store.get("f1").await.unwrap().expect("f1 kept");
    assert!(f1.is_active());
    assert!(ctx.cold.keys_for("f1").is_empty());
    assert!(ctx.store.get("f2").await.unwrap().is_none());

    flaky.heal();
    let report = ctx.archival.sweep_at(expiry_day()).await.unwrap();
    assert_eq!(report.archived, 1);
    assert_eq!(report.resumed, 0);
    assert!(ctx.hot.is_empty());
}

/// The TTL reaper leaves a past-TTL record whose cold write failed, so the
/// next sweep can still archive it.
#[tokio::test]
async fn test_reaper_spares_record_after_failed_cold_write() {
    let hot = Arc::new(InMemoryFindingsStore::new());
    let cold = Arc::new(InMemoryColdStorage::new());
    let flaky = FlakyColdStorage::new(cold.clone());
    let ctx = TestContext::with_stores(
        test_config(),
        hot.clone(),
        hot,
        Some((cold, flaky.clone() as Arc<dyn ColdStorage>)),
    );
    seed(&ctx, &["f1"]).await;
    flaky.fail_writes_for("f1");

    let report = ctx.archival.sweep_at(expiry_day()).await.unwrap();
    assert_eq!(report.failed, 1);

    let purged = ctx
        .archival
        .reap_expired(expiry_day() + chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(purged, 0);
    assert_nothing_lost(&ctx, &["f1"]).await;

    flaky.heal();
    let report = ctx
        .archival
        .sweep_at(expiry_day() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.archived, 1);
    assert!(ctx.hot.is_empty());
    assert_eq!(ctx.cold.keys_for("f1").len(), 1);
}

/// Any mix of crashes loses nothing.
#[tokio::test]
async fn test_no_record_lost_under_mixed_failures() {
    let (ctx, crashing) = crashing_context(Crash::Fail);
    let ids: Vec<String> = (0..40).map(|i| format!("f{:02}", i)).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    seed(&ctx, &refs).await;
    for id in refs.iter().step_by(3) {
        crashing.crash_on(id);
    }

    let report = ctx.archival.sweep_at(expiry_day()).await.unwrap();
    assert_eq!(report.failed, 14);
    assert_eq!(report.archived, 26);
    assert_nothing_lost(&ctx, &refs).await;

    crashing.heal();
    let report = ctx.archival.sweep_at(expiry_day()).await.unwrap();
    assert_eq!(report.resumed, 14);
    assert!(ctx.hot.is_empty());
    assert_eq!(ctx.cold.len(), 40);
    assert_eq!(ctx.cold.write_count(), 40);
}

/// Two workers sharing an in-flight registry archive each record once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_archive_each_record_once() {
    let ctx = TestContext::new();
    let ids: Vec<String> = (0..60).map(|i| format!("f{:02}", i)).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    seed(&ctx, &refs).await;

    let registry = InFlightRegistry::new();
    let cold = ctx.cold.clone() as Arc<dyn ColdStorage>;
    let config = Arc::new(PipelineConfig {
        archival: ArchivalSettings {
            page_size: 7,
            concurrency: 3,
            ..Default::default()
        },
        ..test_config()
    });
    let worker = |registry: &InFlightRegistry| {
        Arc::new(
            ArchivalWorker::new(config.clone(), ctx.store.clone(), Some(cold.clone()))
                .with_in_flight(registry.clone()),
        )
    };
    let a = worker(&registry);
    let b = worker(&registry);

    let (ra, rb) = tokio::join!(a.sweep_at(expiry_day()), b.sweep_at(expiry_day()));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.failed + rb.failed, 0);
    assert_eq!(ra.archived + rb.archived, 60);
    assert!(ctx.hot.is_empty());
    assert_eq!(ctx.cold.len(), 60);
    assert_eq!(ctx.cold.write_count(), 60);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_tombstone_mode_keeps_archived_marker() {
    let ctx = TestContext::with_config(PipelineConfig {
        archival: ArchivalSettings {
            hot_removal: HotRemoval::Tombstone,
            ..Default::default()
        },
        ..test_config()
    });
    seed(&ctx, &["f1"]).await;

    ctx.archival.sweep_at(expiry_day()).await.unwrap();

    let tombstone = ctx.store.get("f1").await.unwrap().expect("tombstone kept");
    assert_eq!(tombstone.status, FindingStatus::Archived);
    assert_eq!(ctx.cold.len(), 1);

    // Tombstones are not swept again
    let report = ctx.archival.sweep_at(expiry_day()).await.unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(ctx.cold.write_count(), 1);

    let server = ctx.server();
    let response = server
        .get("/findings")
        .add_query_param("status", "ARCHIVED")
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["status"], "ARCHIVED");
}

#[tokio::test]
async fn test_sweep_over_http() {
    let ctx = TestContext::new();
    let server = ctx.server();
    seed(&ctx, &["f1", "f2"]).await;

    let response = server.post("/archival/sweep").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["archived"], 2);
    assert_eq!(body["data"]["checkpointed"], false);

    assert_eq!(ctx.cold.len(), 2);
    assert!(ctx.hot.is_empty());

    let response = server.get("/archival/status").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["data"]["enabled"], true);
    assert_eq!(body["data"]["sweep_in_progress"], false);
    assert!(body["data"]["checkpoint"].is_null());
    assert_eq!(body["data"]["in_flight"], 0);
}
