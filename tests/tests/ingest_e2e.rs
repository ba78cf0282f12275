//! End-to-end tests for the ingest pipeline.
//!
//! POST /ingest → EventSourceAdapter → IngestionProcessor → hot store, with
//! alerts captured by recording channels on both tiers.

use chrono::{Duration, TimeZone, Utc};
use std::time::Duration as StdDuration;

use findings_core::{FindingStatus, PipelineConfig, RetentionDays, Severity};
use findings_store::FindingsStore;
use integration_tests::{
    fixtures,
    setup::{test_config, TestContext},
};
use worker::{AlertKind, AlertTier, IngestOutcome};

const ALERT_WAIT: StdDuration = StdDuration::from_secs(2);

/// CRITICAL finding ingested on 2024-01-01 with 90-day retention.
#[tokio::test]
async fn test_critical_finding_stamped_and_escalated() {
    let ctx = TestContext::new();

    let outcome = ctx
        .processor
        .ingest_at(
            fixtures::normalized("f1", Severity::Critical, fixtures::jan_first()),
            fixtures::jan_first(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Stored);

    let stored = ctx.store.get("f1").await.unwrap().expect("f1 stored");
    assert_eq!(stored.ingestion_time, fixtures::jan_first());
    assert_eq!(
        stored.ttl_timestamp,
        Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap()
    );
    assert_eq!(stored.status, FindingStatus::Active);

    // One dispatch, fanned out to both tiers
    assert_eq!(ctx.processor.alerts().dispatch_count(), 1);
    assert!(ctx.escalation.wait_for(1, ALERT_WAIT).await);
    assert!(ctx.standard.wait_for(1, ALERT_WAIT).await);

    let alert = &ctx.escalation.alerts()[0];
    assert_eq!(alert.kind, AlertKind::Finding);
    assert_eq!(alert.tier, AlertTier::Escalation);
    assert_eq!(alert.finding_id.as_deref(), Some("f1"));
    assert_eq!(alert.channel_id, "security-alerts");
    assert_eq!(ctx.standard.alerts()[0].alert_id, alert.alert_id);
}

#[tokio::test]
async fn test_ttl_follows_configured_retention() {
    let ctx = TestContext::with_config(PipelineConfig {
        retention_days: RetentionDays::new(91).unwrap(),
        ..test_config()
    });

    ctx.processor
        .ingest_at(
            fixtures::normalized("f1", Severity::Low, fixtures::jan_first()),
            fixtures::jan_first(),
        )
        .await
        .unwrap();

    let stored = ctx.store.get("f1").await.unwrap().unwrap();
    assert_eq!(
        stored.ttl_timestamp,
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_ingest_single_envelope_e2e() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let event = fixtures::finding_event("f1", "high", "2024-01-01T00:00:00Z");
    let response = server.post("/ingest").json(&event).await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["received"], 1);
    assert_eq!(body["stored"], 1);
    assert_eq!(body["alerts_dispatched"], 1);

    let response = server.get("/findings/f1").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["data"]["id"], "f1");
    assert_eq!(body["data"]["severity"], "HIGH");
    assert_eq!(body["data"]["status"], "ACTIVE");

    // HIGH stays on the standard tier
    assert!(ctx.standard.wait_for(1, ALERT_WAIT).await);
    assert_eq!(ctx.standard.alerts()[0].tier, AlertTier::Standard);
    assert_eq!(ctx.escalation.count(), 0);
}

#[tokio::test]
async fn test_ingest_array_and_batch_formats_e2e() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes(fixtures::array_payload(fixtures::finding_events(3, "MEDIUM")).into())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], 3);
    assert_eq!(body["stored"], 3);
    assert_eq!(body["alerts_dispatched"], 0);

    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes(fixtures::batch_payload(fixtures::finding_events(4, "LOW")).into())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], 4);
    assert_eq!(body["stored"], 4);

    assert_eq!(ctx.hot.len(), 7);
    assert_eq!(ctx.processor.alerts().dispatch_count(), 0);
}

#[tokio::test]
async fn test_ingest_provider_event_e2e() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let payload = fixtures::provider_event(vec![
        fixtures::provider_finding("arn:aws:securityhub:finding/1", "CRITICAL"),
        fixtures::provider_finding("arn:aws:securityhub:finding/2", "INFORMATIONAL"),
    ]);
    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes(payload.into())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], 2);
    assert_eq!(body["stored"], 2);
    assert_eq!(body["alerts_dispatched"], 1);

    let stored = ctx
        .store
        .get("arn:aws:securityhub:finding/1")
        .await
        .unwrap()
        .expect("provider finding stored");
    assert_eq!(stored.severity, Severity::Critical);
    assert_eq!(stored.resource, "arn:aws:s3:::public-bucket");
    assert_eq!(stored.finding_type, "Effects/Data Exposure");
    assert_eq!(stored.account_id.as_deref(), Some("123456789012"));
    assert_eq!(
        stored.timestamp,
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    );
}

#[tokio::test]
async fn test_ingest_redelivery_batch_e2e() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let body = fixtures::finding_event("f1", "LOW", "2024-01-01T00:00:00Z").to_string();
    let payload = serde_json::json!({ "Records": [{ "body": body }] });
    let response = server.post("/ingest").json(&payload).await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["stored"], 1);
    assert!(ctx.store.get("f1").await.unwrap().is_some());
}

/// Re-ingesting an id leaves one record and alerts on every call.
#[tokio::test]
async fn test_reingest_is_idempotent() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let event = fixtures::finding_event("f1", "CRITICAL", "2024-01-01T00:00:00Z");
    server.post("/ingest").json(&event).await.assert_status_ok();
    let response = server.post("/ingest").json(&event).await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["stored"], 0);
    assert_eq!(body["updated"], 1);

    assert_eq!(ctx.hot.len(), 1);
    assert_eq!(ctx.processor.alerts().dispatch_count(), 2);
    assert!(ctx.escalation.wait_for(2, ALERT_WAIT).await);
}

/// An older event with a lower severity does not overwrite the stored one.
#[tokio::test]
async fn test_stale_event_keeps_stored_record() {
    let ctx = TestContext::new();
    let server = ctx.server();

    server
        .post("/ingest")
        .json(&fixtures::finding_event("f1", "CRITICAL", "2024-01-05T00:00:00Z"))
        .await
        .assert_status_ok();

    let response = server
        .post("/ingest")
        .json(&fixtures::finding_event("f1", "LOW", "2024-01-03T00:00:00Z"))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["stale"], 1);
    assert_eq!(body["updated"], 0);

    let stored = ctx.store.get("f1").await.unwrap().unwrap();
    assert_eq!(stored.severity, Severity::Critical);
    assert_eq!(
        stored.timestamp,
        Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap()
    );
}

/// One unreadable record body does not sink the rest of a redelivery batch.
#[tokio::test]
async fn test_redelivery_batch_with_unreadable_body_e2e() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let good = |id: &str| fixtures::finding_event(id, "MEDIUM", "2024-01-01T00:00:00Z").to_string();
    let payload = serde_json::json!({
        "Records": [
            { "body": good("r1") },
            { "body": "{truncated" },
            { "messageId": "no-body" },
            { "body": good("r2") },
        ]
    });
    let response = server.post("/ingest").json(&payload).await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], 4);
    assert_eq!(body["stored"], 2);
    let errors = body["errors"].as_array().expect("errors listed");
    let indexes: Vec<u64> = errors.iter().map(|e| e["index"].as_u64().unwrap()).collect();
    assert_eq!(indexes, [1, 2]);

    assert!(ctx.store.get("r1").await.unwrap().is_some());
    assert!(ctx.store.get("r2").await.unwrap().is_some());
}

/// Concurrent ingestions of one id leave a single record stamped with the
/// latest ingestion time.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_of_one_id_keeps_latest() {
    let ctx = TestContext::new();
    let event_time = fixtures::jan_first();

    let mut tasks = tokio::task::JoinSet::new();
    for minute in 0..32 {
        let processor = ctx.processor.clone();
        tasks.spawn(async move {
            processor
                .ingest_at(
                    fixtures::normalized("shared", Severity::Medium, event_time),
                    event_time + Duration::minutes(minute),
                )
                .await
                .unwrap()
        });
    }

    let mut stored = 0;
    while let Some(outcome) = tasks.join_next().await {
        if outcome.unwrap() == IngestOutcome::Stored {
            stored += 1;
        }
    }

    assert_eq!(stored, 1);
    assert_eq!(ctx.hot.len(), 1);
    let record = ctx.store.get("shared").await.unwrap().unwrap();
    assert_eq!(record.ingestion_time, event_time + Duration::minutes(31));
    assert_eq!(
        record.ttl_timestamp,
        event_time + Duration::minutes(31) + Duration::days(90)
    );
}

/// Malformed envelopes are listed; the rest of the batch is stored.
#[tokio::test]
async fn test_malformed_envelopes_rejected_individually() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let findings = vec![
        fixtures::finding_event("ok-1", "HIGH", "2024-01-01T00:00:00Z"),
        serde_json::json!({ "id": "no-resource", "severity": "HIGH", "timestamp": "2024-01-01T00:00:00Z" }),
        fixtures::finding_event("bad-severity", "SEVERE", "2024-01-01T00:00:00Z"),
        fixtures::finding_event("bad-time", "LOW", "yesterday"),
        fixtures::finding_event("ok-2", "LOW", "2024-01-01T00:00:00Z"),
    ];
    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes(fixtures::batch_payload(findings).into())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], 5);
    assert_eq!(body["stored"], 2);

    let errors = body["errors"].as_array().expect("errors listed");
    assert_eq!(errors.len(), 3);
    let indexes: Vec<u64> = errors.iter().map(|e| e["index"].as_u64().unwrap()).collect();
    assert_eq!(indexes, [1, 2, 3]);
    assert_eq!(errors[1]["id"], "bad-severity");

    assert!(ctx.store.get("ok-1").await.unwrap().is_some());
    assert!(ctx.store.get("bad-severity").await.unwrap().is_none());
}

#[tokio::test]
async fn test_min_severity_filters_at_the_adapter() {
    let ctx = TestContext::with_config(PipelineConfig {
        min_severity: Severity::Medium,
        ..test_config()
    });
    let server = ctx.server();

    let findings = vec![
        fixtures::finding_event("low", "LOW", "2024-01-01T00:00:00Z"),
        fixtures::finding_event("info", "INFORMATIONAL", "2024-01-01T00:00:00Z"),
        fixtures::finding_event("high", "HIGH", "2024-01-01T00:00:00Z"),
    ];
    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes(fixtures::array_payload(findings).into())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], 3);
    assert_eq!(body["filtered"], 2);
    assert_eq!(body["stored"], 1);
    assert_eq!(ctx.hot.len(), 1);
}

#[tokio::test]
async fn test_epoch_millis_timestamp_accepted() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let millis = fixtures::jan_first().timestamp_millis() + Duration::hours(6).num_milliseconds();
    let event = serde_json::json!({
        "id": "f-ms",
        "severity": "MEDIUM",
        "resource": "arn:aws:rds:us-east-1:123456789012:db/prod",
        "finding_type": "RDS.PublicAccess",
        "description": "Database is publicly accessible",
        "timestamp": millis
    });
    server.post("/ingest").json(&event).await.assert_status_ok();

    let stored = ctx.store.get("f-ms").await.unwrap().unwrap();
    assert_eq!(
        stored.timestamp,
        Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap()
    );
}
