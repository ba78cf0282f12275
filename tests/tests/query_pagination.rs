//! Query service tests over HTTP: ordering, cursor pagination, parameter
//! validation and store outages.

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;

use findings_core::Severity;
use findings_store::InMemoryFindingsStore;
use integration_tests::{
    fixtures,
    mocks::FlakyStore,
    setup::{test_config, TestContext},
};

async fn seed(ctx: &TestContext, id: &str, severity: Severity, minutes: i64) {
    let timestamp = fixtures::jan_first() + Duration::minutes(minutes);
    ctx.processor
        .ingest(fixtures::normalized(id, severity, timestamp))
        .await
        .unwrap();
}

async fn list(server: &TestServer, params: &[(&str, &str)]) -> serde_json::Value {
    let mut request = server.get("/findings");
    for (key, value) in params {
        request = request.add_query_param(key, value);
    }
    let response = request.await;
    response.assert_status_ok();
    response.json()
}

fn ids(body: &serde_json::Value) -> Vec<String> {
    body["data"]
        .as_array()
        .expect("data is a list")
        .iter()
        .map(|f| f["id"].as_str().unwrap().to_string())
        .collect()
}

/// limit=2 over 5 HIGH findings, then the cursor returns the other 3.
#[tokio::test]
async fn test_cursor_pagination_over_high_findings() {
    let ctx = TestContext::new();
    let server = ctx.server();
    for i in 0..5 {
        seed(&ctx, &format!("h{}", i), Severity::High, i).await;
    }

    let first = list(&server, &[("severity", "HIGH"), ("limit", "2")]).await;
    assert_eq!(first["count"], 2);
    // Newest first within a severity
    assert_eq!(ids(&first), ["h4", "h3"]);
    let cursor = first["next_cursor"]
        .as_str()
        .expect("more results follow")
        .to_string();
    assert!(!cursor.is_empty());

    let second = list(&server, &[("severity", "HIGH"), ("cursor", &cursor)]).await;
    assert_eq!(ids(&second), ["h2", "h1", "h0"]);
    assert!(second.get("next_cursor").is_none());
}

/// Walking every page yields each ACTIVE finding exactly once, most severe
/// first.
#[tokio::test]
async fn test_pagination_is_complete_across_severities() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let severities = [
        Severity::Low,
        Severity::Critical,
        Severity::Medium,
        Severity::High,
        Severity::Informational,
    ];
    for i in 0..23 {
        seed(&ctx, &format!("f{:02}", i), severities[i % 5], (i % 4) as i64).await;
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;
    loop {
        let mut params = vec![("limit", "4".to_string())];
        if let Some(c) = &cursor {
            params.push(("cursor", c.clone()));
        }
        let params: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let body = list(&server, &params).await;

        for finding in body["data"].as_array().unwrap() {
            seen.push((
                finding["severity"].as_str().unwrap().to_string(),
                finding["id"].as_str().unwrap().to_string(),
            ));
        }
        pages += 1;
        match body["next_cursor"].as_str() {
            Some(next) => cursor = Some(next.to_string()),
            None => break,
        }
        assert!(pages < 20, "pagination did not terminate");
    }

    assert_eq!(pages, 6);
    assert_eq!(seen.len(), 23);
    let unique: HashSet<&String> = seen.iter().map(|(_, id)| id).collect();
    assert_eq!(unique.len(), 23);

    let ranks: Vec<u8> = seen
        .iter()
        .map(|(s, _)| s.parse::<Severity>().unwrap().rank())
        .collect();
    assert!(ranks.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_limit_is_clamped_to_maximum() {
    let ctx = TestContext::new();
    let server = ctx.server();
    for i in 0..3 {
        seed(&ctx, &format!("f{}", i), Severity::Medium, i).await;
    }

    let body = list(&server, &[("limit", "100000")]).await;
    assert_eq!(body["count"], 3);
}

#[tokio::test]
async fn test_bad_parameters_are_rejected() {
    let ctx = TestContext::new();
    let server = ctx.server();

    for (key, value) in [
        ("severity", "SEVERE"),
        ("status", "DELETED"),
        ("limit", "0"),
        ("limit", "-1"),
        ("limit", "lots"),
        ("cursor", "not-a-cursor"),
    ] {
        let response = server.get("/findings").add_query_param(key, value).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json();
        assert_eq!(body["code"], "QUERY_001", "{}={}", key, value);
        assert_eq!(body["success"], false);
    }
}

/// A limit past the integer range is clamped, not rejected.
#[tokio::test]
async fn test_huge_limit_is_clamped() {
    let ctx = TestContext::new();
    let server = ctx.server();
    for i in 0..3 {
        seed(&ctx, &format!("m{}", i), Severity::Medium, i).await;
    }

    let body = list(&server, &[("limit", "99999999999999999999")]).await;
    assert_eq!(body["count"], 3);
    assert!(body.get("next_cursor").is_none());
}

#[tokio::test]
async fn test_unknown_finding_is_not_found() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server.get("/findings/does-not-exist").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "QUERY_002");
}

#[tokio::test]
async fn test_summary_counts_active_findings() {
    let ctx = TestContext::new();
    let server = ctx.server();
    seed(&ctx, "c1", Severity::Critical, 0).await;
    seed(&ctx, "c2", Severity::Critical, 1).await;
    seed(&ctx, "m1", Severity::Medium, 2).await;

    let response = server.get("/findings/summary").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["data"]["total_findings"], 3);
    assert_eq!(body["data"]["severity_breakdown"]["CRITICAL"], 2);
    assert_eq!(body["data"]["severity_breakdown"]["MEDIUM"], 1);
    assert_eq!(body["data"]["severity_breakdown"]["LOW"], 0);
}

/// A store outage is a retryable 503, never a partial page.
#[tokio::test]
async fn test_store_outage_is_retryable() {
    let hot = Arc::new(InMemoryFindingsStore::new());
    let flaky = FlakyStore::new(hot.clone());
    let ctx = TestContext::with_stores(test_config(), hot, flaky.clone(), None);
    let server = ctx.server();
    seed(&ctx, "f1", Severity::High, 0).await;

    flaky.fail_reads();
    let response = server.get("/findings").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok()),
        Some("1")
    );
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "STORE_001");
    assert!(body.get("data").is_none());

    flaky.heal();
    let body = list(&server, &[]).await;
    assert_eq!(ids(&body), ["f1"]);
}
