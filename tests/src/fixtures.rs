//! Test fixtures and finding generators.

use chrono::{DateTime, TimeZone, Utc};
use findings_core::{NormalizedFinding, Severity};
use uuid::Uuid;

/// 2024-01-01T00:00:00Z
pub fn jan_first() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// A canonical finding envelope.
pub fn finding_event(id: &str, severity: &str, timestamp: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "severity": severity,
        "resource": format!("arn:aws:ec2:us-east-1:123456789012:instance/{}", id),
        "finding_type": "Software and Configuration Checks/Vulnerabilities",
        "description": "Instance exposes SSH to 0.0.0.0/0",
        "timestamp": timestamp
    })
}

/// N envelopes of one severity with unique ids.
pub fn finding_events(n: usize, severity: &str) -> Vec<serde_json::Value> {
    (0..n)
        .map(|i| {
            finding_event(
                &format!("finding-{}", Uuid::new_v4()),
                severity,
                &format!("2024-01-01T00:{:02}:00Z", i % 60),
            )
        })
        .collect()
}

/// A provider-native finding as delivered by the security hub.
pub fn provider_finding(id: &str, label: &str) -> serde_json::Value {
    serde_json::json!({
        "Id": id,
        "Severity": { "Label": label },
        "Resources": [{ "Id": "arn:aws:s3:::public-bucket", "Type": "AwsS3Bucket" }],
        "Types": ["Effects/Data Exposure"],
        "Title": "S3 bucket allows public read",
        "Description": "Bucket ACL grants READ to AllUsers",
        "UpdatedAt": "2024-01-02T03:04:05Z",
        "AwsAccountId": "123456789012",
        "Region": "us-east-1"
    })
}

/// Provider event wrapping native findings.
pub fn provider_event(findings: Vec<serde_json::Value>) -> String {
    serde_json::json!({
        "source": "aws.securityhub",
        "detail-type": "Security Hub Findings - Imported",
        "detail": { "findings": findings }
    })
    .to_string()
}

/// Manual batch payload.
pub fn batch_payload(findings: Vec<serde_json::Value>) -> String {
    serde_json::json!({ "findings": findings }).to_string()
}

/// Array payload.
pub fn array_payload(findings: Vec<serde_json::Value>) -> String {
    serde_json::to_string(&findings).unwrap()
}

/// A normalized finding for driving the processor directly.
pub fn normalized(id: &str, severity: Severity, timestamp: DateTime<Utc>) -> NormalizedFinding {
    NormalizedFinding {
        id: id.to_string(),
        severity,
        resource: format!("arn:aws:iam::123456789012:role/{}", id),
        finding_type: "IAM.AdminPolicy".to_string(),
        description: "Role has an administrator policy attached".to_string(),
        timestamp,
        title: None,
        account_id: None,
        region: None,
    }
}
