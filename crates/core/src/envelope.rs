//! Event source adapter: inbound envelope parsing, validation and
//! normalization.
//!
//! Accepts findings in 5 shapes:
//! 1. Single envelope: `{ "id": "...", "severity": "...", ... }`
//! 2. Array: `[envelope, envelope, ...]`
//! 3. Manual batch: `{ "findings": [...] }`
//! 4. Provider event: `{ "source": "...", "detail": { "findings": [...] } }`
//! 5. Redelivery batch: `{ "Records": [{ "body": "<json>" }] }`
//!
//! Provider-native findings (`Id`, `Severity.Label`, `Resources[0].Id`, ...)
//! are mapped onto the canonical envelope before validation. A malformed
//! envelope is rejected on its own; the rest of the batch continues.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use validator::Validate;

use crate::error::{Error, Result};
use crate::finding::{NormalizedFinding, Severity};
use crate::limits::{MAX_BATCH_ENVELOPES, MAX_PAYLOAD_BYTES};

/// Canonical inbound envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FindingEnvelope {
    #[validate(length(min = 1, max = 256))]
    pub id: String,
    pub severity: String,
    #[validate(length(min = 1, max = 2048))]
    pub resource: String,
    #[serde(default)]
    #[validate(length(max = 512))]
    pub finding_type: String,
    #[serde(default)]
    #[validate(length(max = 16384))]
    pub description: String,
    pub timestamp: TimestampInput,
    #[serde(default)]
    #[validate(length(max = 512))]
    pub title: Option<String>,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub account_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub region: Option<String>,
}

/// Event time as sent by the source: RFC 3339 text or epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampInput {
    Millis(i64),
    Text(String),
}

impl TimestampInput {
    pub fn parse(&self) -> Result<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .ok_or_else(|| Error::validation(format!("timestamp {} out of range", ms))),
            Self::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::validation(format!("invalid timestamp '{}': {}", text, e))),
        }
    }
}

impl FindingEnvelope {
    /// Validate and convert into a normalized finding.
    pub fn normalize(mut self) -> Result<NormalizedFinding> {
        // Length bounds apply to the id as stored
        self.id = self.id.trim().to_string();
        self.validate()
            .map_err(|e| Error::validation(format_validation_errors(&e)))?;

        let severity: Severity = self.severity.parse()?;
        let timestamp = self.timestamp.parse()?;

        Ok(NormalizedFinding {
            id: self.id,
            severity,
            resource: self.resource,
            finding_type: self.finding_type,
            description: self.description,
            timestamp,
            title: self.title,
            account_id: self.account_id,
            region: self.region,
        })
    }
}

fn format_validation_errors(errors: &validator::ValidationErrors) -> String {
    let mut fields: Vec<String> = errors
        .field_errors()
        .iter()
        .map(|(field, errs)| {
            let codes: Vec<&str> = errs.iter().map(|e| e.code.as_ref()).collect();
            format!("{}: {}", field, codes.join(","))
        })
        .collect();
    fields.sort();
    fields.join("; ")
}

/// An envelope that failed validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    /// Position of the envelope in the inbound batch
    pub index: usize,
    /// Finding id, when one could be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub reason: String,
}

/// Output of adapting one inbound payload.
#[derive(Debug, Default)]
pub struct AdaptedBatch {
    pub findings: Vec<NormalizedFinding>,
    pub rejected: Vec<Rejection>,
    /// Valid findings dropped for being below the minimum severity
    pub filtered: usize,
}

impl AdaptedBatch {
    pub fn total(&self) -> usize {
        self.findings.len() + self.rejected.len() + self.filtered
    }
}

/// Validates and normalizes inbound finding events.
#[derive(Debug, Clone)]
pub struct EventSourceAdapter {
    min_severity: Severity,
}

impl Default for EventSourceAdapter {
    fn default() -> Self {
        Self::new(Severity::Informational)
    }
}

impl EventSourceAdapter {
    pub fn new(min_severity: Severity) -> Self {
        Self { min_severity }
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    /// Adapt a raw payload.
    ///
    /// Only payload-level problems (oversized, not JSON, unknown shape, too
    /// many envelopes) fail the call. Individual bad envelopes are rejected
    /// and logged.
    pub fn adapt(&self, payload: &[u8]) -> Result<AdaptedBatch> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(Error::validation(format!(
                "payload size {}KB exceeds {}KB limit",
                payload.len() / 1024,
                MAX_PAYLOAD_BYTES / 1024
            )));
        }

        let value: Value = serde_json::from_slice(payload)?;
        self.adapt_value(value)
    }

    /// Adapt an already-parsed payload.
    pub fn adapt_value(&self, value: Value) -> Result<AdaptedBatch> {
        let envelopes = unwrap_envelopes(value, true)?;

        if envelopes.len() > MAX_BATCH_ENVELOPES {
            return Err(Error::validation(format!(
                "batch has {} findings, exceeds {} limit",
                envelopes.len(),
                MAX_BATCH_ENVELOPES
            )));
        }

        let mut batch = AdaptedBatch::default();

        for (index, entry) in envelopes.into_iter().enumerate() {
            let id = entry.as_ref().ok().and_then(peek_id);
            match entry.and_then(|raw| self.normalize_one(raw)) {
                Ok(finding) if finding.severity < self.min_severity => {
                    debug!(
                        finding_id = %finding.id,
                        severity = %finding.severity,
                        min_severity = %self.min_severity,
                        "Finding below minimum severity, filtered"
                    );
                    batch.filtered += 1;
                }
                Ok(finding) => batch.findings.push(finding),
                Err(e) => {
                    warn!(
                        index = index,
                        finding_id = id.as_deref().unwrap_or("unknown"),
                        error = %e,
                        "Rejected malformed finding envelope"
                    );
                    batch.rejected.push(Rejection {
                        index,
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(batch)
    }

    fn normalize_one(&self, raw: Value) -> Result<NormalizedFinding> {
        let canonical = if is_provider_native(&raw) {
            from_provider_native(raw)?
        } else {
            raw
        };

        let envelope: FindingEnvelope = serde_json::from_value(canonical)
            .map_err(|e| Error::validation(e.to_string()))?;
        envelope.normalize()
    }
}

/// One flattened entry: a raw envelope, or the reason a redelivered record
/// could not yield one.
type RawEntry = Result<Value>;

/// Flatten any accepted payload shape into a list of raw envelopes.
fn unwrap_envelopes(value: Value, allow_records: bool) -> Result<Vec<RawEntry>> {
    match value {
        Value::Array(items) => Ok(items.into_iter().map(Ok).collect()),
        Value::Object(mut map) => {
            if allow_records {
                if let Some(Value::Array(records)) = map.remove("Records") {
                    return Ok(unwrap_records(records));
                }
            }
            if let Some(Value::Array(findings)) = map.remove("findings") {
                return Ok(findings.into_iter().map(Ok).collect());
            }
            if let Some(Value::Object(mut detail)) = map.remove("detail") {
                return match detail.remove("findings") {
                    Some(Value::Array(findings)) => Ok(findings.into_iter().map(Ok).collect()),
                    _ => Ok(Vec::new()),
                };
            }
            Ok(vec![Ok(Value::Object(map))])
        }
        _ => Err(Error::validation(
            "payload must be a finding object, an array, or a findings batch",
        )),
    }
}

/// Unwrap redelivered records. A record whose body cannot be read becomes a
/// single failed entry; the remaining records are still adapted.
fn unwrap_records(records: Vec<Value>) -> Vec<RawEntry> {
    let mut out = Vec::new();
    for (position, record) in records.into_iter().enumerate() {
        let body = match record.get("body") {
            Some(Value::String(body)) => serde_json::from_str::<Value>(body).map_err(|e| {
                Error::validation(format!("record {} body is not JSON: {}", position, e))
            }),
            Some(other) => Ok(other.clone()),
            None => Err(Error::validation(format!("record {} has no body", position))),
        };
        match body.and_then(|body| unwrap_envelopes(body, false)) {
            Ok(entries) => out.extend(entries),
            Err(e) => out.push(Err(e)),
        }
    }
    out
}

fn peek_id(raw: &Value) -> Option<String> {
    raw.get("id")
        .or_else(|| raw.get("Id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn is_provider_native(raw: &Value) -> bool {
    raw.get("Id").is_some() && raw.get("id").is_none()
}

/// Map a provider-native finding onto the canonical envelope fields.
fn from_provider_native(raw: Value) -> Result<Value> {
    let Value::Object(src) = raw else {
        return Err(Error::validation("finding must be a JSON object"));
    };

    let mut out = Map::new();
    copy_field(&src, &mut out, "Id", "id");
    if let Some(label) = src.get("Severity").and_then(|s| s.get("Label")) {
        out.insert("severity".into(), label.clone());
    }
    if let Some(resource) = src
        .get("Resources")
        .and_then(|r| r.get(0))
        .and_then(|r| r.get("Id"))
    {
        out.insert("resource".into(), resource.clone());
    }
    match src.get("Types").and_then(|t| t.get(0)) {
        Some(kind) => {
            out.insert("finding_type".into(), kind.clone());
        }
        None => {
            if let Some(kind) = src
                .get("Resources")
                .and_then(|r| r.get(0))
                .and_then(|r| r.get("Type"))
            {
                out.insert("finding_type".into(), kind.clone());
            }
        }
    }
    copy_field(&src, &mut out, "Description", "description");
    copy_field(&src, &mut out, "Title", "title");
    copy_field(&src, &mut out, "AwsAccountId", "account_id");
    copy_field(&src, &mut out, "Region", "region");
    if let Some(ts) = src.get("UpdatedAt").or_else(|| src.get("CreatedAt")) {
        out.insert("timestamp".into(), ts.clone());
    }

    Ok(Value::Object(out))
}

fn copy_field(src: &Map<String, Value>, out: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = src.get(from) {
        if !value.is_null() {
            out.insert(to.to_string(), value.clone());
        }
    }
}
