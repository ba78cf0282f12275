//! Opaque pagination cursors.
//!
//! A cursor is the sort key of the last item returned, serialized as JSON and
//! hex encoded. Decoding validates every field, so a tampered or truncated
//! cursor is rejected as an invalid query rather than misread.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::cmp::Reverse;

use findings_core::limits::{MAX_CURSOR_LEN, MAX_FINDING_ID_LEN};
use findings_core::{Error, Finding, Result, Severity};

/// Position in a `(severity desc, timestamp desc, id asc)` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    #[serde(rename = "s")]
    pub severity_rank: u8,
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
    #[serde(rename = "i")]
    pub id: String,
}

/// Ordering key of the severity index.
pub(crate) type SeverityKey = (Reverse<u8>, Reverse<i64>, String);

impl PageCursor {
    pub fn after(finding: &Finding) -> Self {
        Self {
            severity_rank: finding.severity.rank(),
            timestamp_ms: finding.timestamp.timestamp_millis(),
            id: finding.id.clone(),
        }
    }

    pub fn severity(&self) -> Option<Severity> {
        Severity::from_rank(self.severity_rank)
    }

    pub(crate) fn index_key(&self) -> SeverityKey {
        (
            Reverse(self.severity_rank),
            Reverse(self.timestamp_ms),
            self.id.clone(),
        )
    }

    pub fn encode(&self) -> String {
        encode_token(self)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let cursor: Self = decode_token(token)?;
        if cursor.severity().is_none() {
            return Err(Error::invalid_query("cursor carries an unknown severity"));
        }
        validate_id(&cursor.id)?;
        Ok(cursor)
    }
}

/// Position in a `(ttl asc, id asc)` listing. Held by the archival worker as
/// its sweep checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryCursor {
    #[serde(rename = "x")]
    pub ttl_ms: i64,
    #[serde(rename = "i")]
    pub id: String,
}

impl ExpiryCursor {
    pub fn after(finding: &Finding) -> Self {
        Self {
            ttl_ms: finding.ttl_timestamp.timestamp_millis(),
            id: finding.id.clone(),
        }
    }

    pub fn encode(&self) -> String {
        encode_token(self)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let cursor: Self = decode_token(token)?;
        validate_id(&cursor.id)?;
        Ok(cursor)
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.chars().count() > MAX_FINDING_ID_LEN {
        return Err(Error::invalid_query("cursor carries an invalid id"));
    }
    Ok(())
}

fn encode_token<T: Serialize>(value: &T) -> String {
    // Serializing a struct of plain fields cannot fail.
    let json = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(json)
}

fn decode_token<T: DeserializeOwned>(token: &str) -> Result<T> {
    if token.is_empty() || token.len() > MAX_CURSOR_LEN {
        return Err(Error::invalid_query(format!(
            "cursor must be 1-{} characters",
            MAX_CURSOR_LEN
        )));
    }
    let bytes = hex::decode(token)
        .map_err(|e| Error::invalid_query(format!("cursor is not valid: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|_| Error::invalid_query("cursor is not valid"))
}
