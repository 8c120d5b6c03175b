//! Wire shapes at the ingestion boundary

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw tracking/CRM event as delivered by the transport
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEventPayload {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub observer_id: Option<String>,
    #[serde(default, rename = "mediahost")]
    pub media_host: Option<String>,
    #[serde(default)]
    pub schema_version: Option<String>,
    /// Client-supplied web visitor id; absent for CRM/data-lake imports
    #[serde(default)]
    pub visid: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub datetime: Option<String>,
    /// Free-form profile traits, keyed by source-specific names
    #[serde(default)]
    pub profile_traits: Map<String, Value>,
}

/// One transport record: an opaque id plus base64-encoded JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRecord {
    #[serde(rename = "recordId")]
    pub record_id: String,
    pub data: String,
}

/// Per-record outcome vocabulary understood by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordResult {
    Ok,
    ProcessingFailed,
}

/// Per-record response; `data` echoes the original payload so failures can be replayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    #[serde(rename = "recordId")]
    pub record_id: String,
    pub result: RecordResult,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordOutcome {
    pub fn ok(record: &IngestRecord) -> Self {
        Self {
            record_id: record.record_id.clone(),
            result: RecordResult::Ok,
            data: record.data.clone(),
            error: None,
        }
    }

    pub fn failed(record: &IngestRecord, error: impl Into<String>) -> Self {
        Self {
            record_id: record.record_id.clone(),
            result: RecordResult::ProcessingFailed,
            data: record.data.clone(),
            error: Some(error.into()),
        }
    }
}
