//! Parsing of status-page JSON documents
//!
//! Entries are decoded one at a time so a single malformed incident or
//! component is skipped and logged without discarding the rest of the payload.

use crate::error::FeedError;
use crate::events::{ComponentStatus, Incident, Snapshot};
use log::warn;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct IncidentsDocument {
    #[serde(default)]
    incidents: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SummaryDocument {
    #[serde(default)]
    components: Vec<Value>,
    #[serde(default)]
    status: Option<PageStatus>,
}

#[derive(Debug, Deserialize)]
struct PageStatus {
    #[serde(default)]
    description: Option<String>,
}

/// Provider-wide metadata decoded from the summary document
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSummary {
    pub status_description: String,
    pub components: Vec<ComponentStatus>,
}

/// Decode the incidents document into a snapshot keyed by incident id
///
/// Fails when the body is not JSON or does not have the document's shape;
/// individual incidents that fail to decode are skipped.
pub fn parse_incidents(provider: &str, body: &[u8]) -> Result<Snapshot, FeedError> {
    let document: IncidentsDocument = decode_document(body)?;

    let mut snapshot = Snapshot::new();
    for raw in document.incidents {
        let id = entry_id(&raw);
        match serde_json::from_value::<Incident>(raw) {
            Ok(incident) => {
                snapshot.insert(incident.id.clone(), incident);
            }
            Err(e) => warn!("[{}] Skipping malformed incident {}: {}", provider, id, e),
        }
    }

    Ok(snapshot)
}

/// Decode the summary document
pub fn parse_summary(provider: &str, body: &[u8]) -> Result<ParsedSummary, FeedError> {
    let document: SummaryDocument = decode_document(body)?;

    let components = document
        .components
        .into_iter()
        .filter_map(|raw| {
            let id = entry_id(&raw);
            serde_json::from_value::<ComponentStatus>(raw)
                .map_err(|e| warn!("[{}] Skipping malformed component {}: {}", provider, id, e))
                .ok()
        })
        .collect();

    let status_description = document
        .status
        .and_then(|status| status.description)
        .unwrap_or_else(|| "Unknown".to_string());

    Ok(ParsedSummary {
        status_description,
        components,
    })
}

fn decode_document<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, FeedError> {
    let value: Value = serde_json::from_slice(body)?;
    serde_json::from_value(value).map_err(|e| FeedError::InvalidPayload(e.to_string()))
}

fn entry_id(raw: &Value) -> String {
    raw.get("id")
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string()
}
