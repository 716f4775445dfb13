//! Core incident and event types for the status-page watcher
//!
//! This module defines the value types shared by every component: the incidents
//! and components a provider reports, the events published on the bus, and the
//! per-provider summary cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Complete incident state observed at one tick, keyed by incident id
///
/// Ordered so that diffing the same pair of snapshots always walks incidents
/// in the same order.
pub type Snapshot = BTreeMap<String, Incident>;

/// Lifecycle status of an incident
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    #[default]
    Investigating,
    Identified,
    Monitoring,
    Resolved,
    Postmortem,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Identified => "identified",
            IncidentStatus::Monitoring => "monitoring",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Postmortem => "postmortem",
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, IncidentStatus::Resolved)
    }
}

/// Severity level of an incident
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum IncidentImpact {
    #[default]
    None,
    Minor,
    Major,
    Critical,
}

impl IncidentImpact {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentImpact::None => "none",
            IncidentImpact::Minor => "minor",
            IncidentImpact::Major => "major",
            IncidentImpact::Critical => "critical",
        }
    }
}

/// Possible statuses for a service component
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatusValue {
    #[default]
    Operational,
    DegradedPerformance,
    PartialOutage,
    MajorOutage,
    UnderMaintenance,
}

/// A single service component (e.g. "Chat Completions")
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentStatus {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: ComponentStatusValue,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

/// One timeline entry within an incident
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentUpdate {
    pub id: String,
    #[serde(default)]
    pub status: IncidentStatus,
    /// Update text; an absent or null body reads as empty
    #[serde(default, deserialize_with = "null_as_empty")]
    pub body: String,
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

/// A full incident with all of its timeline updates
///
/// A changed incident is represented by a new value on the next fetch; values
/// are never mutated in place once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: IncidentStatus,
    #[serde(default)]
    pub impact: IncidentImpact,
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub resolved_at: Option<Timestamp>,
    /// Timeline entries in feed order; append-only across fetches
    #[serde(rename = "incident_updates", default)]
    pub updates: Vec<IncidentUpdate>,
}

impl Incident {
    pub fn is_active(&self) -> bool {
        !self.status.is_resolved()
    }

    /// Most recent timeline entry by creation time
    pub fn latest_update(&self) -> Option<&IncidentUpdate> {
        self.updates.iter().max_by_key(|update| update.created_at)
    }
}

/// Classification of a detected incident change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Incident id seen for the first time
    NewIncident,
    /// Existing incident gained at least one new timeline entry
    IncidentUpdate,
    /// Incident moved from a non-resolved status to resolved
    Resolved,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NewIncident => "new_incident",
            EventType::IncidentUpdate => "incident_update",
            EventType::Resolved => "resolved",
        }
    }
}

/// The canonical fact published on the event bus for every detected change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEvent {
    /// Name of the provider the incident belongs to
    pub provider: String,
    /// Full incident state at detection time (not a delta)
    pub incident: Incident,
    pub event_type: EventType,
    /// When the poller detected the change
    pub detected_at: Timestamp,
}

impl StatusEvent {
    pub fn new(
        provider: impl Into<String>,
        incident: Incident,
        event_type: EventType,
        detected_at: Timestamp,
    ) -> Self {
        Self {
            provider: provider.into(),
            incident,
            event_type,
            detected_at,
        }
    }

    pub fn latest_update(&self) -> Option<&IncidentUpdate> {
        self.incident.latest_update()
    }
}

/// Point-in-time status snapshot for a single provider
///
/// Owned by one poller, replaced wholesale on each successful summary fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSummary {
    pub provider: String,
    pub status_description: String,
    pub components: Vec<ComponentStatus>,
    /// Non-resolved incidents from the latest snapshot
    pub active_incidents: Vec<Incident>,
    pub last_checked: Timestamp,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}
