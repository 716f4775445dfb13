//! Incident snapshot diffing
//!
//! Compares the previous snapshot of a provider's incidents with the current one
//! and classifies every lifecycle change as a [`StatusEvent`]. The engine holds no
//! state of its own: the caller owns both snapshots and the [`KnownUpdates`]
//! ledger and feeds them back in on the next tick.
//!
//! Changes are keyed on update identity. An existing update whose body text is
//! edited in place, without a new update id appearing, is not reported.

use crate::events::{EventType, Snapshot, StatusEvent, Timestamp};
use std::collections::{BTreeMap, BTreeSet};

/// Update ids already reported, per incident
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownUpdates {
    by_incident: BTreeMap<String, BTreeSet<String>>,
}

impl KnownUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat every update already present in `snapshot` as known
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let by_incident = snapshot
            .iter()
            .map(|(id, incident)| {
                let ids = incident.updates.iter().map(|u| u.id.clone()).collect();
                (id.clone(), ids)
            })
            .collect();
        Self { by_incident }
    }

    pub fn is_known(&self, incident_id: &str, update_id: &str) -> bool {
        self.by_incident
            .get(incident_id)
            .is_some_and(|ids| ids.contains(update_id))
    }

    /// Number of incidents tracked by the ledger
    pub fn incident_count(&self) -> usize {
        self.by_incident.len()
    }
}

/// Result of diffing two snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct DiffOutcome {
    /// Events in emission order
    pub events: Vec<StatusEvent>,
    /// Ledger to pass into the next diff, covering exactly the current incidents
    pub known: KnownUpdates,
}

/// Diff `previous` against `current` for one provider
///
/// Rules are applied in three passes so the output order depends only on the
/// inputs:
/// 1. every incident id absent from `previous` yields `new_incident`;
/// 2. every incident present in both that carries update ids not yet in `known`
///    yields exactly one `incident_update` with the full current incident;
/// 3. every incident that was not resolved in `previous` and is resolved in
///    `current` yields `resolved`, in addition to any event from pass 2.
///
/// Incidents that disappear from `current` produce nothing.
pub fn diff(
    provider: &str,
    previous: &Snapshot,
    current: &Snapshot,
    known: &KnownUpdates,
    now: Timestamp,
) -> DiffOutcome {
    let mut events = Vec::new();
    let mut next_known = KnownUpdates::new();

    for (id, incident) in current {
        if !previous.contains_key(id) {
            events.push(StatusEvent::new(
                provider,
                incident.clone(),
                EventType::NewIncident,
                now,
            ));
        }
    }

    for (id, incident) in current {
        let mut ids: BTreeSet<String> = if previous.contains_key(id) {
            known.by_incident.get(id).cloned().unwrap_or_default()
        } else {
            BTreeSet::new()
        };

        let mut has_new_updates = false;
        for update in &incident.updates {
            if ids.insert(update.id.clone()) {
                has_new_updates = true;
            }
        }

        if has_new_updates && previous.contains_key(id) {
            events.push(StatusEvent::new(
                provider,
                incident.clone(),
                EventType::IncidentUpdate,
                now,
            ));
        }

        next_known.by_incident.insert(id.clone(), ids);
    }

    for (id, old) in previous {
        if let Some(incident) = current.get(id) {
            if !old.status.is_resolved() && incident.status.is_resolved() {
                events.push(StatusEvent::new(
                    provider,
                    incident.clone(),
                    EventType::Resolved,
                    now,
                ));
            }
        }
    }

    DiffOutcome {
        events,
        known: next_known,
    }
}

/// Diff two snapshots, treating every update in `previous` as already known
pub fn diff_snapshots(
    provider: &str,
    previous: &Snapshot,
    current: &Snapshot,
    now: Timestamp,
) -> Vec<StatusEvent> {
    diff(
        provider,
        previous,
        current,
        &KnownUpdates::from_snapshot(previous),
        now,
    )
    .events
}



// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::test_support::incident;
    use super::*;
    use crate::events::IncidentStatus;
    use chrono::{TimeZone, Utc};
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    const INCIDENT_IDS: [&str; 6] = ["INC0", "INC1", "INC2", "INC3", "INC4", "INC5"];
    const UPDATE_IDS: [&str; 6] = ["U0", "U1", "U2", "U3", "U4", "U5"];
    const STATUSES: [IncidentStatus; 5] = [
        IncidentStatus::Investigating,
        IncidentStatus::Identified,
        IncidentStatus::Monitoring,
        IncidentStatus::Resolved,
        IncidentStatus::Postmortem,
    ];

    /// A previous snapshot and a plausible successor: incidents may appear,
    /// disappear, gain updates and change status, but never lose updates.
    #[derive(Debug, Clone)]
    struct SnapshotPair {
        previous: Snapshot,
        current: Snapshot,
    }

    impl Arbitrary for SnapshotPair {
        fn arbitrary(g: &mut Gen) -> Self {
            let mut previous = Snapshot::new();
            let mut current = Snapshot::new();

            for id in INCIDENT_IDS {
                let in_previous = bool::arbitrary(g);
                let in_current = u8::arbitrary(g) % 4 != 0;
                let before = usize::arbitrary(g) % UPDATE_IDS.len();
                let after = before + usize::arbitrary(g) % (UPDATE_IDS.len() - before + 1);
                let old_status = *g.choose(&STATUSES).unwrap();
                let new_status = if bool::arbitrary(g) {
                    old_status
                } else {
                    *g.choose(&STATUSES).unwrap()
                };

                if in_previous {
                    previous.insert(
                        id.to_string(),
                        incident(id, old_status, &UPDATE_IDS[..before]),
                    );
                }
                if in_current {
                    let count = if in_previous { after } else { before };
                    current.insert(
                        id.to_string(),
                        incident(id, new_status, &UPDATE_IDS[..count]),
                    );
                }
            }

            SnapshotPair { previous, current }
        }
    }

    fn fixed_now() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    #[quickcheck]
    fn prop_identical_snapshots_are_silent(pair: SnapshotPair) -> bool {
        diff_snapshots("P", &pair.current, &pair.current, fixed_now()).is_empty()
    }

    #[quickcheck]
    fn prop_diff_is_deterministic(pair: SnapshotPair) -> bool {
        let first = diff_snapshots("P", &pair.previous, &pair.current, fixed_now());
        let second = diff_snapshots("P", &pair.previous, &pair.current, fixed_now());
        first == second
    }

    #[quickcheck]
    fn prop_new_incident_exactly_once_and_first(pair: SnapshotPair) -> bool {
        let events = diff_snapshots("P", &pair.previous, &pair.current, fixed_now());

        pair.current
            .keys()
            .filter(|id| !pair.previous.contains_key(*id))
            .all(|id| {
                let for_id: Vec<_> = events.iter().filter(|e| &e.incident.id == id).collect();
                for_id.len() == 1 && for_id[0].event_type == EventType::NewIncident
            })
    }

    #[quickcheck]
    fn prop_resolution_reported_exactly_once(pair: SnapshotPair) -> bool {
        let events = diff_snapshots("P", &pair.previous, &pair.current, fixed_now());

        pair.current.iter().all(|(id, incident)| {
            let resolved = events
                .iter()
                .filter(|e| &e.incident.id == id && e.event_type == EventType::Resolved)
                .count();
            let transitioned = pair
                .previous
                .get(id)
                .is_some_and(|old| !old.status.is_resolved() && incident.status.is_resolved());
            resolved == usize::from(transitioned)
        })
    }

    #[quickcheck]
    fn prop_at_most_one_update_event_per_incident(pair: SnapshotPair) -> bool {
        let events = diff_snapshots("P", &pair.previous, &pair.current, fixed_now());

        pair.current.keys().all(|id| {
            events
                .iter()
                .filter(|e| &e.incident.id == id && e.event_type == EventType::IncidentUpdate)
                .count()
                <= 1
        })
    }

    #[quickcheck]
    fn prop_replaying_outcome_is_silent(pair: SnapshotPair) -> bool {
        let first = diff(
            "P",
            &pair.previous,
            &pair.current,
            &KnownUpdates::from_snapshot(&pair.previous),
            fixed_now(),
        );
        let second = diff("P", &pair.current, &pair.current, &first.known, fixed_now());
        second.events.is_empty()
    }
}
