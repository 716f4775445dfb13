//! Per-provider polling loop
//!
//! A [`StatusPoller`] owns all fetch state for one provider and is driven by a
//! single task. Other tasks observe it through a cloneable [`PollerHandle`].

use crate::bus::EventBus;
use crate::config::ProviderConfig;
use crate::diff::{diff, DiffOutcome, KnownUpdates};
use crate::error::{panic_message, FeedError};
use crate::events::{EventType, Snapshot, StatusEvent, StatusSummary, Timestamp};
use crate::poller::feed::{CacheValidators, FeedFuture, IncidentsResponse, StatusFeed};
use crate::poller::parse::{parse_incidents, parse_summary};
use chrono::Utc;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

/// Lifecycle phase of a provider poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollerPhase {
    /// Created but the loop has not started
    Idle,
    Fetching,
    /// Last tick saw no change or failed
    Unchanged,
    /// Last tick parsed a new snapshot
    Changed,
    Sleeping,
    Stopped,
}

impl PollerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollerPhase::Idle => "idle",
            PollerPhase::Fetching => "fetching",
            PollerPhase::Unchanged => "unchanged",
            PollerPhase::Changed => "changed",
            PollerPhase::Sleeping => "sleeping",
            PollerPhase::Stopped => "stopped",
        }
    }
}

/// Counters accumulated over a poller's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub ticks: u64,
    pub failed_ticks: u64,
    /// Ticks short-circuited by a 304 or an unchanged body hash
    pub unchanged_ticks: u64,
    pub events_published: u64,
}

/// Outcome of a single successful tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Server answered 304
    NotModified,
    /// Body hash matched the previous fetch
    Unchanged,
    /// New snapshot parsed; `events` were published in this order
    Changed { events: Vec<StatusEvent> },
}

/// State shared between a poller's loop and its handles
#[derive(Debug)]
struct PollerShared {
    provider: String,
    summary: RwLock<Option<StatusSummary>>,
    phase: Mutex<PollerPhase>,
    stop_requested: AtomicBool,
    wake: Notify,
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    unchanged_ticks: AtomicU64,
    events_published: AtomicU64,
}

impl PollerShared {
    fn new(provider: String) -> Self {
        Self {
            provider,
            summary: RwLock::new(None),
            phase: Mutex::new(PollerPhase::Idle),
            stop_requested: AtomicBool::new(false),
            wake: Notify::new(),
            ticks: AtomicU64::new(0),
            failed_ticks: AtomicU64::new(0),
            unchanged_ticks: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
        }
    }

    fn set_phase(&self, phase: PollerPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// Cheap, cloneable view of a running poller
///
/// Handles read the cached summary and lifecycle state and can request a
/// graceful stop. They never touch the per-tick fetch state, which belongs to
/// the poller's own task.
#[derive(Debug, Clone)]
pub struct PollerHandle {
    shared: Arc<PollerShared>,
}

impl PollerHandle {
    pub fn provider(&self) -> &str {
        &self.shared.provider
    }

    /// Latest cached summary, `None` until the first successful summary fetch
    pub fn summary(&self) -> Option<StatusSummary> {
        self.shared
            .summary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn phase(&self) -> PollerPhase {
        *self.shared.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> PollerStats {
        PollerStats {
            ticks: self.shared.ticks.load(Ordering::Relaxed),
            failed_ticks: self.shared.failed_ticks.load(Ordering::Relaxed),
            unchanged_ticks: self.shared.unchanged_ticks.load(Ordering::Relaxed),
            events_published: self.shared.events_published.load(Ordering::Relaxed),
        }
    }

    /// Request a graceful stop
    ///
    /// Observed before the next tick starts. A sleeping poller wakes up
    /// immediately; a tick already in flight runs to completion.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.is_stop_requested()
    }
}

/// Polls one provider's status feed and publishes detected incident changes
///
/// Each tick performs a conditional fetch of the incidents document, skips work
/// when the server answers 304 or the body hash is unchanged, diffs the parsed
/// snapshot against the previous one and publishes the resulting events to the
/// bus. After a changed tick the provider summary is refreshed.
///
/// Fetch state (validators, body hash, snapshot and known update ids) is only
/// committed once a tick has parsed and published successfully, so an aborted
/// or failed tick leaves the poller exactly as it was.
pub struct StatusPoller {
    config: ProviderConfig,
    bus: EventBus,
    request_timeout: Duration,
    shared: Arc<PollerShared>,
    validators: CacheValidators,
    last_hash: Option<[u8; 32]>,
    snapshot: Snapshot,
    known: KnownUpdates,
    last_detected: Option<Timestamp>,
}

impl StatusPoller {
    /// Create a poller that has not fetched anything yet
    ///
    /// # Arguments
    ///
    /// * `config` - Provider name, base URL and poll interval
    /// * `bus` - Bus that receives every detected event
    /// * `request_timeout` - Upper bound on each feed call made during a tick
    pub fn new(config: ProviderConfig, bus: EventBus, request_timeout: Duration) -> Self {
        let shared = Arc::new(PollerShared::new(config.name.clone()));
        Self {
            config,
            bus,
            request_timeout,
            shared,
            validators: CacheValidators::default(),
            last_hash: None,
            snapshot: Snapshot::new(),
            known: KnownUpdates::new(),
            last_detected: None,
        }
    }

    /// Cloneable view of this poller's phase, stats and summary
    ///
    /// Handles stay valid after the poller has been moved into its task.
    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn validators(&self) -> &CacheValidators {
        &self.validators
    }

    /// Snapshot committed by the last changed tick
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Run the polling loop until a stop is requested
    ///
    /// Every iteration runs one tick and then sleeps for the poll interval,
    /// whatever the tick's outcome. Failed and panicking ticks are logged,
    /// counted as failures and never end the loop.
    pub async fn run(mut self, feed: Arc<dyn StatusFeed>) {
        let interval = self.config.poll_interval();
        info!(
            "[{}] Poller started (every {:.1}s, {})",
            self.config.name,
            interval.as_secs_f64(),
            self.config.incidents_url()
        );

        while !self.shared.is_stop_requested() {
            self.shared.set_phase(PollerPhase::Fetching);
            let tick = AssertUnwindSafe(self.tick(feed.as_ref())).catch_unwind().await;
            match tick {
                Ok(Ok(TickOutcome::Changed { .. })) => self.shared.set_phase(PollerPhase::Changed),
                Ok(Ok(_)) => self.shared.set_phase(PollerPhase::Unchanged),
                Err(panic) => {
                    // Nothing was committed, the next tick starts from the last good state
                    self.shared.failed_ticks.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "[{}] Tick panicked: {}",
                        self.config.name,
                        panic_message(panic.as_ref())
                    );
                    self.shared.set_phase(PollerPhase::Unchanged);
                }
                Ok(Err(e)) => {
                    self.shared.failed_ticks.fetch_add(1, Ordering::Relaxed);
                    if e.is_transient() {
                        error!("[{}] Fetch failed: {}", self.config.name, e);
                    } else {
                        error!("[{}] Tick failed: {}", self.config.name, e);
                    }
                    self.shared.set_phase(PollerPhase::Unchanged);
                }
            }

            if self.shared.is_stop_requested() {
                break;
            }

            self.shared.set_phase(PollerPhase::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shared.wake.notified() => {}
            }
        }

        self.shared.set_phase(PollerPhase::Stopped);
        info!("[{}] Poller stopped", self.config.name);
    }

    /// Perform one fetch-diff-summarize cycle
    pub async fn tick(&mut self, feed: &dyn StatusFeed) -> Result<TickOutcome, FeedError> {
        self.shared.ticks.fetch_add(1, Ordering::Relaxed);

        let response = bounded(self.request_timeout, feed.fetch_incidents(&self.validators)).await?;
        let (body, validators) = match response {
            IncidentsResponse::NotModified => {
                debug!("[{}] Not modified", self.config.name);
                self.shared.unchanged_ticks.fetch_add(1, Ordering::Relaxed);
                return Ok(TickOutcome::NotModified);
            }
            IncidentsResponse::Modified { body, validators } => (body, validators),
        };

        let hash: [u8; 32] = Sha256::digest(&body).into();
        if self.last_hash == Some(hash) {
            debug!("[{}] Content unchanged", self.config.name);
            self.validators = validators;
            self.shared.unchanged_ticks.fetch_add(1, Ordering::Relaxed);
            return Ok(TickOutcome::Unchanged);
        }

        let current = parse_incidents(&self.config.name, &body)?;
        let detected_at = self.detection_time();
        let DiffOutcome { events, known } = diff(
            &self.config.name,
            &self.snapshot,
            &current,
            &self.known,
            detected_at,
        );

        for event in &events {
            log_event(event);
            self.bus.publish(event.clone()).await;
        }
        self.shared
            .events_published
            .fetch_add(events.len() as u64, Ordering::Relaxed);

        self.validators = validators;
        self.last_hash = Some(hash);
        self.snapshot = current;
        self.known = known;
        self.last_detected = Some(detected_at);

        self.refresh_summary(feed).await;

        Ok(TickOutcome::Changed { events })
    }

    async fn refresh_summary(&self, feed: &dyn StatusFeed) {
        let fetched = bounded(self.request_timeout, feed.fetch_summary())
            .await
            .and_then(|body| parse_summary(&self.config.name, &body));

        match fetched {
            Ok(parsed) => {
                let summary = StatusSummary {
                    provider: self.config.name.clone(),
                    status_description: parsed.status_description,
                    components: parsed.components,
                    active_incidents: self
                        .snapshot
                        .values()
                        .filter(|incident| incident.is_active())
                        .cloned()
                        .collect(),
                    last_checked: Utc::now(),
                };
                *self
                    .shared
                    .summary
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(summary);
            }
            Err(e) => warn!(
                "[{}] Summary refresh failed, keeping previous summary: {}",
                self.config.name, e
            ),
        }
    }

    /// Current time, never earlier than the previous tick's detection time
    fn detection_time(&self) -> Timestamp {
        let now = Utc::now();
        match self.last_detected {
            Some(last) if last > now => last,
            _ => now,
        }
    }
}

async fn bounded<T>(limit: Duration, request: FeedFuture<'_, T>) -> Result<T, FeedError> {
    tokio::time::timeout(limit, request)
        .await
        .map_err(|_| FeedError::Timeout)?
}

fn log_event(event: &StatusEvent) {
    let incident = &event.incident;
    match event.event_type {
        EventType::NewIncident => info!(
            "[{}] NEW incident {}: {} ({}, impact {})",
            event.provider,
            incident.id,
            incident.name,
            incident.status.as_str(),
            incident.impact.as_str()
        ),
        EventType::IncidentUpdate => info!(
            "[{}] UPDATED incident {}: {} ({})",
            event.provider,
            incident.id,
            incident.name,
            incident.status.as_str()
        ),
        EventType::Resolved => info!(
            "[{}] RESOLVED incident {}: {}",
            event.provider, incident.id, incident.name
        ),
    }
}
