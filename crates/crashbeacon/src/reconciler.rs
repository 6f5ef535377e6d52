//! Single-record location feed reconciliation.
//!
//! [`LocationFeedReconciler`] turns the raw snapshots pushed by a feed into a
//! validated state plus two independent signals for the presentation layer:
//!
//! - `coordinates_changed`, set when latitude or longitude moved since the
//!   previous active state (used to re-focus a map marker), and
//! - an [`AlertEvent`], emitted when the observation timestamp changed (used
//!   to notify the user).
//!
//! Writers do not guarantee that the two change together, so both are
//! reported separately.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::feed::{FeedError, FeedSource};
use crate::location::Location;
use crate::record::RawRecord;
use crate::sink::{Notice, PresentationSink};

/// Whether the feed is currently delivering notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Notifications are arriving.
    Online,
    /// No notification yet, or the subscription reported an error.
    #[default]
    Offline,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Lifecycle phase of a reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing has happened yet.
    Uninitialized,
    /// The seed check is in progress.
    Bootstrapping,
    /// No active incident.
    Idle,
    /// A validated location is current.
    Active,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Bootstrapping => write!(f, "bootstrapping"),
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// State owned by a reconciler. Derived from the feed, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilerState {
    /// The last validated location, if any.
    pub current: Option<Location>,
    /// Connection status of the subscription.
    pub connection: ConnectionStatus,
    /// Whether the one-time seed check has completed.
    pub bootstrapped: bool,
}

/// What the presentation layer sees after every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    /// Lifecycle phase.
    pub phase: Phase,
    /// The current location, if any.
    pub current: Option<Location>,
    /// Connection status of the subscription.
    pub connection: ConnectionStatus,
    /// Whether the one-time seed check has completed.
    pub bootstrapped: bool,
    /// Whether the coordinates moved relative to the previous active state.
    /// Only ever `true` for active snapshots.
    pub coordinates_changed: bool,
}

impl StateSnapshot {
    /// Check if a location is currently active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// One-line system status summary.
    #[must_use]
    pub fn status_line(&self) -> &'static str {
        if self.is_active() {
            "Tracking 1 active location. All systems operational."
        } else {
            "No active locations. All systems operational."
        }
    }
}

/// A new, timestamp-distinct observation worth surfacing to a user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlertEvent {
    /// The observed location.
    pub location: Location,
}

impl AlertEvent {
    /// Human-readable alert text.
    #[must_use]
    pub fn description(&self) -> String {
        format!(
            "Incident detected at coordinates {}. Emergency responders dispatched immediately. \
             Proceed with caution - situation requires urgent attention.",
            self.location
        )
    }
}

/// Failures surfaced to the presentation layer.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The seed check could not read or write the record.
    #[error("failed to initialize location record: {0}")]
    Initialization(#[source] FeedError),

    /// The subscription lost its connection.
    #[error("lost connection to location feed: {0}")]
    Connection(String),

    /// Deleting the record failed.
    #[error("failed to clear location record: {0}")]
    Deletion(#[source] FeedError),
}

impl ReconcileError {
    /// Short title for user-facing notifications.
    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            Self::Initialization(_) => "Data Init Error",
            Self::Connection(_) => "Connection Error",
            Self::Deletion(_) => "Delete Failed",
        }
    }
}

/// Result of [`LocationFeedReconciler::bootstrap`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BootstrapOutcome {
    /// The seed check already ran for this reconciler.
    AlreadyBootstrapped,
    /// The feed already held a valid record; nothing was written.
    Valid(Location),
    /// The record was absent or malformed and a placeholder was written.
    Seeded(Location),
}

/// Result of ingesting one feed snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    /// The state after ingestion.
    pub snapshot: StateSnapshot,
    /// The alert emitted, if the observation timestamp changed.
    pub alert: Option<AlertEvent>,
}

/// Reconciles a single feed record into validated state, alerts and errors.
#[derive(Debug)]
pub struct LocationFeedReconciler {
    feed: Arc<dyn FeedSource>,
    sink: Arc<dyn PresentationSink>,
    key: String,
    fallback: Location,
    state: ReconcilerState,
    phase: Phase,
}

impl LocationFeedReconciler {
    /// Create a reconciler for `key` on the given feed.
    #[must_use]
    pub fn new(
        feed: Arc<dyn FeedSource>,
        sink: Arc<dyn PresentationSink>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            feed,
            sink,
            key: key.into(),
            fallback: Location::FALLBACK,
            state: ReconcilerState::default(),
            phase: Phase::Uninitialized,
        }
    }

    /// Use `fallback` as the placeholder coordinate written by
    /// [`bootstrap`](Self::bootstrap).
    #[must_use]
    pub fn with_fallback(mut self, fallback: Location) -> Self {
        self.fallback = fallback;
        self
    }

    /// The record key being tracked.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The feed this reconciler reads from.
    #[must_use]
    pub fn feed(&self) -> &Arc<dyn FeedSource> {
        &self.feed
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> &ReconcilerState {
        &self.state
    }

    /// The current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The current location, if any.
    #[must_use]
    pub fn current(&self) -> Option<Location> {
        self.state.current
    }

    /// URL opening the current location in an external maps application.
    #[must_use]
    pub fn maps_url(&self) -> Option<String> {
        self.state.current.as_ref().map(Location::maps_url)
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot_with(false)
    }

    fn snapshot_with(&self, coordinates_changed: bool) -> StateSnapshot {
        StateSnapshot {
            phase: self.phase,
            current: self.state.current,
            connection: self.state.connection,
            bootstrapped: self.state.bootstrapped,
            coordinates_changed: coordinates_changed && self.state.current.is_some(),
        }
    }

    fn publish_state(&self, coordinates_changed: bool) -> StateSnapshot {
        let snapshot = self.snapshot_with(coordinates_changed);
        self.sink.on_state(&snapshot);
        snapshot
    }

    /// Seed the feed with a placeholder if its record is absent or malformed.
    ///
    /// Runs at most once per reconciler; later calls return
    /// [`BootstrapOutcome::AlreadyBootstrapped`]. A record that already
    /// validates is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Initialization`] if the feed read or write
    /// fails. The error is also reported to the sink and the reconciler stays
    /// un-bootstrapped, so the caller may retry.
    pub async fn bootstrap(&mut self) -> Result<BootstrapOutcome, ReconcileError> {
        if self.state.bootstrapped {
            debug!(key = %self.key, "Bootstrap already completed");
            return Ok(BootstrapOutcome::AlreadyBootstrapped);
        }

        if self.phase == Phase::Uninitialized {
            self.phase = Phase::Bootstrapping;
        }

        match self.seed_if_needed().await {
            Ok(outcome) => {
                self.state.bootstrapped = true;
                if self.phase == Phase::Bootstrapping {
                    self.phase = Phase::Idle;
                }
                if let BootstrapOutcome::Seeded(placeholder) = outcome {
                    self.sink.on_notice(&Notice::Seeded(placeholder));
                }
                self.publish_state(false);
                Ok(outcome)
            }
            Err(source) => {
                error!(key = %self.key, error = %source, "Bootstrap failed");
                if self.phase == Phase::Bootstrapping {
                    self.phase = Phase::Uninitialized;
                }
                let err = ReconcileError::Initialization(source);
                self.sink.on_error(&err);
                Err(err)
            }
        }
    }

    async fn seed_if_needed(&self) -> Result<BootstrapOutcome, FeedError> {
        if let Some(existing) = self.feed.read(&self.key).await? {
            match existing.validate() {
                Ok(location) => {
                    debug!(key = %self.key, %location, "Existing record is valid");
                    return Ok(BootstrapOutcome::Valid(location));
                }
                Err(rejection) => {
                    warn!(key = %self.key, %rejection, "Replacing malformed record");
                }
            }
        }

        let placeholder = self.fallback.restamped(Utc::now().timestamp_millis());
        self.feed
            .write(&self.key, &RawRecord::from(placeholder))
            .await?;
        info!(key = %self.key, location = %placeholder, "Seeded placeholder location");
        Ok(BootstrapOutcome::Seeded(placeholder))
    }

    /// Ingest one snapshot from the feed. `None` means no record exists.
    ///
    /// Absent or invalid records move the reconciler to [`Phase::Idle`]
    /// without an alert. A valid record always replaces the current location;
    /// an alert is emitted when its timestamp differs from the previous one.
    pub fn ingest(&mut self, raw: Option<RawRecord>) -> Ingested {
        self.state.connection = ConnectionStatus::Online;

        let Some(location) = raw.as_ref().and_then(|record| self.accept(record)) else {
            if raw.is_none() {
                debug!(key = %self.key, "No record present");
            }
            self.state.current = None;
            self.phase = Phase::Idle;
            return Ingested {
                snapshot: self.publish_state(false),
                alert: None,
            };
        };

        let previous = self.state.current.replace(location);
        self.phase = Phase::Active;

        let coordinates_changed = !previous.is_some_and(|p| p.same_coordinates(&location));
        let alert = match previous {
            Some(p) if p.observed_at() == location.observed_at() => None,
            _ => Some(AlertEvent { location }),
        };
        debug!(
            key = %self.key,
            %location,
            coordinates_changed,
            alert = alert.is_some(),
            "Location updated"
        );

        let snapshot = self.publish_state(coordinates_changed);
        if let Some(alert) = &alert {
            info!(%location, observed_at = location.observed_at(), "Emergency alert");
            self.sink.on_alert(alert);
        }

        Ingested { snapshot, alert }
    }

    fn accept(&self, record: &RawRecord) -> Option<Location> {
        match record.validate() {
            Ok(location) => Some(location),
            Err(rejection) => {
                warn!(key = %self.key, %rejection, "Ignoring malformed location record");
                None
            }
        }
    }

    /// Handle a subscription error: go offline, drop the current location,
    /// and report a [`ReconcileError::Connection`] to the sink.
    ///
    /// The same error is returned for the caller's own use.
    pub fn connection_lost(&mut self, message: impl Into<String>) -> ReconcileError {
        let message = message.into();
        error!(key = %self.key, error = %message, "Feed connection lost");

        self.state.connection = ConnectionStatus::Offline;
        self.state.current = None;
        self.phase = Phase::Idle;

        self.sink
            .on_error(&ReconcileError::Connection(message.clone()));
        self.publish_state(false);
        ReconcileError::Connection(message)
    }

    /// Delete the record at the feed.
    ///
    /// On success the current location is dropped right away; the feed's own
    /// follow-up notification is idempotent with this.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Deletion`] if the feed rejects the delete.
    /// The error is also reported to the sink; state is left untouched and no
    /// retry is attempted.
    pub async fn clear(&mut self) -> Result<(), ReconcileError> {
        match self.feed.delete(&self.key).await {
            Ok(()) => {
                info!(key = %self.key, "Location record cleared");
                self.state.current = None;
                self.phase = Phase::Idle;
                self.sink.on_notice(&Notice::Cleared);
                self.publish_state(false);
                Ok(())
            }
            Err(source) => {
                error!(key = %self.key, error = %source, "Failed to clear location record");
                let err = ReconcileError::Deletion(source);
                self.sink.on_error(&err);
                Err(err)
            }
        }
    }
}
