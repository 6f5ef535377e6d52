//! Feed source abstraction.
//!
//! A feed source exposes a single keyed record that can be read, written,
//! deleted and subscribed to. The reconciler only ever talks to a feed through
//! the [`FeedSource`] trait; backends live in the submodules.

pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::record::RawRecord;

pub use memory::{Failures, MemoryFeed};
pub use sqlite::SqliteFeed;

/// Errors reported by feed backends.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The backend cannot be reached at all.
    #[error("feed backend unavailable: {0}")]
    Unavailable(String),

    /// Reading the record failed.
    #[error("failed to read record '{key}': {message}")]
    Read {
        /// Record key.
        key: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Writing the record failed.
    #[error("failed to write record '{key}': {message}")]
    Write {
        /// Record key.
        key: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Deleting the record failed.
    #[error("failed to delete record '{key}': {message}")]
    Delete {
        /// Record key.
        key: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Setting up a subscription failed.
    #[error("failed to subscribe to record '{key}': {message}")]
    Subscribe {
        /// Record key.
        key: String,
        /// Description of what went wrong.
        message: String,
    },

    /// A record could not be encoded for storage.
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl FeedError {
    /// Create a read error.
    #[must_use]
    pub fn read(key: &str, message: impl Into<String>) -> Self {
        Self::Read {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Create a write error.
    #[must_use]
    pub fn write(key: &str, message: impl Into<String>) -> Self {
        Self::Write {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Create a delete error.
    #[must_use]
    pub fn delete(key: &str, message: impl Into<String>) -> Self {
        Self::Delete {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Create a subscribe error.
    #[must_use]
    pub fn subscribe(key: &str, message: impl Into<String>) -> Self {
        Self::Subscribe {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// A notification delivered by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// The record's current value, `None` when no record exists.
    Snapshot(Option<RawRecord>),

    /// The subscription lost its connection to the backend.
    Error(String),
}

/// A cloneable stop signal shared between a subscription and the backend task
/// feeding it.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionHandle {
    stopped: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Create a new, running handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the subscription to stop.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// A live subscription to one record.
///
/// Events arrive in the order the backend produced them. Dropping the
/// subscription releases it.
#[derive(Debug)]
pub struct Subscription {
    key: String,
    events: mpsc::UnboundedReceiver<FeedEvent>,
    handle: SubscriptionHandle,
}

impl Subscription {
    /// Create a subscription from a backend's event channel and stop handle.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        events: mpsc::UnboundedReceiver<FeedEvent>,
        handle: SubscriptionHandle,
    ) -> Self {
        Self {
            key: key.into(),
            events,
            handle,
        }
    }

    /// The record key this subscription follows.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription is stopped or the backend has
    /// gone away.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        if self.handle.is_stopped() {
            return None;
        }
        self.events.recv().await
    }

    /// A handle that can stop this subscription from elsewhere.
    #[must_use]
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Stop receiving events and release the backend side.
    pub fn stop(&mut self) {
        self.handle.stop();
        self.events.close();
    }

    /// Check if the subscription has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.handle.is_stopped()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.stop();
    }
}

/// A source for the tracked record.
///
/// Implementations must deliver notifications for a key in the order the
/// changes happened; the reconciler does not reorder them.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync + std::fmt::Debug {
    /// Short backend name for logging.
    fn name(&self) -> &'static str;

    /// Subscribe to changes of `key`.
    ///
    /// The first event carries the record's value at subscription time.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be established.
    async fn subscribe(&self, key: &str) -> Result<Subscription, FeedError>;

    /// Read the current value of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn read(&self, key: &str) -> Result<Option<RawRecord>, FeedError>;

    /// Replace the value of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write is rejected.
    async fn write(&self, key: &str, record: &RawRecord) -> Result<(), FeedError>;

    /// Remove `key`. Deleting an absent record succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete is rejected.
    async fn delete(&self, key: &str) -> Result<(), FeedError>;
}
