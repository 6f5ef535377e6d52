//! In-process feed backend.
//!
//! Records live in a map; every write or delete fans the new value out to the
//! subscribers of that key. Operations can be made to fail on demand, which is
//! how the error paths of the reconciler are exercised.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{FeedError, FeedEvent, FeedSource, Subscription, SubscriptionHandle};
use crate::record::RawRecord;

/// Which operations should fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Failures {
    /// Fail `read`.
    pub read: bool,
    /// Fail `write`.
    pub write: bool,
    /// Fail `delete`.
    pub delete: bool,
    /// Fail `subscribe`.
    pub subscribe: bool,
}

#[derive(Debug)]
struct Subscriber {
    key: String,
    tx: mpsc::UnboundedSender<FeedEvent>,
    handle: SubscriptionHandle,
}

impl Subscriber {
    fn is_live(&self) -> bool {
        !self.handle.is_stopped() && !self.tx.is_closed()
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, RawRecord>,
    subscribers: Vec<Subscriber>,
    failures: Failures,
    writes: usize,
    deletes: usize,
}

impl Inner {
    fn publish(&mut self, key: &str, event: &FeedEvent) {
        self.subscribers.retain(Subscriber::is_live);
        for subscriber in self.subscribers.iter().filter(|s| s.key == key) {
            if subscriber.tx.send(event.clone()).is_err() {
                debug!(key, "Subscriber channel closed");
            }
        }
    }
}

/// A feed held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryFeed {
    inner: Mutex<Inner>,
}

impl MemoryFeed {
    /// Create an empty feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a feed that already holds `record` under `key`.
    #[must_use]
    pub fn with_record(key: &str, record: RawRecord) -> Self {
        let feed = Self::new();
        feed.lock().records.insert(key.to_string(), record);
        feed
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent operations fail (or succeed again).
    pub fn set_failures(&self, failures: Failures) {
        self.lock().failures = failures;
    }

    /// Push a connection error to every subscriber of `key`.
    pub fn inject_error(&self, key: &str, message: impl Into<String>) {
        self.lock()
            .publish(key, &FeedEvent::Error(message.into()));
    }

    /// Current value of `key`, without going through the async API.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<RawRecord> {
        self.lock().records.get(key).cloned()
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Number of successful deletes so far.
    #[must_use]
    pub fn deletes(&self) -> usize {
        self.lock().deletes
    }

    /// Number of subscriptions that are still live.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(Subscriber::is_live);
        inner.subscribers.len()
    }
}

#[async_trait::async_trait]
impl FeedSource for MemoryFeed {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn subscribe(&self, key: &str) -> Result<Subscription, FeedError> {
        let mut inner = self.lock();
        if inner.failures.subscribe {
            return Err(FeedError::subscribe(key, "subscriptions rejected"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle::new();

        // Deliver the current value first, like a hosted realtime listener.
        let current = inner.records.get(key).cloned();
        tx.send(FeedEvent::Snapshot(current))
            .map_err(|e| FeedError::subscribe(key, e.to_string()))?;

        inner.subscribers.push(Subscriber {
            key: key.to_string(),
            tx,
            handle: handle.clone(),
        });
        trace!(key, "Memory subscription added");

        Ok(Subscription::new(key, rx, handle))
    }

    async fn read(&self, key: &str) -> Result<Option<RawRecord>, FeedError> {
        let inner = self.lock();
        if inner.failures.read {
            return Err(FeedError::read(key, "reads rejected"));
        }
        Ok(inner.records.get(key).cloned())
    }

    async fn write(&self, key: &str, record: &RawRecord) -> Result<(), FeedError> {
        let mut inner = self.lock();
        if inner.failures.write {
            return Err(FeedError::write(key, "writes rejected"));
        }
        inner.records.insert(key.to_string(), record.clone());
        inner.writes += 1;
        inner.publish(key, &FeedEvent::Snapshot(Some(record.clone())));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), FeedError> {
        let mut inner = self.lock();
        if inner.failures.delete {
            return Err(FeedError::delete(key, "deletes rejected"));
        }
        inner.records.remove(key);
        inner.deletes += 1;
        inner.publish(key, &FeedEvent::Snapshot(None));
        Ok(())
    }
}
