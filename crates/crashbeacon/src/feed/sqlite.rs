//! Local `SQLite` feed backend.
//!
//! Records are stored as raw JSON text keyed by record path. Subscriptions
//! poll the row at a fixed interval and emit a snapshot whenever the BLAKE3
//! fingerprint of the stored text changes, so writes from other processes
//! sharing the database file are picked up.
//!
//! All database access runs on tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::migrations;
use super::{FeedError, FeedEvent, FeedSource, Subscription, SubscriptionHandle};
use crate::error::{Error, Result};
use crate::record::RawRecord;

/// How long a statement waits on a lock held by another connection.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A feed stored in a local `SQLite` database.
#[derive(Debug, Clone)]
pub struct SqliteFeed {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    poll_interval: Duration,
}

impl SqliteFeed {
    /// Open or create a feed database at the given path.
    ///
    /// Creates parent directories as needed and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema
    /// initialization fails.
    pub fn open(path: impl AsRef<Path>, poll_interval: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening feed database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets a watcher poll while another process writes.
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Feed database opened at {}", path.display());
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            poll_interval,
        })
    }

    /// Create an in-memory feed database.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory(poll_interval: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Arc::new(Mutex::new(conn)),
            poll_interval,
        })
    }

    /// Path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Interval between subscription polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn lock(conn: &Mutex<Connection>) -> std::result::Result<MutexGuard<'_, Connection>, FeedError> {
        conn.lock()
            .map_err(|_| FeedError::Unavailable("feed database lock poisoned".to_string()))
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> std::result::Result<T, FeedError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> std::result::Result<T, FeedError> + Send + 'static,
    {
        run_blocking(Arc::clone(&self.conn), f).await
    }
}

async fn run_blocking<T, F>(
    conn: Arc<Mutex<Connection>>,
    f: F,
) -> std::result::Result<T, FeedError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> std::result::Result<T, FeedError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let guard = SqliteFeed::lock(&conn)?;
        f(&guard)
    })
    .await
    .map_err(|e| FeedError::Unavailable(format!("feed database task failed: {e}")))?
}

/// Fetch the stored text for `key`.
fn fetch(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM records WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .optional()
}

/// Fingerprint of the stored text; `None` when the record is absent.
fn fingerprint(text: Option<&str>) -> Option<blake3::Hash> {
    text.map(|t| blake3::hash(t.as_bytes()))
}

async fn poll_loop(
    conn: Arc<Mutex<Connection>>,
    key: String,
    poll_interval: Duration,
    tx: mpsc::UnboundedSender<FeedEvent>,
    handle: SubscriptionHandle,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // `None` until the first successful poll, so that one always emits.
    let mut last: Option<Option<blake3::Hash>> = None;
    // An outage is reported once, when polls start failing.
    let mut failing = false;

    loop {
        ticker.tick().await;
        if handle.is_stopped() || tx.is_closed() {
            break;
        }

        let poll_key = key.clone();
        let polled = run_blocking(Arc::clone(&conn), move |conn| {
            fetch(conn, &poll_key).map_err(|e| FeedError::Unavailable(e.to_string()))
        })
        .await;

        let event = match polled {
            Ok(text) => {
                if failing {
                    info!(key = %key, "Feed poll recovered");
                    failing = false;
                }
                let digest = fingerprint(text.as_deref());
                if last == Some(digest) {
                    continue;
                }
                last = Some(digest);
                trace!(key = %key, present = text.is_some(), "Record changed");
                FeedEvent::Snapshot(text.as_deref().map(RawRecord::parse_lenient))
            }
            Err(e) => {
                // Re-emit the record once the database is readable again.
                last = None;
                if failing {
                    trace!(key = %key, error = %e, "Feed poll still failing");
                    continue;
                }
                failing = true;
                warn!(key = %key, error = %e, "Feed poll failed");
                FeedEvent::Error(e.to_string())
            }
        };

        if tx.send(event).is_err() {
            debug!("Subscription channel closed");
            break;
        }
    }

    debug!(key = %key, "Feed poller stopped");
}

#[async_trait::async_trait]
impl FeedSource for SqliteFeed {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn subscribe(&self, key: &str) -> std::result::Result<Subscription, FeedError> {
        // Fail fast if the database is already unusable.
        let check_key = key.to_string();
        self.with_conn(move |conn| {
            fetch(conn, &check_key).map_err(|e| FeedError::subscribe(&check_key, e.to_string()))
        })
        .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle::new();

        tokio::spawn(poll_loop(
            Arc::clone(&self.conn),
            key.to_string(),
            self.poll_interval,
            tx,
            handle.clone(),
        ));
        debug!(key, interval = ?self.poll_interval, "Feed poller started");

        Ok(Subscription::new(key, rx, handle))
    }

    async fn read(&self, key: &str) -> std::result::Result<Option<RawRecord>, FeedError> {
        let key = key.to_string();
        let text = self
            .with_conn(move |conn| fetch(conn, &key).map_err(|e| FeedError::read(&key, e.to_string())))
            .await?;
        Ok(text.as_deref().map(RawRecord::parse_lenient))
    }

    async fn write(&self, key: &str, record: &RawRecord) -> std::result::Result<(), FeedError> {
        let text = record.to_json()?;
        let owned_key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                r"
                INSERT INTO records (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                ",
                params![owned_key, text],
            )
            .map_err(|e| FeedError::write(&owned_key, e.to_string()))
        })
        .await?;
        debug!(key, "Record written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), FeedError> {
        let owned_key = key.to_string();
        let affected = self
            .with_conn(move |conn| {
                conn.execute("DELETE FROM records WHERE key = ?1", [&owned_key])
                    .map_err(|e| FeedError::delete(&owned_key, e.to_string()))
            })
            .await?;
        debug!(key, affected, "Record deleted");
        Ok(())
    }
}
