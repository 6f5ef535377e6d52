//! A live tracking session.
//!
//! A [`Session`] owns one subscription for the lifetime of a run. It
//! subscribes before bootstrapping so no change is missed while the seed
//! check is in flight, then feeds every event to the reconciler until it is
//! told to shut down.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::feed::{FeedEvent, Subscription};
use crate::reconciler::{LocationFeedReconciler, ReconcileError};

/// One subscription plus the reconciler it drives.
#[derive(Debug)]
pub struct Session {
    reconciler: LocationFeedReconciler,
    subscription: Subscription,
    bootstrap: bool,
}

impl Session {
    /// Subscribe to the reconciler's record.
    ///
    /// When `bootstrap` is set, [`run`](Self::run) seeds the record before
    /// processing events.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Connection`] if the feed refuses the
    /// subscription. The reconciler reports it to its sink as well.
    pub async fn start(
        mut reconciler: LocationFeedReconciler,
        bootstrap: bool,
    ) -> Result<Self, ReconcileError> {
        let feed = Arc::clone(reconciler.feed());
        let subscription = match feed.subscribe(reconciler.key()).await {
            Ok(subscription) => subscription,
            Err(e) => return Err(reconciler.connection_lost(e.to_string())),
        };
        info!(backend = feed.name(), key = reconciler.key(), "Session started");

        Ok(Self {
            reconciler,
            subscription,
            bootstrap,
        })
    }

    /// The reconciler driven by this session.
    #[must_use]
    pub fn reconciler(&self) -> &LocationFeedReconciler {
        &self.reconciler
    }

    /// Process events until `shutdown` resolves or the subscription ends.
    ///
    /// The subscription is stopped before returning. The reconciler is handed
    /// back so its final state can be inspected.
    pub async fn run<F>(mut self, shutdown: F) -> LocationFeedReconciler
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        if self.bootstrap {
            let interrupted = tokio::select! {
                () = &mut shutdown => true,
                result = self.reconciler.bootstrap() => {
                    if result.is_err() {
                        warn!("Continuing without a seeded record");
                    }
                    false
                }
            };
            if interrupted {
                info!("Shutdown requested during bootstrap");
                self.subscription.stop();
                return self.reconciler;
            }
        }

        loop {
            let event = tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = self.subscription.next() => event,
            };

            match event {
                Some(FeedEvent::Snapshot(raw)) => {
                    self.reconciler.ingest(raw);
                }
                Some(FeedEvent::Error(message)) => {
                    self.reconciler.connection_lost(message);
                }
                None => {
                    debug!(key = self.subscription.key(), "Subscription ended");
                    break;
                }
            }
        }

        self.subscription.stop();
        self.reconciler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::oneshot;

    use crate::feed::{Failures, FeedSource, MemoryFeed, SqliteFeed};
    use crate::logging::init_test_logging;
    use crate::reconciler::{ConnectionStatus, Phase};
    use crate::record::RawRecord;
    use crate::sink::testing::RecordingSink;

    const KEY: &str = "accedentlocation";

    fn reconciler(feed: Arc<dyn FeedSource>, sink: &Arc<RecordingSink>) -> LocationFeedReconciler {
        init_test_logging();
        LocationFeedReconciler::new(feed, sink.clone(), KEY)
    }

    async fn wait_for(sink: &RecordingSink, condition: impl Fn(&RecordingSink) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition(sink) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn is_active(sink: &RecordingSink) -> bool {
        sink.last_state().is_some_and(|s| s.phase == Phase::Active)
    }

    /// Spawn `session` and return a trigger that stops it.
    fn spawn(
        session: Session,
    ) -> (
        oneshot::Sender<()>,
        tokio::task::JoinHandle<LocationFeedReconciler>,
    ) {
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(session.run(async move {
            let _ = rx.await;
        }));
        (tx, task)
    }

    #[tokio::test]
    async fn test_bootstrap_then_ingest_placeholder() {
        let feed = Arc::new(MemoryFeed::new());
        let sink = Arc::new(RecordingSink::default());
        let session = Session::start(reconciler(feed.clone(), &sink), true)
            .await
            .unwrap();

        let (stop, task) = spawn(session);
        wait_for(&sink, is_active).await;
        stop.send(()).unwrap();
        let reconciler = task.await.unwrap();

        assert_eq!(feed.writes(), 1);
        assert!(reconciler.state().bootstrapped);
        assert_eq!(reconciler.phase(), Phase::Active);
        assert_eq!(sink.alerts().len(), 1);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_without_bootstrap_nothing_is_written() {
        let feed = Arc::new(MemoryFeed::with_record(
            KEY,
            RawRecord::from_parts("10", "20", 1000),
        ));
        let sink = Arc::new(RecordingSink::default());
        let session = Session::start(reconciler(feed.clone(), &sink), false)
            .await
            .unwrap();

        let (stop, task) = spawn(session);
        wait_for(&sink, is_active).await;
        stop.send(()).unwrap();
        let reconciler = task.await.unwrap();

        assert_eq!(feed.writes(), 0);
        assert!(!reconciler.state().bootstrapped);
        assert_eq!(reconciler.state().connection, ConnectionStatus::Online);
    }

    #[tokio::test]
    async fn test_external_updates_reach_reconciler() {
        let feed = Arc::new(MemoryFeed::new());
        let sink = Arc::new(RecordingSink::default());
        let session = Session::start(reconciler(feed.clone(), &sink), false)
            .await
            .unwrap();
        let (stop, task) = spawn(session);

        feed.write(KEY, &RawRecord::from_parts("10", "20", 1))
            .await
            .unwrap();
        feed.write(KEY, &RawRecord::from_parts("10", "20", 2))
            .await
            .unwrap();
        wait_for(&sink, |s| s.alerts().len() == 2).await;

        feed.delete(KEY).await.unwrap();
        wait_for(&sink, |s| {
            s.last_state().is_some_and(|st| st.phase == Phase::Idle)
        })
        .await;

        stop.send(()).unwrap();
        let reconciler = task.await.unwrap();
        assert!(reconciler.current().is_none());
        assert_eq!(sink.alerts().len(), 2);
    }

    #[tokio::test]
    async fn test_connection_error_goes_offline() {
        let feed = Arc::new(MemoryFeed::with_record(
            KEY,
            RawRecord::from_parts("10", "20", 1),
        ));
        let sink = Arc::new(RecordingSink::default());
        let session = Session::start(reconciler(feed.clone(), &sink), false)
            .await
            .unwrap();
        let (stop, task) = spawn(session);
        wait_for(&sink, is_active).await;

        feed.inject_error(KEY, "socket closed");
        wait_for(&sink, |s| s.error_titles() == vec!["Connection Error"]).await;

        stop.send(()).unwrap();
        let reconciler = task.await.unwrap();
        assert_eq!(reconciler.state().connection, ConnectionStatus::Offline);
        assert!(reconciler.current().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_failure() {
        let feed = Arc::new(MemoryFeed::new());
        feed.set_failures(Failures {
            subscribe: true,
            ..Failures::default()
        });
        let sink = Arc::new(RecordingSink::default());

        let err = Session::start(reconciler(feed, &sink), true)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Connection(_)));
        assert_eq!(sink.error_titles(), vec!["Connection Error"]);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_keeps_session_running() {
        let feed = Arc::new(MemoryFeed::new());
        feed.set_failures(Failures {
            write: true,
            ..Failures::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let session = Session::start(reconciler(feed.clone(), &sink), true)
            .await
            .unwrap();
        let (stop, task) = spawn(session);

        wait_for(&sink, |s| s.error_titles() == vec!["Data Init Error"]).await;
        feed.set_failures(Failures::default());
        feed.write(KEY, &RawRecord::from_parts("1", "2", 3))
            .await
            .unwrap();
        wait_for(&sink, is_active).await;

        stop.send(()).unwrap();
        let reconciler = task.await.unwrap();
        assert!(!reconciler.state().bootstrapped);
    }

    #[tokio::test]
    async fn test_immediate_shutdown_releases_subscription() {
        let feed = Arc::new(MemoryFeed::new());
        let sink = Arc::new(RecordingSink::default());
        let session = Session::start(reconciler(feed.clone(), &sink), false)
            .await
            .unwrap();
        assert_eq!(feed.subscriber_count(), 1);

        let reconciler = session.run(std::future::ready(())).await;

        assert_eq!(reconciler.key(), KEY);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_session_end_to_end() {
        let feed = Arc::new(SqliteFeed::open_in_memory(Duration::from_millis(10)).unwrap());
        let sink = Arc::new(RecordingSink::default());
        let session = Session::start(reconciler(feed.clone(), &sink), true)
            .await
            .unwrap();
        let (stop, task) = spawn(session);

        wait_for(&sink, is_active).await;
        feed.write(KEY, &RawRecord::from_parts("19.1", "72.9", 42))
            .await
            .unwrap();
        wait_for(&sink, |s| {
            s.alerts()
                .last()
                .is_some_and(|a| a.location.observed_at() == 42)
        })
        .await;

        stop.send(()).unwrap();
        let reconciler = task.await.unwrap();
        assert_eq!(reconciler.current().map(|l| l.observed_at()), Some(42));
    }
}
