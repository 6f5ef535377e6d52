//! Presentation of reconciler output.
//!
//! A [`PresentationSink`] receives state snapshots, alerts, notices and
//! errors. The reconciler never renders anything itself.

use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};

use crate::location::Location;
use crate::reconciler::{AlertEvent, ConnectionStatus, ReconcileError, StateSnapshot};

/// Informational messages that are neither state changes nor errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notice {
    /// A placeholder record was written during bootstrap.
    Seeded(Location),
    /// The record was deleted on request.
    Cleared,
    /// There is no current location to act on.
    NoLocation,
}

/// Receives everything the reconciler wants a user to see.
pub trait PresentationSink: Send + Sync + std::fmt::Debug {
    /// Called after every state change.
    fn on_state(&self, snapshot: &StateSnapshot);

    /// Called when an observation with a new timestamp arrives.
    fn on_alert(&self, alert: &AlertEvent);

    /// Called when an operation or the subscription fails.
    fn on_error(&self, error: &ReconcileError);

    /// Called for informational notices.
    fn on_notice(&self, _notice: &Notice) {}
}

/// Render a snapshot as a short multi-line summary.
#[must_use]
pub fn render_state(snapshot: &StateSnapshot) -> String {
    let connection = match snapshot.connection {
        ConnectionStatus::Online => "Online",
        ConnectionStatus::Offline => "Offline",
    };

    let mut out = format!("[{connection}] {}", snapshot.status_line());
    if let Some(location) = &snapshot.current {
        let _ = write!(
            out,
            "\n  Location:    {location}\n  Reported at: {}\n  Map:         {}",
            location.observed_at_local(),
            location.maps_url()
        );
        if snapshot.coordinates_changed {
            out.push_str("\n  (location moved)");
        }
    }
    out
}

/// Render an alert.
#[must_use]
pub fn render_alert(alert: &AlertEvent) -> String {
    format!("EMERGENCY ALERT\n  {}", alert.description())
}

/// Render an error with its title.
#[must_use]
pub fn render_error(error: &ReconcileError) -> String {
    format!("{}: {error}", error.title())
}

/// Render a notice.
#[must_use]
pub fn render_notice(notice: &Notice) -> String {
    match notice {
        Notice::Seeded(location) => format!(
            "Data Initialized: placeholder location {location} written to the feed"
        ),
        Notice::Cleared => {
            "Location Cleared: the emergency location has been successfully removed".to_string()
        }
        Notice::NoLocation => "No location available".to_string(),
    }
}

/// Prints to the terminal. Repeated identical snapshots are printed once.
///
/// A one-shot sink prints notices only. Commands that run a single operation
/// use it and report failures through their own exit path.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    last: Mutex<Option<StateSnapshot>>,
    one_shot: bool,
}

impl ConsoleSink {
    /// Create a console sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink for a single command: notices only.
    #[must_use]
    pub fn one_shot() -> Self {
        Self {
            one_shot: true,
            ..Self::default()
        }
    }

    fn state_text(&self, snapshot: &StateSnapshot) -> Option<String> {
        if self.one_shot {
            return None;
        }
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(snapshot) {
            return None;
        }
        *last = Some(snapshot.clone());
        Some(render_state(snapshot))
    }

    fn alert_text(&self, alert: &AlertEvent) -> Option<String> {
        (!self.one_shot).then(|| render_alert(alert))
    }

    fn error_text(&self, error: &ReconcileError) -> Option<String> {
        (!self.one_shot).then(|| render_error(error))
    }
}

impl PresentationSink for ConsoleSink {
    fn on_state(&self, snapshot: &StateSnapshot) {
        if let Some(text) = self.state_text(snapshot) {
            println!("{text}");
        }
    }

    fn on_alert(&self, alert: &AlertEvent) {
        if let Some(text) = self.alert_text(alert) {
            println!("{text}");
        }
    }

    fn on_error(&self, error: &ReconcileError) {
        if let Some(text) = self.error_text(error) {
            eprintln!("{text}");
        }
    }

    fn on_notice(&self, notice: &Notice) {
        println!("{}", render_notice(notice));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum SinkEvent {
        State(StateSnapshot),
        Alert(AlertEvent),
        Error(&'static str, String),
        Notice(Notice),
    }

    /// Records everything it receives.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        events: Mutex<Vec<SinkEvent>>,
    }

    impl RecordingSink {
        fn push(&self, event: SinkEvent) {
            self.events.lock().unwrap().push(event);
        }

        pub(crate) fn events(&self) -> Vec<SinkEvent> {
            self.events.lock().unwrap().clone()
        }

        pub(crate) fn states(&self) -> Vec<StateSnapshot> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    SinkEvent::State(s) => Some(s),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn last_state(&self) -> Option<StateSnapshot> {
            self.states().pop()
        }

        pub(crate) fn alerts(&self) -> Vec<AlertEvent> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    SinkEvent::Alert(a) => Some(a),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn error_titles(&self) -> Vec<&'static str> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    SinkEvent::Error(title, _) => Some(title),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn notices(&self) -> Vec<Notice> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    SinkEvent::Notice(n) => Some(n),
                    _ => None,
                })
                .collect()
        }
    }

    impl PresentationSink for RecordingSink {
        fn on_state(&self, snapshot: &StateSnapshot) {
            self.push(SinkEvent::State(snapshot.clone()));
        }

        fn on_alert(&self, alert: &AlertEvent) {
            self.push(SinkEvent::Alert(*alert));
        }

        fn on_error(&self, error: &ReconcileError) {
            self.push(SinkEvent::Error(error.title(), error.to_string()));
        }

        fn on_notice(&self, notice: &Notice) {
            self.push(SinkEvent::Notice(*notice));
        }
    }
}
