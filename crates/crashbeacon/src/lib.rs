//! `crashbeacon` - live tracking of a single accident location
//!
//! This library watches one record of a real-time location feed, validates the
//! loosely-typed updates it receives, and turns them into state snapshots and
//! emergency alerts for a presentation layer.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod feed;
pub mod location;
pub mod logging;
pub mod reconciler;
pub mod record;
pub mod session;
pub mod sink;

pub use config::Config;
pub use error::{Error, Result};
pub use feed::{FeedError, FeedEvent, FeedSource, MemoryFeed, SqliteFeed, Subscription};
pub use location::Location;
pub use logging::init_logging;
pub use reconciler::{
    AlertEvent, BootstrapOutcome, ConnectionStatus, LocationFeedReconciler, Phase,
    ReconcileError, ReconcilerState, StateSnapshot,
};
pub use record::{RawRecord, Rejection};
pub use session::Session;
pub use sink::{ConsoleSink, Notice, PresentationSink};
