//! `crashbeacon` - CLI for live accident location tracking
//!
//! This binary watches, inspects, writes and clears the tracked location
//! record.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};

use crashbeacon::cli::{Cli, Command, ConfigCommand, DemoCommand, PushCommand, WatchCommand};
use crashbeacon::sink::{render_error, render_notice, Notice, PresentationSink};
use crashbeacon::{
    init_logging, Config, ConsoleSink, FeedSource, Location, LocationFeedReconciler, MemoryFeed,
    RawRecord, Session, SqliteFeed,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Watch(cmd) => handle_watch(&config, &cmd).await,
        Command::Status(cmd) => handle_status(&config, cmd.json).await,
        Command::Push(cmd) => handle_push(&config, &cmd).await,
        Command::Clear => handle_clear(&config).await,
        Command::Map => handle_map(&config).await,
        Command::Demo(cmd) => handle_demo(&config, &cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_feed(config: &Config) -> anyhow::Result<Arc<SqliteFeed>> {
    let path = config.database_path();
    let feed = SqliteFeed::open(&path, config.poll_interval())
        .with_context(|| format!("failed to open feed database {}", path.display()))?;
    Ok(Arc::new(feed))
}

fn reconciler(
    config: &Config,
    feed: Arc<dyn FeedSource>,
    sink: Arc<dyn PresentationSink>,
) -> anyhow::Result<LocationFeedReconciler> {
    Ok(
        LocationFeedReconciler::new(feed, sink, &config.feed.record_key)
            .with_fallback(config.fallback()?),
    )
}

/// Resolves on Ctrl-C. Never resolves if the signal cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn handle_watch(config: &Config, cmd: &WatchCommand) -> anyhow::Result<()> {
    let feed = open_feed(config)?;
    let bootstrap = config.bootstrap.enabled && !cmd.no_bootstrap;

    println!(
        "Watching '{}' in {} (Ctrl-C to stop)",
        config.feed.record_key,
        config.database_path().display()
    );
    let session = Session::start(
        reconciler(config, feed, Arc::new(ConsoleSink::new()))?,
        bootstrap,
    ).await?;
    let reconciler = session.run(ctrl_c()).await;

    info!(phase = %reconciler.phase(), "Watch stopped");
    Ok(())
}

async fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let feed = open_feed(config)?;
    let key = &config.feed.record_key;
    let record = feed.read(key).await?;
    let validated = record.as_ref().map(RawRecord::validate);

    if json {
        let (location, rejection) = match &validated {
            Some(Ok(location)) => (Some(*location), None),
            Some(Err(rejection)) => (None, Some(rejection.to_string())),
            None => (None, None),
        };
        let status = json!({
            "backend": feed.name(),
            "database_path": config.database_path(),
            "record_key": key,
            "record": record,
            "location": location,
            "rejection": rejection,
            "maps_url": location.as_ref().map(Location::maps_url),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("crashbeacon status");
    println!("------------------");
    println!("Backend:     {}", feed.name());
    println!("Database:    {}", config.database_path().display());
    println!("Record key:  {key}");
    println!();
    match validated {
        Some(Ok(location)) => {
            println!("Tracking 1 active location.");
            println!("  Location:    {location}");
            println!("  Reported at: {}", location.observed_at_local());
            println!("  Map:         {}", location.maps_url());
        }
        Some(Err(rejection)) => {
            println!("No active locations.");
            println!("  Stored record is malformed: {rejection}");
        }
        None => println!("No active locations."),
    }
    Ok(())
}

async fn handle_push(config: &Config, cmd: &PushCommand) -> anyhow::Result<()> {
    let timestamp = cmd
        .timestamp
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    let record = RawRecord::from_parts(&cmd.lat, &cmd.long, timestamp);

    match record.validate() {
        Ok(location) => println!("Reporting {location}"),
        Err(rejection) if cmd.allow_invalid => {
            warn!(%rejection, "Writing a record that does not validate");
        }
        Err(rejection) => bail!("refusing to write invalid record: {rejection}"),
    }

    let feed = open_feed(config)?;
    feed.write(&config.feed.record_key, &record).await?;
    println!("Record '{}' updated.", config.feed.record_key);
    Ok(())
}

async fn handle_clear(config: &Config) -> anyhow::Result<()> {
    let feed = open_feed(config)?;
    let mut reconciler = reconciler(config, feed, Arc::new(ConsoleSink::one_shot()))?;
    reconciler
        .clear()
        .await
        .map_err(|e| anyhow!(render_error(&e)))

}

async fn handle_map(config: &Config) -> anyhow::Result<()> {
    let feed = open_feed(config)?;
    let record = feed.read(&config.feed.record_key).await?;

    match record.as_ref().map(RawRecord::validate) {
        Some(Ok(location)) => println!("{}", location.maps_url()),
        _ => println!("{}", render_notice(&Notice::NoLocation)),
    }
    Ok(())
}

async fn handle_demo(config: &Config, cmd: &DemoCommand) -> anyhow::Result<()> {
    let feed = Arc::new(MemoryFeed::new());
    let key = config.feed.record_key.clone();
    let pause = Duration::from_millis(cmd.interval_ms);

    let session = Session::start(
        reconciler(config, feed.clone(), Arc::new(ConsoleSink::new()))?,
        true,
    ).await?;
    let script = demo_script(feed, key, pause);
    let reconciler = session
        .run(async {
            tokio::select! {
                () = script => {}
                () = ctrl_c() => {}
            }
        })
        .await;

    println!("Demo finished in phase {}.", reconciler.phase());
    Ok(())
}

/// Replays a short incident against an in-memory feed.
async fn demo_script(feed: Arc<MemoryFeed>, key: String, pause: Duration) {
    let now = Utc::now().timestamp_millis();
    let steps = [
        (
            "report received",
            Some(RawRecord::from_parts("19.07609", "72.87743", now)),
        ),
        (
            "same report re-sent",
            Some(RawRecord::from_parts("19.076090", "72.877430", now)),
        ),
        (
            "vehicle moved",
            Some(RawRecord::from_parts("19.08213", "72.88102", now + 60_000)),
        ),
        (
            "garbled report",
            Some(RawRecord::from_value(
                json!({"lat": "n/a", "long": "72.88102", "timestamp": now + 90_000}),
            )),
        ),
        (
            "report corrected",
            Some(RawRecord::from_parts("19.08213", "72.88102", now + 120_000)),
        ),
        ("record deleted", None),
    ];

    for (label, record) in steps {
        tokio::time::sleep(pause).await;
        println!("-- {label}");
        let result = match &record {
            Some(record) => feed.write(&key, record).await,
            None => feed.delete(&key).await,
        };
        if let Err(e) = result {
            warn!(error = %e, "Demo step failed");
        }
    }

    tokio::time::sleep(pause).await;
    println!("-- connection dropped");
    feed.inject_error(&key, "demo connection dropped");
    tokio::time::sleep(pause).await;
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Feed]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Record key:         {}", config.feed.record_key);
                println!("  Poll interval (ms): {}", config.feed.poll_interval_ms);
                println!();
                println!("[Bootstrap]");
                println!("  Enabled:            {}", config.bootstrap.enabled);
                println!(
                    "  Fallback location:  {}, {}",
                    config.bootstrap.fallback_latitude, config.bootstrap.fallback_longitude
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
