//! quill-send - Background daemon for automated publishing
//!
//! Runs the publish scheduler: drains queued jobs and fills quiet ticks
//! with spontaneous generated posts, driving everything through a real
//! browser page.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use libquillcast::browser::chromium::ChromiumDriver;
use libquillcast::browser::PageDriver;
use libquillcast::config::PlatformConfig;
use libquillcast::error::ConfigError;
use libquillcast::images::ImagePipeline;
use libquillcast::insert::InsertionEngine;
use libquillcast::logging;
use libquillcast::ports::http::{HttpClassifier, HttpDrafts, HttpFeed, HttpGenerator};
use libquillcast::ports::{
    ContentGenerator, DraftStore, FeedSource, FirstLabelClassifier, NoDrafts, TopicClassifier,
};
use libquillcast::publisher::Publisher;
use libquillcast::scheduler::SchedulerDeps;
use libquillcast::session::SessionManager;
use libquillcast::throttle::UsageThrottler;
use libquillcast::{
    Config, Database, Event, EventBus, JobQueue, PublishScheduler, QuillcastError, Result,
};
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "quill-send")]
#[command(version)]
#[command(about = "Background daemon for automated publishing")]
#[command(long_about = "\
quill-send - Background daemon for automated publishing

DESCRIPTION:
    quill-send is a long-running daemon that drives the Quillcast publish
    scheduler. Each cycle it drains the job queue oldest-first; when the
    queue is empty it runs one spontaneous generated publish instead.

    All publishing happens through a real browser page, since the target
    platforms expose no authoring API. Daily publish caps degrade extra
    posts into platform-side reservations for the next morning.

USAGE:
    # Run in foreground (logs to stderr)
    quill-send

    # Interactive login with a headed browser, then exit
    quill-send --login

    # Run one cycle and exit
    quill-send --once

    # Enable verbose logging
    quill-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the in-flight run)

CONFIGURATION:
    Configuration file: ~/.config/quillcast/config.toml
    Database location: ~/.local/share/quillcast/quillcast.db

    [scheduler]
    interval_minutes = 60   # minutes between publish cycles
    retention_days = 14     # purge terminal jobs older than this

    [throttle]
    daily_cap = 15          # immediate publishes per account per day

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Authentication error
")]
struct Cli {
    /// Publish cycle interval in minutes (overrides config)
    #[arg(long, value_name = "MINUTES")]
    #[arg(help = "Minutes between publish cycles (default: from config)")]
    interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run one publish cycle and exit
    #[arg(long)]
    #[arg(help = "Run one publish cycle and exit (for testing)")]
    once: bool,

    /// Open a headed browser for interactive login, then exit
    #[arg(long)]
    #[arg(help = "Complete an interactive login and persist the session")]
    login: bool,

    /// Target platform (defaults to the first configured one)
    #[arg(long)]
    platform: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("QUILLCAST_LOG_LEVEL", "debug");
    }
    logging::init_default();

    let mut config = Config::load()?;
    if let Some(minutes) = cli.interval {
        config.scheduler.interval_minutes = minutes;
    }
    if cli.login {
        // Login needs a visible window
        config.browser.headless = false;
    }

    let db = Database::new(&config.database.path).await?;

    // Jobs stuck in Processing from a crashed run go back to Pending
    let queue = JobQueue::new(db.clone());
    queue.reset_stuck().await?;

    let platform = select_platform(&config, cli.platform.as_deref())?.clone();
    info!(platform = %platform.name, "quill-send daemon starting");

    let driver: Arc<dyn PageDriver> = Arc::new(ChromiumDriver::launch(&config.browser).await?);

    let events = EventBus::new(256);
    let scheduler = PublishScheduler::new(build_deps(
        &config, db, queue, driver, platform, events.clone(),
    )?);

    spawn_event_logger(events);

    if cli.login {
        scheduler.interactive_login().await?;
        info!("login persisted, exiting");
        return Ok(());
    }

    if cli.once {
        let published = scheduler.tick().await?;
        info!(published, "single cycle finished, exiting");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    scheduler.start();
    while !shutdown.load(Ordering::Relaxed) {
        sleep(Duration::from_secs(1)).await;
    }

    // An in-flight run finishes before the timer task exits
    scheduler.stop();
    info!("quill-send daemon stopped");
    Ok(())
}

fn select_platform<'a>(config: &'a Config, name: Option<&str>) -> Result<&'a PlatformConfig> {
    match name {
        Some(name) => config.platform(name),
        None => config
            .platforms
            .first()
            .ok_or_else(|| ConfigError::MissingField("platform".to_string()).into()),
    }
}

fn build_deps(
    config: &Config,
    db: Database,
    queue: JobQueue,
    driver: Arc<dyn PageDriver>,
    platform: PlatformConfig,
    events: EventBus,
) -> Result<SchedulerDeps> {
    let services = &config.services;

    let generator_url = services.generator_url.clone().ok_or_else(|| {
        QuillcastError::Config(ConfigError::MissingField("services.generator_url".to_string()))
    })?;
    let feed_url = services.feed_url.clone().ok_or_else(|| {
        QuillcastError::Config(ConfigError::MissingField("services.feed_url".to_string()))
    })?;

    let generator: Arc<dyn ContentGenerator> =
        Arc::new(HttpGenerator::new(services, generator_url)?);
    let feed: Arc<dyn FeedSource> = Arc::new(HttpFeed::new(services, feed_url)?);
    let drafts: Arc<dyn DraftStore> = match services.drafts_url.clone() {
        Some(url) => Arc::new(HttpDrafts::new(services, url)?),
        None => Arc::new(NoDrafts),
    };
    let classifier: Arc<dyn TopicClassifier> = match services.classifier_url.clone() {
        Some(url) => Arc::new(HttpClassifier::new(services, url)?),
        None => Arc::new(FirstLabelClassifier),
    };

    Ok(SchedulerDeps {
        queue,
        session: SessionManager::new(driver.clone(), db.clone(), platform.clone()),
        publisher: Publisher::new(
            driver,
            InsertionEngine::new(config.insertion.clone()),
            UsageThrottler::new(db, config.throttle.clone()),
            platform,
            config.scheduler.clone(),
        ),
        images: ImagePipeline::from_config(&config.images)?,
        generator,
        feed,
        drafts,
        classifier,
        events,
        scheduler_config: config.scheduler.clone(),
        generator_config: config.generator.clone(),
    })
}

/// Mirror bus events into the log for headless operation.
fn spawn_event_logger(events: EventBus) {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            match event {
                Event::StageChanged { stage, message, .. } => {
                    info!(stage = %stage, "{}", message);
                }
                Event::LogLine { message } => info!("{}", message),
                Event::RunCompleted { job_id, published } => {
                    info!(?job_id, published, "run completed");
                }
                Event::RunFailed { job_id, error } => {
                    error!(?job_id, error, "run failed");
                }
            }
        }
    });
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| QuillcastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}
