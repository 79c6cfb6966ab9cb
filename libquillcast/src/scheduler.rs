//! Publish scheduler
//!
//! Owns the publish state machine. Exactly one run is active at a time
//! (the browser page is a single shared resource); overlapping ticks are
//! dropped, not queued. A tick drains the job queue oldest-first, or runs
//! one spontaneous generated publish when the queue is empty. Stage
//! changes go out on the event bus; cancellation is accepted only in
//! stages that can stop without leaving the page half-way through a
//! navigation.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::config::{GeneratorConfig, SchedulerConfig};
use crate::error::{PublishError, QuillcastError, Result};
use crate::events::{Event, EventBus};
use crate::images::ImagePipeline;
use crate::ports::{ContentGenerator, DraftStore, FeedSource, TopicClassifier};
use crate::publisher::{PublishOutcome, Publisher};
use crate::queue::JobQueue;
use crate::session::SessionManager;
use crate::taxonomy::select_topic;
use crate::types::{Article, Job, JobPayload, JobStatus, JobType, PublishStage, SourceItem};

/// Everything a scheduler drives.
pub struct SchedulerDeps {
    pub queue: JobQueue,
    pub session: SessionManager,
    pub publisher: Publisher,
    pub images: ImagePipeline,
    pub generator: Arc<dyn ContentGenerator>,
    pub feed: Arc<dyn FeedSource>,
    pub drafts: Arc<dyn DraftStore>,
    pub classifier: Arc<dyn TopicClassifier>,
    pub events: EventBus,
    pub scheduler_config: SchedulerConfig,
    pub generator_config: GeneratorConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub total_published: u32,
    pub current_stage: PublishStage,
    pub pending_count: u64,
}

#[derive(Clone)]
pub struct PublishScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    deps: SchedulerDeps,
    cancel: CancelToken,
    busy: AtomicBool,
    enabled: AtomicBool,
    stage: Mutex<PublishStage>,
    last_run: Mutex<Option<DateTime<Utc>>>,
    next_run: Mutex<Option<DateTime<Utc>>>,
    total_published: AtomicU32,
    timer: Mutex<Option<JoinHandle<()>>>,
    stop_notify: tokio::sync::Notify,
}

impl PublishScheduler {
    pub fn new(deps: SchedulerDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                cancel: CancelToken::new(),
                busy: AtomicBool::new(false),
                enabled: AtomicBool::new(false),
                stage: Mutex::new(PublishStage::Idle),
                last_run: Mutex::new(None),
                next_run: Mutex::new(None),
                total_published: AtomicU32::new(0),
                timer: Mutex::new(None),
                stop_notify: tokio::sync::Notify::new(),
            }),
        }
    }

    /// Start the periodic timer. Idempotent: a second start while enabled
    /// is a no-op.
    pub fn start(&self) {
        if self.inner.enabled.swap(true, Ordering::SeqCst) {
            return;
        }

        let interval = Duration::from_secs(self.inner.deps.scheduler_config.interval_minutes * 60);
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; the run loop below wants it
            ticker.tick().await;
            loop {
                if !scheduler.inner.enabled.load(Ordering::SeqCst) {
                    break;
                }
                *scheduler.inner.next_run.lock().unwrap() =
                    Some(Utc::now() + chrono::Duration::seconds(interval.as_secs() as i64));
                if let Err(e) = scheduler.tick().await {
                    error!(error = %e, "scheduled run failed");
                }
                // A stop request wakes the wait; the enabled check above
                // decides whether another cycle runs
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = scheduler.inner.stop_notify.notified() => {}
                }
            }
        });

        *self.inner.timer.lock().unwrap() = Some(handle);
        info!(
            interval_minutes = self.inner.deps.scheduler_config.interval_minutes,
            "scheduler started"
        );
    }

    /// Disarm the timer. An in-flight run always finishes: the timer task
    /// is woken, not aborted, so it observes the disabled flag only after
    /// the current `tick()` returns.
    pub fn stop(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        if self.inner.timer.lock().unwrap().take().is_some() {
            self.inner.stop_notify.notify_one();
        }
        *self.inner.next_run.lock().unwrap() = None;
        info!("scheduler stopped");
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        Ok(SchedulerStatus {
            enabled: self.inner.enabled.load(Ordering::SeqCst),
            last_run: *self.inner.last_run.lock().unwrap(),
            next_run: *self.inner.next_run.lock().unwrap(),
            total_published: self.inner.total_published.load(Ordering::SeqCst),
            current_stage: *self.inner.stage.lock().unwrap(),
            pending_count: self.inner.deps.queue.count_pending().await?,
        })
    }

    /// Request cancellation of the active run. Honored only while the run
    /// sits in a cancellable stage; returns whether the request was taken.
    pub fn cancel(&self) -> bool {
        let stage = *self.inner.stage.lock().unwrap();
        if !stage.is_cancellable() {
            warn!(stage = %stage, "cancel request ignored in non-cancellable stage");
            return false;
        }
        self.inner.cancel.cancel();
        self.inner.deps.events.emit(Event::LogLine {
            message: format!("cancellation requested during {}", stage),
        });
        true
    }

    /// Run one publish cycle: drain queued jobs, or do one spontaneous
    /// generated publish when the queue is empty. Returns the number of
    /// immediate publishes.
    pub async fn tick(&self) -> Result<u32> {
        if self.inner.busy.swap(true, Ordering::SeqCst) {
            info!("previous run still active, skipping tick");
            return Ok(0);
        }
        let result = self.run_cycle().await;
        self.set_stage(PublishStage::Idle, "idle");
        self.inner.busy.store(false, Ordering::SeqCst);
        result
    }

    async fn run_cycle(&self) -> Result<u32> {
        self.inner.cancel.reset();
        *self.inner.last_run.lock().unwrap() = Some(Utc::now());

        let retention_secs =
            self.inner.deps.scheduler_config.retention_days as i64 * 24 * 3600;
        if let Err(e) = self.inner.deps.queue.purge_older_than(retention_secs).await {
            warn!(error = %e, "retention purge failed");
        }

        let mut published = 0u32;
        let mut drained_any = false;

        loop {
            let Some(job) = self.inner.deps.queue.next_pending().await? else {
                break;
            };
            drained_any = true;

            if published > 0 {
                // The job stays pending until the wait survives; a cancel
                // here ends the run with nothing half-claimed
                self.set_stage(PublishStage::CoolingDown, "waiting between posts");
                let wait = Duration::from_secs(
                    self.inner.deps.scheduler_config.inter_post_delay_secs,
                );
                if self.inner.cancel.sleep(wait).await.is_err() {
                    self.set_stage(PublishStage::Cancelled, "run cancelled");
                    return Ok(published);
                }
            }

            self.inner
                .deps
                .queue
                .set_status(&job.id, JobStatus::Processing, None)
                .await?;

            match self.execute_job(&job).await {
                Ok(outcome) => {
                    self.inner
                        .deps
                        .queue
                        .set_status(&job.id, JobStatus::Completed, None)
                        .await?;
                    if outcome == PublishOutcome::Published {
                        published += 1;
                        self.inner.total_published.fetch_add(1, Ordering::SeqCst);
                    }
                    self.set_stage(PublishStage::Completed, "job completed");
                    self.inner.deps.events.emit(Event::RunCompleted {
                        job_id: Some(job.id.clone()),
                        published,
                    });
                }
                Err(QuillcastError::Cancelled) => {
                    self.inner
                        .deps
                        .queue
                        .set_status(&job.id, JobStatus::Cancelled, Some("cancelled"))
                        .await?;
                    self.set_stage(PublishStage::Cancelled, "run cancelled");
                    info!(job_id = %job.id, "job cancelled, run stopped");
                    return Ok(published);
                }
                Err(e) => {
                    self.inner
                        .deps
                        .queue
                        .set_status(&job.id, JobStatus::Failed, Some(&e.to_string()))
                        .await?;
                    self.set_stage(PublishStage::Failed, "job failed");
                    self.inner.deps.events.emit(Event::RunFailed {
                        job_id: Some(job.id.clone()),
                        error: e.to_string(),
                    });
                    if e.aborts_run() {
                        // Remaining jobs stay pending for the next tick
                        error!(job_id = %job.id, error = %e, "run aborted");
                        return Err(e);
                    }
                    warn!(job_id = %job.id, error = %e, "job failed, continuing with next");
                }
            }
        }

        if !drained_any {
            match self.spontaneous_run().await {
                Ok(outcome) => {
                    if outcome == PublishOutcome::Published {
                        published += 1;
                        self.inner.total_published.fetch_add(1, Ordering::SeqCst);
                    }
                    self.set_stage(PublishStage::Completed, "spontaneous run completed");
                    self.inner.deps.events.emit(Event::RunCompleted {
                        job_id: None,
                        published,
                    });
                }
                Err(QuillcastError::Cancelled) => {
                    self.set_stage(PublishStage::Cancelled, "run cancelled");
                    return Ok(published);
                }
                Err(e) => {
                    self.set_stage(PublishStage::Failed, "spontaneous run failed");
                    self.inner.deps.events.emit(Event::RunFailed {
                        job_id: None,
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        Ok(published)
    }

    async fn execute_job(&self, job: &Job) -> Result<PublishOutcome> {
        let payload: JobPayload = serde_json::from_str(&job.payload)
            .map_err(|e| QuillcastError::InvalidInput(format!("bad job payload: {}", e)))?;

        match job.job_type {
            JobType::PublishDraft => self.publish_draft(&payload).await,
            JobType::PublishGenerated => self.publish_generated(&payload).await,
        }
    }

    async fn spontaneous_run(&self) -> Result<PublishOutcome> {
        self.publish_generated(&JobPayload::default()).await
    }

    async fn publish_draft(&self, payload: &JobPayload) -> Result<PublishOutcome> {
        self.ensure_authenticated().await?;

        let draft_id = payload
            .draft_id
            .as_deref()
            .ok_or_else(|| QuillcastError::InvalidInput("draft job without draft_id".to_string()))?;
        let draft = self
            .inner
            .deps
            .drafts
            .fetch(draft_id)
            .await?
            .ok_or_else(|| QuillcastError::InvalidInput(format!("draft {} not found", draft_id)))?;

        let article = Article {
            title: draft.title.clone(),
            html: draft.html.clone(),
            image_keyword: draft.image_keyword.clone(),
        };
        let article = self.process_images(article).await?;

        let category = payload.category.as_deref().or(draft.category.as_deref());
        let outcome = self.do_publish(&article, category).await?;
        self.inner.deps.drafts.mark_published(draft_id).await?;
        Ok(outcome)
    }

    async fn publish_generated(&self, payload: &JobPayload) -> Result<PublishOutcome> {
        self.ensure_authenticated().await?;

        self.enter_stage(PublishStage::FetchingSource, "fetching source items")?;
        let items = self
            .inner
            .deps
            .feed
            .fetch_recent(self.inner.deps.generator_config.source_max_age_hours)
            .await?;
        if items.is_empty() {
            return Err(QuillcastError::InvalidInput(
                "no recent source items to write about".to_string(),
            ));
        }

        self.enter_stage(PublishStage::SelectingItems, "selecting source items")?;
        let selected = self.select_items(&items).await?;

        self.enter_stage(PublishStage::SelectingStyle, "selecting style")?;
        let style = payload
            .style
            .clone()
            .unwrap_or_else(|| self.inner.deps.generator_config.default_style.clone());

        self.enter_stage(PublishStage::GeneratingContent, "generating article")?;
        let article = self
            .inner
            .deps
            .generator
            .generate(
                &selected,
                &style,
                self.inner.deps.generator_config.instructions.as_deref(),
            )
            .await?;

        let article = self.process_images(article).await?;
        self.do_publish(&article, payload.category.as_deref()).await
    }

    /// Pick which source items feed generation. With several candidates
    /// the classifier votes; its free-text answer is mapped back onto the
    /// titles.
    async fn select_items(&self, items: &[SourceItem]) -> Result<Vec<SourceItem>> {
        if items.len() <= 1 {
            return Ok(items.to_vec());
        }

        let titles: Vec<String> = items.iter().map(|i| i.title.clone()).collect();
        let context: String = items
            .iter()
            .map(|i| format!("{}: {}", i.title, i.summary))
            .collect::<Vec<_>>()
            .join("\n");

        let answer = self
            .inner
            .deps
            .classifier
            .classify(&titles, &context)
            .await?;

        let chosen = select_topic(&answer, &titles)
            .and_then(|title| items.iter().find(|i| &i.title == title))
            .unwrap_or(&items[0]);
        Ok(vec![chosen.clone()])
    }

    async fn ensure_authenticated(&self) -> Result<()> {
        self.enter_stage(PublishStage::CheckingAuth, "checking session")?;
        if self.inner.deps.session.check_logged_in().await? {
            return Ok(());
        }
        Err(PublishError::Authentication(format!(
            "no live session for {}",
            self.inner.deps.session.platform_name()
        ))
        .into())
    }

    /// Interactive login, driven from the CLI with a headed browser.
    /// Cancellable while waiting for the operator; the final persist step
    /// runs to completion.
    pub async fn interactive_login(&self) -> Result<()> {
        self.inner.cancel.reset();
        self.set_stage(PublishStage::WaitingLogin, "waiting for operator login");
        let result = match self.inner.deps.session.await_login(&self.inner.cancel).await {
            Ok(()) => {
                self.set_stage(PublishStage::LoggingIn, "persisting session");
                self.inner.deps.session.complete_login().await
            }
            Err(e) => Err(e),
        };
        self.set_stage(PublishStage::Idle, "idle");
        result
    }

    async fn process_images(&self, article: Article) -> Result<Article> {
        self.enter_stage(PublishStage::ProcessingImages, "resolving images")?;
        let mut exclude = std::collections::HashSet::new();
        let html = self
            .inner
            .deps
            .images
            .validate_and_replace(&article.html, &article.image_keyword, &mut exclude)
            .await?;
        Ok(Article { html, ..article })
    }

    async fn do_publish(&self, article: &Article, category: Option<&str>) -> Result<PublishOutcome> {
        // Publishing is past the point of no return for this post
        self.set_stage(PublishStage::Publishing, "publishing");
        self.inner.deps.publisher.publish(article, category).await
    }

    /// Move into a cancellable stage, honoring a pending cancel first.
    fn enter_stage(&self, stage: PublishStage, message: &str) -> Result<()> {
        self.inner.cancel.checkpoint()?;
        self.set_stage(stage, message);
        Ok(())
    }

    fn set_stage(&self, stage: PublishStage, message: &str) {
        *self.inner.stage.lock().unwrap() = stage;
        self.inner.deps.events.emit(Event::StageChanged {
            stage,
            message: message.to_string(),
            cancellable: stage.is_cancellable(),
        });
    }
}
