//! Persistent multi-queue job runner.
//!
//! Each named queue has its own concurrency limit, retry policy and
//! retention. Jobs live in a [`QueueBackend`]; this layer owns claiming,
//! retry/backoff, retention pruning, recurring re-arming and worker loops.
//!
//! If the backend cannot be reached at startup the queue runs disabled and
//! every operation fails fast with `QueueUnavailable`.

pub mod sqlite;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore, broadcast};
use tokio::task::JoinHandle;

use flowcast_core::clock::Clock;
use flowcast_core::config::{QueueConfig, QueueSettings};
use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::traits::QueueBackend;
use flowcast_core::types::{JobStatus, JobType, QueueCounts, QueueJob, RecurringRegistration};

use crate::cron::CronSchedule;

/// Default page size for job listings.
const LIST_LIMIT: usize = 100;

/// Per-enqueue overrides.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub delay: Option<Duration>,
    pub attempts: Option<u32>,
    pub name: Option<String>,
}

/// Returned from `enqueue`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobHandle {
    pub id: String,
    pub queue: String,
    pub job_type: JobType,
    pub run_at: DateTime<Utc>,
}

/// Successful processing result.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub output: Value,
    /// For recurring jobs: schedule the next occurrence.
    pub keep_recurring: bool,
}

impl JobOutcome {
    pub fn done(output: Value) -> Self {
        Self { output, keep_recurring: true }
    }

    /// Finish and stop re-arming (e.g. the workflow was disabled).
    pub fn stop(output: Value) -> Self {
        Self { output, keep_recurring: false }
    }
}

/// Does the actual work for a claimed job.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &QueueJob) -> Result<JobOutcome>;
}

/// Lifecycle notifications, broadcast to subscribers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Enqueued { queue: String, job_id: String, job_type: JobType },
    Active { queue: String, job_id: String, attempt: u32 },
    Completed { queue: String, job_id: String },
    Retrying { queue: String, job_id: String, attempt: u32, retry_at: DateTime<Utc>, error: String },
    Failed { queue: String, job_id: String, attempts: u32, error: String },
    RecurringArmed { job_name: String, next_run_at: DateTime<Utc> },
    RecurringStopped { job_name: String },
}

enum QueueState {
    Ready(Arc<dyn QueueBackend>),
    Disabled(String),
}

struct QueueRuntime {
    settings: QueueSettings,
    permits: Arc<Semaphore>,
    wake: Arc<Notify>,
}

pub struct PersistentQueue {
    state: QueueState,
    queues: HashMap<String, QueueRuntime>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    events: broadcast::Sender<QueueEvent>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PersistentQueue {
    /// Connect to the backend and health-check it. Never fails: an unreachable
    /// store yields a disabled queue.
    pub async fn connect(backend: Arc<dyn QueueBackend>, config: &QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let state = if !config.enabled {
            QueueState::Disabled("queue disabled by configuration".into())
        } else {
            match Self::check_backend(backend.as_ref()).await {
                Ok(()) => {
                    match backend.reset_active().await {
                        Ok(0) => {}
                        Ok(n) => tracing::warn!("♻️ {n} interrupted job(s) returned to waiting"),
                        Err(e) => tracing::warn!("⚠️ Could not reset active jobs: {e}"),
                    }
                    tracing::info!(
                        "📬 Queue ready on {} ({} queue(s))",
                        backend.name(),
                        config.queues.len()
                    );
                    QueueState::Ready(backend)
                }
                Err(e) => {
                    tracing::warn!("⚠️ Queue store unavailable, running without queue: {e}");
                    QueueState::Disabled(e.to_string())
                }
            }
        };

        let queues = config
            .queues
            .iter()
            .map(|settings| {
                let runtime = QueueRuntime {
                    settings: settings.clone(),
                    permits: Arc::new(Semaphore::new(settings.concurrency.max(1))),
                    wake: Arc::new(Notify::new()),
                };
                (settings.name.clone(), runtime)
            })
            .collect();

        let (events, _) = broadcast::channel(256);
        Self {
            state,
            queues,
            clock,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            events,
            workers: Mutex::new(Vec::new()),
        }
    }

    async fn check_backend(backend: &dyn QueueBackend) -> Result<()> {
        backend.connect().await?;
        if backend.health_check().await? {
            Ok(())
        } else {
            Err(FlowcastError::QueueUnavailable(format!("{} health check failed", backend.name())))
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, QueueState::Ready(_))
    }

    /// Why the queue is disabled, if it is.
    pub fn disabled_reason(&self) -> Option<&str> {
        match &self.state {
            QueueState::Ready(_) => None,
            QueueState::Disabled(reason) => Some(reason),
        }
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.queues.keys().cloned().collect();
        names.sort();
        names
    }

    fn backend(&self) -> Result<&Arc<dyn QueueBackend>> {
        match &self.state {
            QueueState::Ready(backend) => Ok(backend),
            QueueState::Disabled(reason) => Err(FlowcastError::QueueUnavailable(reason.clone())),
        }
    }

    fn runtime(&self, queue: &str) -> Result<&QueueRuntime> {
        self.queues
            .get(queue)
            .ok_or_else(|| FlowcastError::not_found(format!("queue '{queue}'")))
    }

    fn emit(&self, event: QueueEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Add a job to a queue.
    pub async fn enqueue(&self, queue: &str, job_type: JobType, payload: Value, options: JobOptions) -> Result<JobHandle> {
        let backend = self.backend()?;
        let runtime = self.runtime(queue)?;
        let now = self.clock.now();
        let delay = options
            .delay
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(chrono::Duration::zero);

        let job = QueueJob {
            id: uuid::Uuid::new_v4().to_string(),
            queue: queue.to_string(),
            job_type,
            name: options.name,
            payload,
            status: JobStatus::Waiting,
            attempts_made: 0,
            max_attempts: options.attempts.unwrap_or(runtime.settings.attempts).max(1),
            run_at: now + delay,
            created_at: now,
            finished_at: None,
            last_error: None,
            result: None,
        };
        backend.insert(&job).await?;
        runtime.wake.notify_one();
        tracing::debug!("📥 Enqueued {job_type} job {} on '{queue}'", job.id);
        self.emit(QueueEvent::Enqueued {
            queue: queue.to_string(),
            job_id: job.id.clone(),
            job_type,
        });
        Ok(JobHandle {
            id: job.id,
            queue: job.queue,
            job_type,
            run_at: job.run_at,
        })
    }

    /// Register a repeating job, replacing any registration (and its pending
    /// occurrence) under the same name.
    pub async fn schedule_recurring(
        &self,
        queue: &str,
        job_name: &str,
        payload: Value,
        cron: &str,
    ) -> Result<RecurringRegistration> {
        let backend = self.backend()?;
        self.runtime(queue)?;
        let schedule = CronSchedule::parse(cron)?;
        let now = self.clock.now();
        let next = schedule
            .next_after(now)
            .ok_or_else(|| FlowcastError::validation(format!("cron '{cron}' never fires")))?;

        let replaced = backend.remove_pending_by_name(job_name).await?;
        if replaced > 0 {
            tracing::debug!("♻️ Replacing recurring job '{job_name}'");
        }
        let registration = RecurringRegistration {
            job_name: job_name.to_string(),
            queue: queue.to_string(),
            cron: schedule.expression().to_string(),
            payload,
            created_at: now,
            next_run_at: Some(next),
        };
        backend.put_recurring(&registration).await?;
        self.insert_occurrence(&registration, next).await?;
        tracing::info!("🔁 Recurring job '{job_name}' on '{queue}' ({schedule}), next at {next}");
        Ok(registration)
    }

    /// Remove a recurring registration and its pending occurrence. The cron
    /// must match the registered one.
    pub async fn remove_recurring(&self, job_name: &str, cron: &str) -> Result<bool> {
        let backend = self.backend()?;
        let Some(registration) = backend.get_recurring(job_name).await? else {
            return Ok(false);
        };
        if registration.cron.trim() != cron.trim() {
            return Ok(false);
        }
        backend.delete_recurring(job_name).await?;
        backend.remove_pending_by_name(job_name).await?;
        tracing::info!("🛑 Recurring job '{job_name}' removed");
        self.emit(QueueEvent::RecurringStopped { job_name: job_name.to_string() });
        Ok(true)
    }

    pub async fn recurring(&self) -> Result<Vec<RecurringRegistration>> {
        self.backend()?.list_recurring().await
    }

    pub async fn stats(&self, queue: &str) -> Result<QueueCounts> {
        let backend = self.backend()?;
        self.runtime(queue)?;
        backend.counts(queue, self.clock.now()).await
    }

    pub async fn failed_jobs(&self, queue: &str) -> Result<Vec<QueueJob>> {
        let backend = self.backend()?;
        self.runtime(queue)?;
        backend.list(queue, JobStatus::Failed, LIST_LIMIT).await
    }

    pub async fn completed_jobs(&self, queue: &str) -> Result<Vec<QueueJob>> {
        let backend = self.backend()?;
        self.runtime(queue)?;
        backend.list(queue, JobStatus::Completed, LIST_LIMIT).await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<QueueJob>> {
        self.backend()?.get(id).await
    }

    /// Process ready jobs until none remain, sleeping on the clock for
    /// delayed and backed-off jobs. Recurring occurrences that have not run
    /// yet are not waited for. Returns the number of attempts processed.
    pub async fn drain(&self, queue: &str, processor: &dyn JobProcessor) -> Result<usize> {
        let backend = self.backend()?;
        let runtime = self.runtime(queue)?;
        let mut processed = 0;
        loop {
            let now = self.clock.now();
            let jobs = backend
                .claim_ready(queue, now, runtime.settings.concurrency.max(1))
                .await?;
            if !jobs.is_empty() {
                processed += jobs.len();
                futures::future::join_all(
                    jobs.into_iter()
                        .map(|job| self.process_job(&runtime.settings, job, processor)),
                )
                .await;
                continue;
            }
            match backend.next_pending_at(queue).await? {
                Some(at) => {
                    let wait = (at - now).to_std().unwrap_or_default();
                    self.clock.sleep(wait).await;
                }
                None => return Ok(processed),
            }
        }
    }

    /// Spawn one worker loop per queue.
    pub fn start(self: &Arc<Self>, processor: Arc<dyn JobProcessor>) -> Result<()> {
        let backend = Arc::clone(self.backend()?);
        let mut workers = self
            .workers
            .lock()
            .map_err(|e| FlowcastError::Queue(format!("Lock: {e}")))?;
        if !workers.is_empty() {
            return Ok(());
        }
        for name in self.queue_names() {
            let queue = Arc::clone(self);
            let backend = Arc::clone(&backend);
            let processor = Arc::clone(&processor);
            workers.push(tokio::spawn(async move {
                queue.worker_loop(&name, backend, processor).await;
            }));
        }
        tracing::info!("👷 Started {} queue worker(s)", workers.len());
        Ok(())
    }

    async fn worker_loop(self: Arc<Self>, name: &str, backend: Arc<dyn QueueBackend>, processor: Arc<dyn JobProcessor>) {
        let Some(runtime) = self.queues.get(name) else {
            return;
        };
        let settings = runtime.settings.clone();
        let permits = Arc::clone(&runtime.permits);
        let wake = Arc::clone(&runtime.wake);

        loop {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                return;
            };
            match backend.claim_ready(name, self.clock.now(), 1).await {
                Ok(mut jobs) if !jobs.is_empty() => {
                    let job = jobs.remove(0);
                    let queue = Arc::clone(&self);
                    let processor = Arc::clone(&processor);
                    let settings = settings.clone();
                    tokio::spawn(async move {
                        queue.process_job(&settings, job, processor.as_ref()).await;
                        drop(permit);
                    });
                }
                Ok(_) => {
                    drop(permit);
                    tokio::select! {
                        _ = wake.notified() => {}
                        _ = self.clock.sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::warn!("⚠️ Queue '{name}' claim failed: {e}");
                    self.clock.sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Abort worker loops. Jobs in flight are reset to waiting on next start.
    pub fn shutdown(&self) {
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                handle.abort();
            }
        }
    }

    /// Run one claimed job and record the outcome. Errors from the store are
    /// logged, never propagated into the worker.
    async fn process_job(&self, settings: &QueueSettings, job: QueueJob, processor: &dyn JobProcessor) {
        if let Err(e) = self.try_process_job(settings, &job, processor).await {
            tracing::error!("❌ Queue '{}' could not record job {}: {e}", job.queue, job.id);
        }
    }

    async fn try_process_job(&self, settings: &QueueSettings, job: &QueueJob, processor: &dyn JobProcessor) -> Result<()> {
        let backend = self.backend()?;
        self.emit(QueueEvent::Active {
            queue: job.queue.clone(),
            job_id: job.id.clone(),
            attempt: job.attempts_made,
        });

        match processor.process(job).await {
            Ok(outcome) => {
                backend.complete(&job.id, &outcome.output, self.clock.now()).await?;
                backend.prune(&job.queue, JobStatus::Completed, settings.keep_completed).await?;
                tracing::debug!("✅ Job {} completed on '{}'", job.id, job.queue);
                self.emit(QueueEvent::Completed {
                    queue: job.queue.clone(),
                    job_id: job.id.clone(),
                });
                self.rearm(job, outcome.keep_recurring).await?;
            }
            Err(e) if job.attempts_made < job.max_attempts => {
                let delay = settings.backoff.delay_for(job.attempts_made);
                let retry_at = self.clock.now() + chrono::Duration::from_std(delay).unwrap_or_default();
                backend.retry_later(&job.id, &e.to_string(), retry_at).await?;
                tracing::warn!(
                    "🔄 Job {} on '{}' failed (attempt {}/{}), retry at {retry_at}: {e}",
                    job.id,
                    job.queue,
                    job.attempts_made,
                    job.max_attempts
                );
                self.emit(QueueEvent::Retrying {
                    queue: job.queue.clone(),
                    job_id: job.id.clone(),
                    attempt: job.attempts_made,
                    retry_at,
                    error: e.to_string(),
                });
                if let Some(runtime) = self.queues.get(&job.queue) {
                    runtime.wake.notify_one();
                }
            }
            Err(e) => {
                backend.fail(&job.id, &e.to_string(), self.clock.now()).await?;
                backend.prune(&job.queue, JobStatus::Failed, settings.keep_failed).await?;
                tracing::error!(
                    "❌ Job {} on '{}' failed after {} attempt(s): {e}",
                    job.id,
                    job.queue,
                    job.attempts_made
                );
                self.emit(QueueEvent::Failed {
                    queue: job.queue.clone(),
                    job_id: job.id.clone(),
                    attempts: job.attempts_made,
                    error: e.to_string(),
                });
                // recurring jobs only re-arm after a successful run
                self.rearm(job, false).await?;
            }
        }
        Ok(())
    }

    /// After a recurring occurrence finished: queue the next one while the
    /// registration still exists, otherwise drop the registration.
    ///
    /// A waiting occurrence under the same name means the registration was
    /// replaced while this one ran; the replacement already armed its own.
    async fn rearm(&self, job: &QueueJob, keep: bool) -> Result<()> {
        let Some(name) = job.name.as_deref() else {
            return Ok(());
        };
        let backend = self.backend()?;
        if backend.has_pending_by_name(name).await? {
            tracing::debug!("Recurring job '{name}' already has a pending occurrence");
            return Ok(());
        }
        if !keep {
            if backend.delete_recurring(name).await? {
                tracing::info!("🛑 Recurring job '{name}' stopped");
                self.emit(QueueEvent::RecurringStopped { job_name: name.to_string() });
            }
            return Ok(());
        }
        let Some(mut registration) = backend.get_recurring(name).await? else {
            tracing::debug!("Recurring job '{name}' was removed, not re-arming");
            return Ok(());
        };
        let schedule = CronSchedule::parse(&registration.cron)?;
        let after = self.clock.now().max(job.run_at);
        let Some(next) = schedule.next_after(after) else {
            tracing::warn!("⚠️ Recurring job '{name}' ({schedule}) has no further occurrence");
            return Ok(());
        };
        registration.next_run_at = Some(next);
        backend.put_recurring(&registration).await?;
        self.insert_occurrence(&registration, next).await?;
        Ok(())
    }

    async fn insert_occurrence(&self, registration: &RecurringRegistration, run_at: DateTime<Utc>) -> Result<()> {
        let backend = self.backend()?;
        let runtime = self.runtime(&registration.queue)?;
        let job = QueueJob {
            id: uuid::Uuid::new_v4().to_string(),
            queue: registration.queue.clone(),
            job_type: JobType::RecurringWorkflow,
            name: Some(registration.job_name.clone()),
            payload: registration.payload.clone(),
            status: JobStatus::Waiting,
            attempts_made: 0,
            max_attempts: runtime.settings.attempts.max(1),
            run_at,
            created_at: self.clock.now(),
            finished_at: None,
            last_error: None,
            result: None,
        };
        backend.insert(&job).await?;
        runtime.wake.notify_one();
        self.emit(QueueEvent::RecurringArmed {
            job_name: registration.job_name.clone(),
            next_run_at: run_at,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::sqlite::SqliteQueueBackend;
    use flowcast_core::clock::{ManualClock, SystemClock};
    use flowcast_core::config::{BackoffPolicy, QUEUE_ON_DEMAND, QUEUE_RECURRING};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Scripted {
        fn new(fail: bool) -> Self {
            Self { calls: AtomicUsize::new(0), fail }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobProcessor for Scripted {
        async fn process(&self, job: &QueueJob) -> Result<JobOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(FlowcastError::Other(format!("job {} exploded", job.id)))
            } else {
                Ok(JobOutcome::done(json!({"ok": true})))
            }
        }
    }

    fn config(attempts: u32, keep_failed: usize) -> QueueConfig {
        let mut on_demand = QueueSettings::named(QUEUE_ON_DEMAND);
        on_demand.attempts = attempts;
        on_demand.backoff = BackoffPolicy::Fixed { delay_ms: 5000 };
        on_demand.keep_failed = keep_failed;
        QueueConfig {
            enabled: true,
            db_path: ":memory:".into(),
            poll_interval_ms: 100,
            queues: vec![on_demand, QueueSettings::named(QUEUE_RECURRING)],
        }
    }

    async fn queue(config: &QueueConfig) -> (PersistentQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let q = PersistentQueue::connect(Arc::new(SqliteQueueBackend::in_memory()), config, clock.clone()).await;
        (q, clock)
    }

    #[tokio::test]
    async fn test_retry_then_fail_exactly_once() {
        let (q, clock) = queue(&config(3, 500)).await;
        let mut events = q.subscribe();
        q.enqueue(QUEUE_ON_DEMAND, JobType::ExecuteWorkflow, json!({"workflow_id": "wf"}), JobOptions::default())
            .await
            .unwrap();

        let processor = Scripted::new(true);
        assert_eq!(q.drain(QUEUE_ON_DEMAND, &processor).await.unwrap(), 3);
        assert_eq!(processor.calls(), 3);
        // two fixed backoffs of 5s
        assert_eq!(clock.sleep_count(), 2);

        let failed = q.failed_jobs(QUEUE_ON_DEMAND).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts_made, 3);
        assert!(failed[0].last_error.as_deref().unwrap_or("").contains("exploded"));

        let stats = q.stats(QUEUE_ON_DEMAND).await.unwrap();
        assert_eq!((stats.waiting, stats.delayed, stats.failed), (0, 0, 1));

        let mut failed_events = 0;
        while let Ok(ev) = events.try_recv() {
            if matches!(ev, QueueEvent::Failed { .. }) {
                failed_events += 1;
            }
        }
        assert_eq!(failed_events, 1);
    }

    #[tokio::test]
    async fn test_failed_retention_is_bounded() {
        let (q, _) = queue(&config(1, 2)).await;
        for i in 0..4 {
            q.enqueue(QUEUE_ON_DEMAND, JobType::ExecuteWorkflow, json!({"n": i}), JobOptions::default())
                .await
                .unwrap();
        }
        q.drain(QUEUE_ON_DEMAND, &Scripted::new(true)).await.unwrap();
        assert_eq!(q.stats(QUEUE_ON_DEMAND).await.unwrap().failed, 2);
    }

    #[tokio::test]
    async fn test_delayed_job_counts_as_delayed() {
        let (q, _) = queue(&config(3, 500)).await;
        let options = JobOptions { delay: Some(Duration::from_secs(60)), ..Default::default() };
        q.enqueue(QUEUE_ON_DEMAND, JobType::ExecuteWorkflow, json!({}), options).await.unwrap();
        assert_eq!(q.stats(QUEUE_ON_DEMAND).await.unwrap().delayed, 1);

        let processor = Scripted::new(false);
        assert_eq!(q.drain(QUEUE_ON_DEMAND, &processor).await.unwrap(), 1);
        assert_eq!(q.completed_jobs(QUEUE_ON_DEMAND).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recurring_rearms_until_removed() {
        let (q, clock) = queue(&config(1, 500)).await;
        let reg = q
            .schedule_recurring(QUEUE_RECURRING, "workflow:wf-1", json!({"workflow_id": "wf-1"}), "*/5 * * * *")
            .await
            .unwrap();
        let first = reg.next_run_at.unwrap();

        let processor = Scripted::new(false);
        // not due yet
        assert_eq!(q.drain(QUEUE_RECURRING, &processor).await.unwrap(), 0);

        clock.advance((first - clock.now()).to_std().unwrap());
        assert_eq!(q.drain(QUEUE_RECURRING, &processor).await.unwrap(), 1);

        let regs = q.recurring().await.unwrap();
        assert_eq!(regs.len(), 1);
        let second = regs[0].next_run_at.unwrap();
        assert!(second > first);
        assert_eq!(q.stats(QUEUE_RECURRING).await.unwrap().delayed, 1);

        assert!(!q.remove_recurring("workflow:wf-1", "0 * * * *").await.unwrap());
        assert!(q.remove_recurring("workflow:wf-1", "*/5 * * * *").await.unwrap());
        assert!(q.recurring().await.unwrap().is_empty());
        assert_eq!(q.stats(QUEUE_RECURRING).await.unwrap().delayed, 0);
    }

    #[tokio::test]
    async fn test_schedule_recurring_replaces_prior() {
        let (q, _) = queue(&config(1, 500)).await;
        q.schedule_recurring(QUEUE_RECURRING, "nightly", json!({}), "0 2 * * *").await.unwrap();
        q.schedule_recurring(QUEUE_RECURRING, "nightly", json!({}), "0 3 * * *").await.unwrap();
        let regs = q.recurring().await.unwrap();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].cron, "0 3 * * *");
        assert_eq!(q.stats(QUEUE_RECURRING).await.unwrap().delayed, 1);
    }

    /// Re-registers its own recurring job while an occurrence is running.
    struct Rescheduling {
        queue: Arc<PersistentQueue>,
    }

    #[async_trait]
    impl JobProcessor for Rescheduling {
        async fn process(&self, _job: &QueueJob) -> Result<JobOutcome> {
            self.queue
                .schedule_recurring(QUEUE_RECURRING, "nightly", json!({}), "0 3 * * *")
                .await?;
            Ok(JobOutcome::done(json!({"ok": true})))
        }
    }

    #[tokio::test]
    async fn test_replaced_mid_run_keeps_single_occurrence() {
        let (q, clock) = queue(&config(1, 500)).await;
        let q = Arc::new(q);
        let reg = q
            .schedule_recurring(QUEUE_RECURRING, "nightly", json!({}), "0 2 * * *")
            .await
            .unwrap();
        clock.advance((reg.next_run_at.unwrap() - clock.now()).to_std().unwrap());

        let processor = Rescheduling { queue: q.clone() };
        assert_eq!(q.drain(QUEUE_RECURRING, &processor).await.unwrap(), 1);

        let regs = q.recurring().await.unwrap();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].cron, "0 3 * * *");
        let stats = q.stats(QUEUE_RECURRING).await.unwrap();
        assert_eq!((stats.waiting, stats.delayed, stats.completed), (0, 1, 1));
    }

    #[tokio::test]
    async fn test_recurring_stops_after_terminal_failure() {
        let (q, clock) = queue(&config(1, 500)).await;
        let mut events = q.subscribe();
        let reg = q
            .schedule_recurring(QUEUE_RECURRING, "workflow:wf-2", json!({"workflow_id": "wf-2"}), "*/5 * * * *")
            .await
            .unwrap();
        clock.advance((reg.next_run_at.unwrap() - clock.now()).to_std().unwrap());

        let processor = Scripted::new(true);
        // default recurring settings: three attempts, fixed backoff
        assert_eq!(q.drain(QUEUE_RECURRING, &processor).await.unwrap(), 3);
        assert_eq!(processor.calls(), 3);

        assert!(q.recurring().await.unwrap().is_empty());
        let stats = q.stats(QUEUE_RECURRING).await.unwrap();
        assert_eq!((stats.waiting, stats.delayed, stats.failed), (0, 0, 1));

        let mut stopped = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if let QueueEvent::RecurringStopped { job_name } = ev {
                stopped.push(job_name);
            }
        }
        assert_eq!(stopped, vec!["workflow:wf-2".to_string()]);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_fast() {
        let backend = Arc::new(SqliteQueueBackend::new(std::path::Path::new("/dev/null/queue.db")));
        let q = PersistentQueue::connect(backend, &config(3, 500), Arc::new(ManualClock::default())).await;
        assert!(!q.is_available());
        let err = q
            .enqueue(QUEUE_ON_DEMAND, JobType::ExecuteWorkflow, json!({}), JobOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowcastError::QueueUnavailable(_)));
        assert_eq!(err.status_code(), 503);

        let mut disabled = config(3, 500);
        disabled.enabled = false;
        let q = PersistentQueue::connect(Arc::new(SqliteQueueBackend::in_memory()), &disabled, Arc::new(ManualClock::default())).await;
        assert!(matches!(q.stats(QUEUE_ON_DEMAND).await, Err(FlowcastError::QueueUnavailable(_))));
    }

    #[tokio::test]
    async fn test_unknown_queue_is_not_found() {
        let (q, _) = queue(&config(3, 500)).await;
        assert!(matches!(q.stats("nope").await, Err(FlowcastError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_workers_process_in_background() {
        let backend = Arc::new(SqliteQueueBackend::in_memory());
        let q = Arc::new(PersistentQueue::connect(backend, &config(3, 500), Arc::new(SystemClock)).await);
        let processor = Arc::new(Scripted::new(false));
        q.start(processor.clone()).unwrap();
        let mut events = q.subscribe();
        q.enqueue(QUEUE_ON_DEMAND, JobType::ExecuteWorkflow, json!({}), JobOptions::default())
            .await
            .unwrap();
        loop {
            if let QueueEvent::Completed { .. } = events.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(processor.calls(), 1);
        q.shutdown();
    }
}
