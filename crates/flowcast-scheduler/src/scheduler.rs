//! Workflow scheduler: one timer-driven tokio task per schedule-triggered workflow.
//!
//! The scheduler never retries anything itself. Each fire is handed to a
//! [`TriggerSink`], which on the engine side enqueues onto the scheduled
//! execution queue (or executes directly when the queue is disabled).
//!
//! Single process only: running several instances duplicates triggers, and
//! nothing is re-armed after a restart unless `recover` is called.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use flowcast_core::clock::Clock;
use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::traits::ScheduleStore;
use flowcast_core::types::{ScheduleMetadata, Workflow};

use crate::cron::CronSchedule;

/// Receives "run this workflow now" events.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn fire(&self, workflow: &Workflow, fired_at: DateTime<Utc>);
}

struct ScheduledJob {
    cron: CronSchedule,
    workflow_name: String,
    next_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
    handle: JoinHandle<()>,
}

/// Holds at most one live timer per workflow id.
pub struct WorkflowScheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    sink: Arc<dyn TriggerSink>,
    store: Arc<dyn ScheduleStore>,
    clock: Arc<dyn Clock>,
}

impl WorkflowScheduler {
    pub fn new(sink: Arc<dyn TriggerSink>, store: Arc<dyn ScheduleStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            sink,
            store,
            clock,
        }
    }

    fn lock_jobs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ScheduledJob>>> {
        self.jobs
            .lock()
            .map_err(|e| FlowcastError::Scheduler(format!("Lock: {e}")))
    }

    /// Arm (or re-arm) the timer for a workflow. Returns whether a timer is live afterwards.
    ///
    /// A disabled workflow is disarmed instead; its metadata is kept, marked
    /// disabled, so `recover` restores it without arming. A workflow without
    /// a schedule trigger is rejected.
    pub async fn schedule(&self, workflow: &Workflow) -> Result<bool> {
        let Some(expression) = workflow.cron() else {
            return Err(FlowcastError::validation(format!(
                "workflow '{}' has no schedule trigger",
                workflow.name
            )));
        };
        let cron = CronSchedule::parse(expression)?;

        if !workflow.enabled {
            let removed = self.lock_jobs()?.remove(&workflow.id);
            if let Some(old) = removed {
                old.handle.abort();
                tracing::info!("⏸️ Disarmed '{}'", workflow.name);
            }
            self.save_metadata(workflow, &cron).await;
            return Ok(false);
        }

        let next_fire = Arc::new(Mutex::new(None));
        {
            let mut jobs = self.lock_jobs()?;
            if let Some(old) = jobs.remove(&workflow.id) {
                old.handle.abort();
                tracing::debug!("⏱️ Replaced timer for '{}'", workflow.name);
            }
            let handle = tokio::spawn(run_timer(
                cron.clone(),
                workflow.clone(),
                Arc::clone(&self.sink),
                Arc::clone(&self.clock),
                Arc::clone(&next_fire),
            ));
            jobs.insert(
                workflow.id.clone(),
                ScheduledJob {
                    cron: cron.clone(),
                    workflow_name: workflow.name.clone(),
                    next_fire,
                    handle,
                },
            );
        }

        self.save_metadata(workflow, &cron).await;
        tracing::info!("📅 Scheduled '{}' ({cron})", workflow.name);
        Ok(true)
    }

    /// Store the schedule record under the workflow's name, dropping any
    /// record the same workflow left under an earlier name. Store errors are
    /// logged, never returned.
    async fn save_metadata(&self, workflow: &Workflow, cron: &CronSchedule) {
        match self.store.list_all().await {
            Ok(records) => {
                for stale in records
                    .iter()
                    .filter(|r| r.workflow.id == workflow.id && r.workflow.name != workflow.name)
                {
                    let previous = &stale.workflow.name;
                    if let Err(e) = self.store.delete(previous).await {
                        tracing::warn!("⚠️ Stale schedule metadata '{previous}' not removed: {e}");
                    }
                }
            }
            Err(e) => tracing::warn!("⚠️ Schedule metadata not listed: {e}"),
        }

        let metadata = ScheduleMetadata {
            cron_expression: cron.expression().to_string(),
            workflow: workflow.clone(),
            context: serde_json::json!({ "source": "schedule" }),
            created_at: self.clock.now(),
            job_name: workflow.job_name(),
        };
        if let Err(e) = self.store.put(&workflow.name, &metadata).await {
            tracing::warn!("⚠️ Schedule metadata for '{}' not saved: {e}", workflow.name);
        }
    }

    /// Destroy the timer for a workflow id. No-op when none is armed.
    pub async fn unschedule(&self, workflow_id: &str) -> Result<bool> {
        let removed = self.lock_jobs()?.remove(workflow_id);
        let Some(job) = removed else {
            return Ok(false);
        };
        job.handle.abort();
        if let Err(e) = self.store.delete(&job.workflow_name).await {
            tracing::warn!("⚠️ Schedule metadata for '{}' not removed: {e}", job.workflow_name);
        }
        tracing::info!("🛑 Unscheduled '{}'", job.workflow_name);
        Ok(true)
    }

    /// Remove a schedule by workflow name: the live timer (if any) and its metadata.
    pub async fn remove_by_name(&self, name: &str) -> Result<bool> {
        let removed = {
            let mut jobs = self.lock_jobs()?;
            let id = jobs
                .iter()
                .find(|(_, job)| job.workflow_name == name)
                .map(|(id, _)| id.clone());
            id.and_then(|id| jobs.remove(&id))
        };
        if let Some(job) = &removed {
            job.handle.abort();
        }
        let deleted = self.store.delete(name).await?;
        Ok(removed.is_some() || deleted)
    }

    pub fn is_scheduled(&self, workflow_id: &str) -> bool {
        self.lock_jobs()
            .map(|jobs| jobs.contains_key(workflow_id))
            .unwrap_or(false)
    }

    /// Number of live timers.
    pub fn active_jobs(&self) -> usize {
        self.lock_jobs().map(|jobs| jobs.len()).unwrap_or(0)
    }

    /// Next fire time: the live timer's target, or the cron's next match from now.
    pub fn next_fire(&self, workflow_id: &str) -> Option<DateTime<Utc>> {
        let jobs = self.lock_jobs().ok()?;
        let job = jobs.get(workflow_id)?;
        let pending = job.next_fire.lock().ok().and_then(|n| *n);
        pending.or_else(|| job.cron.next_after(self.clock.now()))
    }

    /// Persisted schedule records.
    pub async fn schedules(&self) -> Result<Vec<ScheduleMetadata>> {
        self.store.list_all().await
    }

    /// Re-arm every schedule found in the metadata store. Returns how many were armed.
    pub async fn recover(&self) -> Result<usize> {
        let records = self.store.list_all().await?;
        let mut armed = 0;
        for record in records {
            match self.schedule(&record.workflow).await {
                Ok(true) => armed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("⚠️ Could not re-arm '{}': {e}", record.workflow.name),
            }
        }
        tracing::info!("♻️ Recovered {armed} schedule(s)");
        Ok(armed)
    }

    /// Abort every timer. Metadata is kept for `recover`.
    pub fn shutdown(&self) {
        if let Ok(mut jobs) = self.jobs.lock() {
            for (_, job) in jobs.drain() {
                job.handle.abort();
            }
        }
    }
}

impl Drop for WorkflowScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_timer(
    cron: CronSchedule,
    workflow: Workflow,
    sink: Arc<dyn TriggerSink>,
    clock: Arc<dyn Clock>,
    next_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        let now = clock.now();
        let after = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = cron.next_after(after) else {
            tracing::warn!("⚠️ '{}' ({cron}) never fires again, timer stopped", workflow.name);
            return;
        };
        if let Ok(mut slot) = next_fire.lock() {
            *slot = Some(next);
        }

        let wait = (next - now).to_std().unwrap_or_default();
        clock.sleep(wait).await;

        tracing::info!("🔔 Schedule fired: '{}'", workflow.name);
        sink.fire(&workflow, next).await;
        last_fire = Some(next);
    }
}
