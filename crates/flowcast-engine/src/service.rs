//! Orchestrator: the single facade the gateway and CLI talk to.
//!
//! Construction order matters. The scheduler needs a trigger sink that
//! reaches the engine, and the registry needs the scheduler, so the
//! registry is built bare and the scheduler attached last.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use flowcast_channels::ChannelRegistry;
use flowcast_core::clock::{Clock, SystemClock};
use flowcast_core::config::{
    FlowcastConfig, QUEUE_ON_DEMAND, QUEUE_RECURRING, QUEUE_SCHEDULED, expand_path,
};
use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::traits::{DelegateEngine, PlanGenerator, QueueBackend, ScheduleStore};
use flowcast_core::types::{
    Execution, ExecutionContext, JobType, QueueCounts, QueueJob, RecurringRegistration,
    ScheduleMetadata, TriggerSource, Workflow, WorkflowDraft, WorkflowPatch,
};
use flowcast_scheduler::{
    JobHandle, JobOptions, MemoryScheduleStore, PersistentQueue, SqliteQueueBackend,
    SqliteScheduleStore, TriggerSink, WorkflowScheduler,
};

use crate::delegate::HttpDelegateEngine;
use crate::engine::DualExecutionEngine;
use crate::jobs::{self, WorkflowJobProcessor};
use crate::pipeline::AccountPipeline;
use crate::planner;
use crate::registry::WorkflowRegistry;

/// Cron fires land on the scheduled queue, or run directly when the queue
/// is disabled.
struct QueueTriggerSink {
    queue: Arc<PersistentQueue>,
    engine: Arc<DualExecutionEngine>,
}

#[async_trait]
impl TriggerSink for QueueTriggerSink {
    async fn fire(&self, workflow: &Workflow, fired_at: DateTime<Utc>) {
        let context = json!({ "fired_at": fired_at });
        if self.queue.is_available() {
            let payload = json!({ "workflow_id": workflow.id, "context": context });
            if let Err(e) = self
                .queue
                .enqueue(QUEUE_SCHEDULED, JobType::ScheduledWorkflow, payload, JobOptions::default())
                .await
            {
                tracing::error!("❌ Could not enqueue scheduled run of '{}': {e}", workflow.name);
            }
            return;
        }

        let engine = Arc::clone(&self.engine);
        let workflow_id = workflow.id.clone();
        tokio::spawn(async move {
            let ctx = ExecutionContext::with_source(TriggerSource::Schedule, context);
            if let Err(e) = engine.execute(&workflow_id, ctx).await {
                tracing::warn!("⚠️ Scheduled run of {workflow_id} failed: {e}");
            }
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub available: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub workflows: usize,
    pub active_schedules: usize,
    pub delegate_configured: bool,
    pub channels: Vec<String>,
    pub queue: QueueHealth,
}

/// Overrides for the collaborators `FlowcastConfig` would otherwise build.
pub struct OrchestratorBuilder {
    config: FlowcastConfig,
    clock: Option<Arc<dyn Clock>>,
    planner: Option<Arc<dyn PlanGenerator>>,
    channels: Option<ChannelRegistry>,
    delegate: Option<Arc<dyn DelegateEngine>>,
    queue_backend: Option<Arc<dyn QueueBackend>>,
    schedule_store: Option<Arc<dyn ScheduleStore>>,
}

impl OrchestratorBuilder {
    pub fn new(config: FlowcastConfig) -> Self {
        Self {
            config,
            clock: None,
            planner: None,
            channels: None,
            delegate: None,
            queue_backend: None,
            schedule_store: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn planner(mut self, planner: Arc<dyn PlanGenerator>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn channels(mut self, channels: ChannelRegistry) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn delegate(mut self, delegate: Arc<dyn DelegateEngine>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn queue_backend(mut self, backend: Arc<dyn QueueBackend>) -> Self {
        self.queue_backend = Some(backend);
        self
    }

    pub fn schedule_store(mut self, store: Arc<dyn ScheduleStore>) -> Self {
        self.schedule_store = Some(store);
        self
    }

    pub async fn build(self) -> Orchestrator {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let planner = self
            .planner
            .unwrap_or_else(|| planner::from_config(&config.planner, Arc::clone(&clock)));
        let channels = Arc::new(
            self.channels
                .unwrap_or_else(|| ChannelRegistry::from_config(&config.channels)),
        );
        let delegate = self.delegate.or_else(|| {
            config
                .delegate
                .as_ref()
                .map(|d| Arc::new(HttpDelegateEngine::new(d)) as Arc<dyn DelegateEngine>)
        });

        let backend = self.queue_backend.unwrap_or_else(|| {
            Arc::new(SqliteQueueBackend::new(&expand_path(&config.queue.db_path)))
        });
        let queue = Arc::new(PersistentQueue::connect(backend, &config.queue, Arc::clone(&clock)).await);

        let store: Arc<dyn ScheduleStore> = match self.schedule_store {
            Some(store) => store,
            None => match SqliteScheduleStore::open(&expand_path(&config.scheduler.store_path)) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!("⚠️ Schedule store unavailable ({e}), metadata kept in memory");
                    Arc::new(MemoryScheduleStore::new())
                }
            },
        };

        let registry = Arc::new(WorkflowRegistry::new(Arc::clone(&clock)));
        let pipeline = AccountPipeline::new(
            planner,
            channels,
            Arc::clone(&clock),
            config.engine.parallel_channels,
        );
        let engine = Arc::new(DualExecutionEngine::new(
            Arc::clone(&registry),
            pipeline,
            delegate,
            Arc::clone(&clock),
            config.engine.clone(),
        ));
        let sink = Arc::new(QueueTriggerSink {
            queue: Arc::clone(&queue),
            engine: Arc::clone(&engine),
        });
        let scheduler = Arc::new(WorkflowScheduler::new(sink, store, Arc::clone(&clock)));
        registry.attach_scheduler(Arc::clone(&scheduler));
        let processor = Arc::new(WorkflowJobProcessor::new(Arc::clone(&engine)));

        Orchestrator {
            started_at: clock.now(),
            config,
            clock,
            registry,
            engine,
            scheduler,
            queue,
            processor,
        }
    }
}

pub struct Orchestrator {
    config: FlowcastConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<WorkflowRegistry>,
    engine: Arc<DualExecutionEngine>,
    scheduler: Arc<WorkflowScheduler>,
    queue: Arc<PersistentQueue>,
    processor: Arc<WorkflowJobProcessor>,
    started_at: DateTime<Utc>,
}

impl Orchestrator {
    pub fn builder(config: FlowcastConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &FlowcastConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<DualExecutionEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Arc<WorkflowScheduler> {
        &self.scheduler
    }

    pub fn queue(&self) -> &Arc<PersistentQueue> {
        &self.queue
    }

    /// Start queue workers, initialize channels and, when configured,
    /// re-arm persisted schedules.
    pub async fn start(&self) -> Result<()> {
        if self.queue.is_available() {
            self.queue.start(self.processor.clone())?;
        } else {
            tracing::warn!(
                "⚠️ Queue disabled ({}), executions run inline",
                self.queue.disabled_reason().unwrap_or("unknown")
            );
        }
        self.engine.pipeline().channels().initialize_all().await;

        if self.config.scheduler.rearm_on_startup {
            for record in self.scheduler.schedules().await? {
                if let Err(e) = self.registry.restore(record.workflow) {
                    tracing::warn!("⚠️ Skipping persisted workflow: {e}");
                }
            }
            self.scheduler.recover().await?;
        }
        tracing::info!("🚀 Flowcast orchestrator started");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.queue.shutdown();
        tracing::info!("👋 Flowcast orchestrator stopped");
    }

    // ── Workflows ─────────────────────────────────────────

    pub async fn create_workflow(&self, draft: WorkflowDraft) -> Result<Workflow> {
        self.registry.create(draft).await
    }

    pub fn get_workflow(&self, id: &str) -> Result<Workflow> {
        self.registry.get(id)
    }

    pub fn list_workflows(&self) -> Result<Vec<Workflow>> {
        self.registry.list()
    }

    pub async fn update_workflow(&self, id: &str, patch: WorkflowPatch) -> Result<Workflow> {
        self.registry.update(id, patch).await
    }

    pub async fn toggle_workflow(&self, id: &str, enabled: bool) -> Result<Workflow> {
        self.registry.toggle(id, enabled).await
    }

    /// Delete a workflow along with its schedule and recurring registration.
    pub async fn delete_workflow(&self, id: &str) -> Result<Workflow> {
        let workflow = self.registry.delete(id).await?;
        if self.queue.is_available() {
            let job_name = workflow.job_name();
            let registered = self
                .queue
                .recurring()
                .await?
                .into_iter()
                .find(|r| r.job_name == job_name);
            if let Some(registration) = registered {
                self.queue.remove_recurring(&job_name, &registration.cron).await?;
            }
        }
        Ok(workflow)
    }

    // ── Executions ────────────────────────────────────────

    pub async fn execute_now(&self, id: &str, data: Value) -> Result<Execution> {
        self.engine
            .execute(id, ExecutionContext::with_source(TriggerSource::Manual, data))
            .await
    }

    /// Queue a run on the on-demand queue.
    pub async fn enqueue_execution(&self, id: &str, data: Value) -> Result<JobHandle> {
        self.registry.get(id)?;
        let context = ExecutionContext::with_source(TriggerSource::Queue, data);
        self.queue
            .enqueue(
                QUEUE_ON_DEMAND,
                JobType::ExecuteWorkflow,
                jobs::payload(id, Some(&context)),
                JobOptions::default(),
            )
            .await
    }

    /// Register the workflow's cron as a self re-arming queue job.
    pub async fn register_recurring(&self, id: &str) -> Result<RecurringRegistration> {
        let workflow = self.registry.get(id)?;
        let cron = workflow.cron().ok_or_else(|| {
            FlowcastError::validation(format!("workflow '{}' has no schedule trigger", workflow.name))
        })?;
        self.queue
            .schedule_recurring(QUEUE_RECURRING, &workflow.job_name(), jobs::payload(id, None), cron)
            .await
    }

    /// Run every enabled workflow bound to the event, in creation order.
    pub async fn emit_event(&self, name: &str, data: Value) -> Result<Vec<Execution>> {
        let workflows = self.registry.by_event(name)?;
        tracing::info!("📣 Event '{name}' matched {} workflow(s)", workflows.len());
        let mut executions = Vec::with_capacity(workflows.len());
        for workflow in workflows {
            let ctx = ExecutionContext::with_source(TriggerSource::Event, data.clone());
            match self.engine.execute(&workflow.id, ctx).await {
                Ok(execution) => executions.push(execution),
                // deleted between lookup and run
                Err(FlowcastError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(executions)
    }

    pub fn recent_executions(&self, id: &str) -> Result<Vec<Execution>> {
        self.registry.get(id)?;
        Ok(self.engine.recent_executions(id))
    }

    // ── Queues and schedules ──────────────────────────────

    pub async fn queue_stats(&self, queue: &str) -> Result<QueueCounts> {
        self.queue.stats(queue).await
    }

    pub async fn failed_jobs(&self, queue: &str) -> Result<Vec<QueueJob>> {
        self.queue.failed_jobs(queue).await
    }

    /// Process a queue to exhaustion in the calling task.
    pub async fn drain_queue(&self, queue: &str) -> Result<usize> {
        self.queue.drain(queue, self.processor.as_ref()).await
    }

    pub async fn schedules(&self) -> Result<Vec<ScheduleMetadata>> {
        self.scheduler.schedules().await
    }

    pub async fn remove_schedule(&self, name: &str) -> Result<bool> {
        self.scheduler.remove_by_name(name).await
    }

    pub fn health(&self) -> Result<HealthReport> {
        Ok(HealthReport {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: (self.clock.now() - self.started_at).num_seconds(),
            workflows: self.registry.list()?.len(),
            active_schedules: self.scheduler.active_jobs(),
            delegate_configured: self.engine.has_delegate(),
            channels: self
                .engine
                .pipeline()
                .channels()
                .channel_types()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            queue: QueueHealth {
                available: self.queue.is_available(),
                reason: self.queue.disabled_reason().map(str::to_string),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedPlanner, draft, manual_clock, mock_channels};
    use flowcast_core::types::{ExecutionStatus, Trigger};

    async fn orchestrator(config: FlowcastConfig, clock: Arc<dyn Clock>) -> Orchestrator {
        Orchestrator::builder(config)
            .clock(clock)
            .planner(Arc::new(ScriptedPlanner::failing_for(&[])))
            .channels(mock_channels())
            .queue_backend(Arc::new(SqliteQueueBackend::in_memory()))
            .schedule_store(Arc::new(MemoryScheduleStore::new()))
            .build()
            .await
    }

    fn scheduled(name: &str, cron: &str) -> WorkflowDraft {
        WorkflowDraft {
            trigger: Some(Trigger::Schedule { cron: cron.into() }),
            ..draft(name)
        }
    }

    #[tokio::test]
    async fn test_enqueued_execution_runs_on_drain() {
        let o = orchestrator(FlowcastConfig::default(), manual_clock()).await;
        let wf = o.create_workflow(draft("on-demand")).await.unwrap();

        let handle = o.enqueue_execution(&wf.id, json!({"by": "api"})).await.unwrap();
        assert_eq!(handle.queue, QUEUE_ON_DEMAND);
        assert_eq!(o.drain_queue(QUEUE_ON_DEMAND).await.unwrap(), 1);

        let executions = o.recent_executions(&wf.id).unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Success);
        assert_eq!(o.queue_stats(QUEUE_ON_DEMAND).await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_disabled_queue_still_executes_inline() {
        let mut config = FlowcastConfig::default();
        config.queue.enabled = false;
        let o = orchestrator(config, manual_clock()).await;
        let wf = o.create_workflow(draft("inline")).await.unwrap();

        let err = o.enqueue_execution(&wf.id, Value::Null).await.unwrap_err();
        assert!(matches!(err, FlowcastError::QueueUnavailable(_)));
        assert!(matches!(
            o.queue_stats(QUEUE_ON_DEMAND).await,
            Err(FlowcastError::QueueUnavailable(_))
        ));

        let execution = o.execute_now(&wf.id, Value::Null).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        let health = o.health().unwrap();
        assert!(!health.queue.available);
        assert_eq!(health.workflows, 1);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_workflow_is_not_found() {
        let o = orchestrator(FlowcastConfig::default(), manual_clock()).await;
        let err = o.enqueue_execution("missing", Value::Null).await.unwrap_err();
        assert!(matches!(err, FlowcastError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_schedule_and_recurring() {
        let o = orchestrator(FlowcastConfig::default(), Arc::new(SystemClock)).await;
        let wf = o.create_workflow(scheduled("nightly", "0 2 * * *")).await.unwrap();
        assert!(o.scheduler().is_scheduled(&wf.id));

        let registration = o.register_recurring(&wf.id).await.unwrap();
        assert_eq!(registration.job_name, format!("workflow:{}", wf.id));
        assert_eq!(o.queue().recurring().await.unwrap().len(), 1);
        assert_eq!(o.schedules().await.unwrap().len(), 1);

        o.delete_workflow(&wf.id).await.unwrap();
        assert!(!o.scheduler().is_scheduled(&wf.id));
        assert!(o.queue().recurring().await.unwrap().is_empty());
        assert!(o.schedules().await.unwrap().is_empty());
        assert!(matches!(o.get_workflow(&wf.id), Err(FlowcastError::NotFound(_))));
        o.shutdown();
    }

    #[tokio::test]
    async fn test_recurring_needs_schedule_trigger() {
        let o = orchestrator(FlowcastConfig::default(), manual_clock()).await;
        let wf = o.create_workflow(draft("manual")).await.unwrap();
        let err = o.register_recurring(&wf.id).await.unwrap_err();
        assert!(matches!(err, FlowcastError::Validation(_)));
    }

    #[tokio::test]
    async fn test_event_runs_enabled_matching_workflows() {
        let o = orchestrator(FlowcastConfig::default(), manual_clock()).await;
        let on_signup = |name: &str| WorkflowDraft {
            trigger: Some(Trigger::Event { name: "signup".into() }),
            ..draft(name)
        };
        let first = o.create_workflow(on_signup("welcome")).await.unwrap();
        let second = o.create_workflow(on_signup("crm-sync")).await.unwrap();
        o.create_workflow(draft("unrelated")).await.unwrap();
        o.toggle_workflow(&second.id, false).await.unwrap();

        let executions = o.emit_event("signup", json!({"user": 7})).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].workflow_id, first.id);
        assert!(o.emit_event("nothing", Value::Null).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cron_fire_lands_on_scheduled_queue() {
        let o = orchestrator(FlowcastConfig::default(), manual_clock()).await;
        let wf = o.create_workflow(draft("fired")).await.unwrap();
        let sink = QueueTriggerSink {
            queue: Arc::clone(o.queue()),
            engine: Arc::clone(o.engine()),
        };
        sink.fire(&wf, Utc::now()).await;
        assert_eq!(o.queue_stats(QUEUE_SCHEDULED).await.unwrap().waiting, 1);

        assert_eq!(o.drain_queue(QUEUE_SCHEDULED).await.unwrap(), 1);
        assert_eq!(o.get_workflow(&wf.id).unwrap().run_count, 1);
    }

    #[tokio::test]
    async fn test_rearm_on_startup_restores_workflows() {
        let store: Arc<dyn ScheduleStore> = Arc::new(MemoryScheduleStore::new());
        let mut config = FlowcastConfig::default();
        config.queue.enabled = false;
        config.scheduler.rearm_on_startup = true;

        let build = |store: Arc<dyn ScheduleStore>| {
            Orchestrator::builder(config.clone())
                .planner(Arc::new(ScriptedPlanner::failing_for(&[])))
                .channels(mock_channels())
                .schedule_store(store)
                .build()
        };

        let first = build(Arc::clone(&store)).await;
        let wf = first.create_workflow(scheduled("weekly", "0 9 * * 1")).await.unwrap();
        let paused = first.create_workflow(scheduled("monthly", "0 9 1 * *")).await.unwrap();
        first.toggle_workflow(&paused.id, false).await.unwrap();
        first.shutdown();

        let second = build(store).await;
        second.start().await.unwrap();
        assert_eq!(second.get_workflow(&wf.id).unwrap().name, "weekly");
        assert!(second.scheduler().is_scheduled(&wf.id));
        assert!(!second.get_workflow(&paused.id).unwrap().enabled);
        assert!(!second.scheduler().is_scheduled(&paused.id));
        assert_eq!(second.scheduler().active_jobs(), 1);
        second.shutdown();
    }
}
