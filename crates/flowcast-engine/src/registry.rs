//! Workflow registry: CRUD over workflow definitions plus runtime state.
//!
//! Reads return snapshots. Mutations on one id are serialized by a per-id
//! async lock so schedule arming stays consistent with the stored record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use flowcast_core::clock::Clock;
use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::types::{
    EngineKind, Trigger, Workflow, WorkflowDraft, WorkflowPatch, WorkflowStatus,
};
use flowcast_scheduler::WorkflowScheduler;
use flowcast_scheduler::cron;

pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<String, Workflow>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    scheduler: OnceLock<Arc<WorkflowScheduler>>,
    clock: Arc<dyn Clock>,
}

impl WorkflowRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            scheduler: OnceLock::new(),
            clock,
        }
    }

    /// Hook the scheduler in. Create, update, toggle and delete keep its
    /// registrations in sync from then on.
    pub fn attach_scheduler(&self, scheduler: Arc<WorkflowScheduler>) {
        if self.scheduler.set(scheduler).is_err() {
            tracing::warn!("⚠️ Scheduler already attached to the registry");
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Workflow>>> {
        self.workflows
            .read()
            .map_err(|e| FlowcastError::Other(format!("Registry lock: {e}")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Workflow>>> {
        self.workflows
            .write()
            .map_err(|e| FlowcastError::Other(format!("Registry lock: {e}")))
    }

    fn id_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    fn snapshot(&self, id: &str) -> Result<Workflow> {
        self.read()?
            .get(id)
            .cloned()
            .ok_or_else(|| FlowcastError::not_found(format!("workflow '{id}'")))
    }

    fn store(&self, workflow: Workflow) -> Result<()> {
        self.write()?.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    /// Bring the scheduler registration in line with the stored workflow.
    async fn sync_schedule(&self, workflow: &Workflow) {
        let Some(scheduler) = self.scheduler.get() else {
            return;
        };
        let result = if workflow.cron().is_some() {
            scheduler.schedule(workflow).await.map(|_| ())
        } else {
            scheduler.unschedule(&workflow.id).await.map(|_| ())
        };
        if let Err(e) = result {
            tracing::warn!("⚠️ Schedule sync for '{}' failed: {e}", workflow.name);
        }
    }

    /// Validate and store a new workflow.
    pub async fn create(&self, draft: WorkflowDraft) -> Result<Workflow> {
        let name = draft
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| FlowcastError::validation("name is required"))?;
        let trigger = draft
            .trigger
            .ok_or_else(|| FlowcastError::validation("trigger is required"))?;
        let accounts = draft
            .accounts
            .ok_or_else(|| FlowcastError::validation("accounts are required"))?;

        let now = self.clock.now();
        let workflow = Workflow {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            description: draft.description,
            trigger,
            accounts,
            distributors: draft.distributors.unwrap_or_default(),
            engine: draft.engine.unwrap_or(EngineKind::Internal),
            enabled: draft.enabled.unwrap_or(true),
            status: WorkflowStatus::Created,
            created_at: now,
            updated_at: now,
            last_run: None,
            run_count: 0,
        };
        validate(&workflow)?;

        self.store(workflow.clone())?;
        tracing::info!("📝 Workflow created: '{}' ({})", workflow.name, workflow.id);
        if workflow.cron().is_some() {
            self.sync_schedule(&workflow).await;
        }
        Ok(workflow)
    }

    /// Put back a previously persisted workflow (schedule recovery). Existing
    /// records win. Returns whether it was inserted.
    pub fn restore(&self, workflow: Workflow) -> Result<bool> {
        validate(&workflow)?;
        let mut workflows = self.write()?;
        if workflows.contains_key(&workflow.id) {
            return Ok(false);
        }
        tracing::debug!("♻️ Restored workflow '{}' ({})", workflow.name, workflow.id);
        workflows.insert(workflow.id.clone(), workflow);
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Result<Workflow> {
        self.snapshot(id)
    }

    /// All workflows, oldest first.
    pub fn list(&self) -> Result<Vec<Workflow>> {
        let mut all: Vec<Workflow> = self.read()?.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    /// Enabled workflows triggered by the named event.
    pub fn by_event(&self, event: &str) -> Result<Vec<Workflow>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|w| w.enabled && w.trigger.event_name() == Some(event))
            .collect())
    }

    /// Merge the provided fields. Id and createdAt never change.
    pub async fn update(&self, id: &str, patch: WorkflowPatch) -> Result<Workflow> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        let before = self.snapshot(id)?;
        let mut workflow = before.clone();
        if let Some(name) = patch.name {
            workflow.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            workflow.description = Some(description);
        }
        if let Some(trigger) = patch.trigger {
            workflow.trigger = trigger;
        }
        if let Some(accounts) = patch.accounts {
            workflow.accounts = accounts;
        }
        if let Some(distributors) = patch.distributors {
            workflow.distributors = distributors;
        }
        if let Some(engine) = patch.engine {
            workflow.engine = engine;
        }
        if let Some(enabled) = patch.enabled {
            workflow.enabled = enabled;
        }
        validate(&workflow)?;
        workflow.updated_at = self.clock.now();

        self.store(workflow.clone())?;
        tracing::info!("✏️ Workflow updated: '{}'", workflow.name);
        if before.cron().is_some() || workflow.cron().is_some() {
            self.sync_schedule(&workflow).await;
        }
        Ok(workflow)
    }

    /// Cancel any schedule, then remove the record.
    pub async fn delete(&self, id: &str) -> Result<Workflow> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        let workflow = self.snapshot(id)?;
        if let Some(scheduler) = self.scheduler.get() {
            scheduler.unschedule(id).await?;
        }
        self.write()?.remove(id);
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
        tracing::info!("🗑️ Workflow deleted: '{}'", workflow.name);
        Ok(workflow)
    }

    /// Flip `enabled`, arming or disarming a schedule trigger.
    pub async fn toggle(&self, id: &str, enabled: bool) -> Result<Workflow> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        let mut workflow = self.snapshot(id)?;
        workflow.enabled = enabled;
        workflow.updated_at = self.clock.now();
        self.store(workflow.clone())?;
        tracing::info!(
            "{} Workflow '{}' {}",
            if enabled { "▶️" } else { "⏸️" },
            workflow.name,
            if enabled { "enabled" } else { "disabled" }
        );
        if workflow.cron().is_some() {
            self.sync_schedule(&workflow).await;
        }
        Ok(workflow)
    }

    /// Execution started: status running, stamp lastRun, count the run.
    pub async fn mark_running(&self, id: &str) -> Result<Workflow> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        let mut workflow = self.snapshot(id)?;
        workflow.status = WorkflowStatus::Running;
        workflow.last_run = Some(self.clock.now());
        workflow.run_count += 1;
        self.store(workflow.clone())?;
        Ok(workflow)
    }

    pub async fn mark_finished(&self, id: &str, status: WorkflowStatus) -> Result<()> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        let mut workflow = self.snapshot(id)?;
        workflow.status = status;
        self.store(workflow)
    }
}

fn validate(workflow: &Workflow) -> Result<()> {
    if workflow.name.trim().is_empty() {
        return Err(FlowcastError::validation("name must not be blank"));
    }
    if workflow.accounts.is_empty() {
        return Err(FlowcastError::validation("at least one account is required"));
    }
    if let Some(blank) = workflow
        .accounts
        .iter()
        .position(|a| a.account_identifier.trim().is_empty())
    {
        return Err(FlowcastError::validation(format!(
            "account #{} has no accountIdentifier",
            blank + 1
        )));
    }
    match &workflow.trigger {
        Trigger::Schedule { cron: expression } => cron::validate(expression)?,
        Trigger::Event { name } if name.trim().is_empty() => {
            return Err(FlowcastError::validation("event trigger needs a name"));
        }
        _ => {}
    }
    Ok(())
}
