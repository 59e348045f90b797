//! Queue job processor: turns queue jobs into engine executions.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::types::{
    Execution, ExecutionContext, ExecutionStatus, JobType, QueueJob, TriggerSource,
};
use flowcast_scheduler::{JobOutcome, JobProcessor};

use crate::engine::DualExecutionEngine;

/// Payload carried by every workflow job.
#[derive(Debug, Deserialize)]
struct WorkflowPayload {
    workflow_id: String,
    #[serde(default)]
    context: Option<Value>,
}

pub fn payload(workflow_id: &str, context: Option<&ExecutionContext>) -> Value {
    match context {
        Some(ctx) => json!({ "workflow_id": workflow_id, "context": ctx }),
        None => json!({ "workflow_id": workflow_id }),
    }
}

pub struct WorkflowJobProcessor {
    engine: Arc<DualExecutionEngine>,
}

impl WorkflowJobProcessor {
    pub fn new(engine: Arc<DualExecutionEngine>) -> Self {
        Self { engine }
    }

    async fn run(&self, workflow_id: &str, context: ExecutionContext) -> Result<Value> {
        let execution = self.engine.execute(workflow_id, context).await?;
        if execution.status == ExecutionStatus::Failed {
            return Err(FlowcastError::Other(
                execution.error.unwrap_or_else(|| "execution failed".into()),
            ));
        }
        Ok(summary(&execution))
    }
}

fn summary(execution: &Execution) -> Value {
    json!({
        "execution_id": execution.execution_id,
        "status": execution.status,
        "engine": execution.engine,
        "accounts": execution.results.len(),
        "succeeded": execution.succeeded_accounts(),
    })
}

/// Context from the payload, with the source forced to match the job type.
fn context_for(payload: &WorkflowPayload, source: TriggerSource) -> ExecutionContext {
    let data = match &payload.context {
        Some(Value::Object(map)) if map.contains_key("source") => {
            map.get("data").cloned().unwrap_or(Value::Null)
        }
        Some(other) => other.clone(),
        None => Value::Null,
    };
    ExecutionContext::with_source(source, data)
}

#[async_trait]
impl JobProcessor for WorkflowJobProcessor {
    async fn process(&self, job: &QueueJob) -> Result<JobOutcome> {
        let payload: WorkflowPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| FlowcastError::validation(format!("job {} payload: {e}", job.id)))?;

        match job.job_type {
            JobType::ExecuteWorkflow => {
                let ctx = match &payload.context {
                    Some(raw) => serde_json::from_value(raw.clone())
                        .unwrap_or_else(|_| context_for(&payload, TriggerSource::Queue)),
                    None => ExecutionContext::with_source(TriggerSource::Queue, Value::Null),
                };
                self.run(&payload.workflow_id, ctx).await.map(JobOutcome::done)
            }
            JobType::ScheduledWorkflow => {
                let ctx = context_for(&payload, TriggerSource::Schedule);
                self.run(&payload.workflow_id, ctx).await.map(JobOutcome::done)
            }
            JobType::RecurringWorkflow => {
                let active = self
                    .engine
                    .registry()
                    .get(&payload.workflow_id)
                    .map(|wf| wf.enabled)
                    .unwrap_or(false);
                if !active {
                    tracing::info!(
                        "⏹️ Recurring job for {} stopped: workflow gone or disabled",
                        payload.workflow_id
                    );
                    return Ok(JobOutcome::stop(json!({ "skipped": true })));
                }
                let ctx = context_for(&payload, TriggerSource::Recurring);
                self.run(&payload.workflow_id, ctx).await.map(JobOutcome::done)
            }
        }
    }
}
