//! Dual execution engine.
//!
//! Runs a workflow either in-process through the account pipeline or on the
//! delegated engine, falling back to the internal path at most once when the
//! delegate is missing, unhealthy, fails, or exceeds its poll budget.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;

use flowcast_core::clock::Clock;
use flowcast_core::config::EngineConfig;
use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::graph::WorkflowGraph;
use flowcast_core::traits::DelegateEngine;
use flowcast_core::types::{
    AccountResult, EngineKind, EngineUsed, Execution, ExecutionContext, ExecutionStatus, Workflow,
    WorkflowStatus,
};

use crate::delegate::DelegateRun;
use crate::pipeline::AccountPipeline;
use crate::registry::WorkflowRegistry;

pub struct DualExecutionEngine {
    registry: Arc<WorkflowRegistry>,
    pipeline: AccountPipeline,
    delegate: Option<Arc<dyn DelegateEngine>>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    history: Mutex<VecDeque<Execution>>,
}

impl DualExecutionEngine {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        pipeline: AccountPipeline,
        delegate: Option<Arc<dyn DelegateEngine>>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            pipeline,
            delegate,
            clock,
            config,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &AccountPipeline {
        &self.pipeline
    }

    pub fn has_delegate(&self) -> bool {
        self.delegate.is_some()
    }

    /// Run a workflow now. Only an unknown id is an `Err`; everything else
    /// is reported inside the returned `Execution`.
    pub async fn execute(&self, workflow_id: &str, context: ExecutionContext) -> Result<Execution> {
        let workflow = self.registry.mark_running(workflow_id).await?;
        let execution_id = uuid::Uuid::new_v4().to_string();
        let started_at = self.clock.now();
        tracing::info!(
            "▶️ Executing '{}' ({:?}, {:?} engine, run {execution_id})",
            workflow.name,
            context.source,
            workflow.engine
        );

        let mut execution = Execution {
            execution_id: execution_id.clone(),
            workflow_id: workflow.id.clone(),
            status: ExecutionStatus::Success,
            engine: EngineUsed::Internal,
            fallback_reason: None,
            results: Vec::new(),
            error: None,
            started_at,
            completed_at: started_at,
        };

        if workflow.accounts.is_empty() {
            execution.status = ExecutionStatus::Failed;
            execution.error = Some("workflow has no accounts".into());
        } else if workflow.engine == EngineKind::Delegated {
            match self.run_delegated(&workflow, &execution_id, &context).await {
                Ok(results) => {
                    execution.engine = EngineUsed::Delegated;
                    execution.results = results;
                }
                Err(e) => {
                    tracing::warn!("🔀 Falling back to internal engine for '{}': {e}", workflow.name);
                    execution.engine = EngineUsed::InternalFallback;
                    execution.fallback_reason = Some(e.to_string());
                    execution.results = self.run_internal(&workflow, &execution_id, &context).await;
                }
            }
        } else {
            execution.results = self.run_internal(&workflow, &execution_id, &context).await;
        }
        execution.completed_at = self.clock.now();

        let status = match execution.status {
            ExecutionStatus::Success => WorkflowStatus::Completed,
            ExecutionStatus::Failed => WorkflowStatus::Failed,
        };
        if let Err(e) = self.registry.mark_finished(&workflow.id, status).await {
            // deleted mid-run
            tracing::debug!("Could not record final status for {}: {e}", workflow.id);
        }

        let succeeded = execution.succeeded_accounts();
        tracing::info!(
            "✅ Execution {execution_id} finished: {succeeded}/{} accounts succeeded ({:?})",
            execution.results.len(),
            execution.engine
        );
        self.remember(execution.clone());
        Ok(execution)
    }

    /// Most recent first.
    pub fn recent_executions(&self, workflow_id: &str) -> Vec<Execution> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history
            .iter()
            .rev()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    fn remember(&self, execution: Execution) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(execution);
        while history.len() > self.config.history_size {
            history.pop_front();
        }
    }

    async fn run_delegated(
        &self,
        workflow: &Workflow,
        execution_id: &str,
        context: &ExecutionContext,
    ) -> Result<Vec<AccountResult>> {
        let delegate = self
            .delegate
            .clone()
            .ok_or_else(|| FlowcastError::DelegateFailure("no delegated engine configured".into()))?;
        match delegate.health_check().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(FlowcastError::DelegateFailure(format!("{} is unhealthy", delegate.name())));
            }
            Err(e) => return Err(FlowcastError::DelegateFailure(format!("{} unreachable: {e}", delegate.name()))),
        }

        let graph = WorkflowGraph::for_workflow(workflow, context.source)?;
        let input = json!({ "execution_id": execution_id, "context": context });
        DelegateRun::new(
            delegate,
            Arc::clone(&self.clock),
            graph,
            input,
            self.config.poll_interval(),
            self.config.max_poll_attempts,
        )
        .run_to_completion()
        .await
    }

    async fn run_internal(
        &self,
        workflow: &Workflow,
        execution_id: &str,
        context: &ExecutionContext,
    ) -> Vec<AccountResult> {
        let distributors = &workflow.distributors;
        if self.config.parallel_accounts {
            futures::future::join_all(workflow.accounts.iter().map(|account| {
                self.pipeline
                    .process_account(account, distributors, execution_id, context)
            }))
            .await
        } else {
            let mut results = Vec::with_capacity(workflow.accounts.len());
            for account in &workflow.accounts {
                results.push(
                    self.pipeline
                        .process_account(account, distributors, execution_id, context)
                        .await,
                );
            }
            results
        }
    }
}
