//! Delegated execution: HTTP client for an external workflow engine plus
//! the polling state machine that drives one run against it.
//!
//! ```text
//! Pending ──submit──▶ Submitted{polls} ──poll──▶ Succeeded(results)
//!    │                    │   ▲     │
//!    │                    └───┘     └──────────▶ Failed(reason)
//!    └──submit error──────────────────────────▶ Failed(reason)
//!                         polls == budget ─────▶ TimedOut
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use flowcast_core::clock::Clock;
use flowcast_core::config::DelegateConfig;
use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::graph::WorkflowGraph;
use flowcast_core::traits::{DelegateEngine, DelegateRunState, DelegateStatus, RunHandle};
use flowcast_core::types::AccountResult;

/// External engine over HTTP: `POST {base}/runs`, `GET {base}/runs/{id}`.
pub struct HttpDelegateEngine {
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpDelegateEngine {
    pub fn new(config: &DelegateConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .timeout(self.timeout);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        req
    }

    async fn json_response(resp: reqwest::Response, label: &str) -> Result<Value> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FlowcastError::DelegateFailure(format!("{label} returned {status}: {body}")));
        }
        resp.json()
            .await
            .map_err(|e| FlowcastError::DelegateFailure(format!("{label} response: {e}")))
    }
}

#[async_trait]
impl DelegateEngine for HttpDelegateEngine {
    fn name(&self) -> &str {
        "http"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.request(reqwest::Method::GET, "/health").send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) => {
                tracing::debug!("Delegated engine health check failed: {e}");
                Ok(false)
            }
        }
    }

    async fn submit(&self, definition: &WorkflowGraph, input: &Value) -> Result<RunHandle> {
        let resp = self
            .request(reqwest::Method::POST, "/runs")
            .json(&json!({ "definition": definition, "input": input }))
            .send()
            .await
            .map_err(|e| FlowcastError::DelegateFailure(format!("submit: {e}")))?;
        let body = Self::json_response(resp, "submit").await?;
        let run_id = body
            .get("run_id")
            .or_else(|| body.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| FlowcastError::DelegateFailure("submit response has no run id".into()))?;
        Ok(RunHandle {
            run_id: run_id.to_string(),
            submitted_at: Utc::now(),
        })
    }

    async fn poll_status(&self, handle: &RunHandle) -> Result<DelegateStatus> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/runs/{}", handle.run_id))
            .send()
            .await
            .map_err(|e| FlowcastError::DelegateFailure(format!("poll: {e}")))?;
        let body = Self::json_response(resp, "poll").await?;
        serde_json::from_value(body)
            .map_err(|e| FlowcastError::DelegateFailure(format!("undecodable run status: {e}")))
    }
}

/// Where a delegated run currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Pending,
    Submitted { handle: RunHandle, polls: u32 },
    Succeeded(Value),
    Failed(String),
    TimedOut { polls: u32 },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded(_) | RunState::Failed(_) | RunState::TimedOut { .. })
    }
}

/// One delegated run, advanced explicitly by `step`.
pub struct DelegateRun {
    delegate: Arc<dyn DelegateEngine>,
    clock: Arc<dyn Clock>,
    graph: WorkflowGraph,
    input: Value,
    poll_interval: Duration,
    max_polls: u32,
    state: RunState,
}

impl DelegateRun {
    pub fn new(
        delegate: Arc<dyn DelegateEngine>,
        clock: Arc<dyn Clock>,
        graph: WorkflowGraph,
        input: Value,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Self {
        Self {
            delegate,
            clock,
            graph,
            input,
            poll_interval,
            max_polls,
            state: RunState::Pending,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Advance by one transition. Terminal states are left as they are.
    pub async fn step(&mut self) -> &RunState {
        let next = match &self.state {
            RunState::Pending => match self.delegate.submit(&self.graph, &self.input).await {
                Ok(handle) => {
                    tracing::info!("🛰️ Delegated run {} submitted to {}", handle.run_id, self.delegate.name());
                    RunState::Submitted { handle, polls: 0 }
                }
                Err(e) => RunState::Failed(format!("submission failed: {e}")),
            },
            RunState::Submitted { polls, .. } if *polls >= self.max_polls => {
                RunState::TimedOut { polls: *polls }
            }
            RunState::Submitted { handle, polls } => {
                self.clock.sleep(self.poll_interval).await;
                let polls = polls + 1;
                match self.delegate.poll_status(handle).await {
                    Ok(DelegateStatus { status: DelegateRunState::Succeeded, results, .. }) => {
                        RunState::Succeeded(results.unwrap_or(Value::Null))
                    }
                    Ok(DelegateStatus { status: DelegateRunState::Failed, error, .. }) => RunState::Failed(
                        error.unwrap_or_else(|| "delegated engine reported failure".into()),
                    ),
                    Ok(_) => RunState::Submitted { handle: handle.clone(), polls },
                    Err(e) => {
                        tracing::warn!("⚠️ Poll {polls}/{} of run {} failed: {e}", self.max_polls, handle.run_id);
                        RunState::Submitted { handle: handle.clone(), polls }
                    }
                }
            }
            terminal => terminal.clone(),
        };
        self.state = next;
        &self.state
    }

    /// Step until terminal and decode the per-account results.
    pub async fn run_to_completion(mut self) -> Result<Vec<AccountResult>> {
        while !self.state.is_terminal() {
            self.step().await;
        }
        match self.state {
            RunState::Succeeded(results) => decode_results(results),
            RunState::Failed(reason) => Err(FlowcastError::DelegateFailure(reason)),
            RunState::TimedOut { polls } => Err(FlowcastError::DelegateTimeout { attempts: polls }),
            RunState::Pending | RunState::Submitted { .. } => {
                Err(FlowcastError::DelegateFailure("run did not finish".into()))
            }
        }
    }
}

/// Accepts either a bare array of account results or `{ "results": [...] }`.
fn decode_results(results: Value) -> Result<Vec<AccountResult>> {
    let list = match results {
        Value::Object(mut map) if map.contains_key("results") => map.remove("results").unwrap_or_default(),
        other => other,
    };
    serde_json::from_value(list)
        .map_err(|e| FlowcastError::DelegateFailure(format!("undecodable results: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedDelegate, manual_clock, workflow};
    use flowcast_core::types::TriggerSource;

    fn run(delegate: Arc<ScriptedDelegate>, max_polls: u32) -> (DelegateRun, Arc<flowcast_core::ManualClock>) {
        let clock = manual_clock();
        let graph = WorkflowGraph::for_workflow(&workflow("delegated"), TriggerSource::Manual).unwrap();
        let run = DelegateRun::new(delegate, clock.clone(), graph, json!({}), Duration::from_secs(2), max_polls);
        (run, clock)
    }

    #[tokio::test]
    async fn test_poll_budget_exhausted() {
        let delegate = Arc::new(ScriptedDelegate::running_forever());
        let (mut run, clock) = run(delegate.clone(), 3);
        while !run.step().await.is_terminal() {}
        assert_eq!(run.state(), &RunState::TimedOut { polls: 3 });
        assert_eq!(delegate.polls(), 3);
        assert_eq!(clock.sleep_count(), 3);
    }

    #[tokio::test]
    async fn test_success_after_running() {
        let delegate = Arc::new(ScriptedDelegate::succeeding_after(
            2,
            json!({"results": [{
                "account_identifier": "acme",
                "status": "success",
                "processed_at": "2026-03-01T10:00:00Z"
            }]}),
        ));
        let (run, _) = run(delegate.clone(), 10);
        let results = run.run_to_completion().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].account_identifier, "acme");
        assert_eq!(delegate.polls(), 3);
    }

    #[tokio::test]
    async fn test_submission_error_fails_without_polling() {
        let delegate = Arc::new(ScriptedDelegate::rejecting_submit());
        let (mut run, clock) = run(delegate.clone(), 5);
        assert!(matches!(run.step().await, RunState::Failed(_)));
        assert_eq!(delegate.polls(), 0);
        assert_eq!(clock.sleep_count(), 0);
        // terminal states stay put
        assert!(matches!(run.step().await, RunState::Failed(_)));
    }

    #[tokio::test]
    async fn test_undecodable_results() {
        let delegate = Arc::new(ScriptedDelegate::succeeding_after(0, json!({"results": "nope"})));
        let (run, _) = run(delegate, 5);
        assert!(matches!(run.run_to_completion().await, Err(FlowcastError::DelegateFailure(_))));
    }
}
