//! Delegated workflow engine trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::graph::WorkflowGraph;

/// Handle to a run accepted by the external engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunHandle {
    pub run_id: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DelegateRunState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl DelegateRunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DelegateRunState::Succeeded | DelegateRunState::Failed)
    }
}

/// Poll response from the external engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelegateStatus {
    pub status: DelegateRunState,
    #[serde(default)]
    pub results: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// External workflow engine the core can offload a run to.
#[async_trait]
pub trait DelegateEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn health_check(&self) -> Result<bool>;

    async fn submit(&self, definition: &WorkflowGraph, input: &Value) -> Result<RunHandle>;

    async fn poll_status(&self, handle: &RunHandle) -> Result<DelegateStatus>;
}
