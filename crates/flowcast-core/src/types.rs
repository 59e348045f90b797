//! Data model: workflows, executions, plans and queue jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─── Workflow ─────────────────────────────────────────────

/// A stored automation definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger: Trigger,
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub distributors: Vec<DistributorConfig>,
    #[serde(default)]
    pub engine: EngineKind,
    pub enabled: bool,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u32,
}

impl Workflow {
    /// Cron expression, if this workflow is schedule-triggered.
    pub fn cron(&self) -> Option<&str> {
        self.trigger.cron()
    }

    /// Whether the scheduler should hold a registration for this workflow.
    pub fn wants_schedule(&self) -> bool {
        self.enabled && self.cron().is_some()
    }

    /// Job name under which this workflow's schedule is registered.
    pub fn job_name(&self) -> String {
        format!("workflow:{}", self.id)
    }
}

/// How a workflow gets started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Schedule { cron: String },
    Event { name: String },
}

impl Trigger {
    pub fn cron(&self) -> Option<&str> {
        match self {
            Trigger::Schedule { cron } => Some(cron.as_str()),
            _ => None,
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        match self {
            Trigger::Event { name } => Some(name.as_str()),
            _ => None,
        }
    }
}

/// One target account plus its per-account overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountConfig {
    pub account_identifier: String,
    #[serde(default)]
    pub customization: Map<String, Value>,
}

impl AccountConfig {
    pub fn new(account_identifier: &str) -> Self {
        Self {
            account_identifier: account_identifier.to_string(),
            customization: Map::new(),
        }
    }
}

/// One delivery target of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistributorConfig {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub config: Value,
}

impl DistributorConfig {
    pub fn new(channel_type: ChannelType, config: Value) -> Self {
        Self { channel_type, config }
    }
}

/// Closed set of delivery channels. Tags outside the set are kept verbatim
/// so they can be reported as unknown distributors at fan-out time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelType {
    Messaging,
    Email,
    Crm,
    Webhook,
    Unknown(String),
}

impl ChannelType {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelType::Messaging => "messaging",
            ChannelType::Email => "email",
            ChannelType::Crm => "crm",
            ChannelType::Webhook => "webhook",
            ChannelType::Unknown(tag) => tag.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ChannelType::Unknown(_))
    }
}

impl From<String> for ChannelType {
    fn from(tag: String) -> Self {
        match tag.to_lowercase().as_str() {
            "messaging" | "slack" => ChannelType::Messaging,
            "email" => ChannelType::Email,
            "crm" => ChannelType::Crm,
            "webhook" => ChannelType::Webhook,
            _ => ChannelType::Unknown(tag),
        }
    }
}

impl From<ChannelType> for String {
    fn from(c: ChannelType) -> Self {
        c.as_str().to_string()
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which engine runs a workflow.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    Internal,
    Delegated,
}

/// Status of the most recent execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Running,
    Completed,
    Failed,
}

/// Input to `create`. Every field is optional so that missing required
/// fields can be reported as validation errors rather than parse errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub accounts: Option<Vec<AccountConfig>>,
    #[serde(default)]
    pub distributors: Option<Vec<DistributorConfig>>,
    #[serde(default)]
    pub engine: Option<EngineKind>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Input to `update`. Absent fields are left as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub accounts: Option<Vec<AccountConfig>>,
    #[serde(default)]
    pub distributors: Option<Vec<DistributorConfig>>,
    #[serde(default)]
    pub engine: Option<EngineKind>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

// ─── Plan ─────────────────────────────────────────────────

/// Content produced for one account by the plan generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub account_identifier: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub executive_summary: Map<String, Value>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
    /// Remaining generator output, preserved untouched.
    #[serde(default, flatten)]
    pub sections: Map<String, Value>,
}

impl Plan {
    pub fn new(account_identifier: &str, title: &str) -> Self {
        Self {
            account_identifier: account_identifier.to_string(),
            title: title.to_string(),
            executive_summary: Map::new(),
            focus_areas: Vec::new(),
            generated_at: Utc::now(),
            sections: Map::new(),
        }
    }

    /// Plain-text rendering used by text channels.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        if self.title.is_empty() {
            out.push_str(&format!("Account plan: {}\n", self.account_identifier));
        } else {
            out.push_str(&format!("{} ({})\n", self.title, self.account_identifier));
        }
        if !self.executive_summary.is_empty() {
            out.push_str("\nExecutive summary\n");
            for (key, value) in &self.executive_summary {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out.push_str(&format!("- {key}: {text}\n"));
            }
        }
        if !self.focus_areas.is_empty() {
            out.push_str(&format!("\nFocus areas: {}\n", self.focus_areas.join(", ")));
        }
        out
    }
}

// ─── Execution ────────────────────────────────────────────

/// Why an execution was started, plus caller-supplied data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    pub source: TriggerSource,
    #[serde(default)]
    pub data: Value,
}

impl ExecutionContext {
    pub fn manual() -> Self {
        Self { source: TriggerSource::Manual, data: Value::Null }
    }

    pub fn with_source(source: TriggerSource, data: Value) -> Self {
        Self { source, data }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::manual()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Schedule,
    Recurring,
    Event,
    Queue,
}

/// One concrete run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub engine: EngineUsed,
    #[serde(default)]
    pub fallback_reason: Option<String>,
    pub results: Vec<AccountResult>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl Execution {
    pub fn succeeded_accounts(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == OutcomeStatus::Success)
            .count()
    }
}

/// Overall run status. `Success` means the pipeline ran, not that every
/// account or channel succeeded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// Engine that produced the results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineUsed {
    Internal,
    Delegated,
    InternalFallback,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Outcome for one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountResult {
    pub account_identifier: String,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub distribution_results: Vec<DistributionOutcome>,
    #[serde(default)]
    pub error: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl AccountResult {
    pub fn failed(account_identifier: &str, error: String) -> Self {
        Self {
            account_identifier: account_identifier.to_string(),
            status: OutcomeStatus::Failed,
            plan: None,
            distribution_results: Vec::new(),
            error: Some(error),
            processed_at: Utc::now(),
        }
    }
}

/// Outcome for one distributor of one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistributionOutcome {
    pub channel_type: ChannelType,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

// ─── Channels ─────────────────────────────────────────────

/// Passed to every channel handler invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryContext {
    pub account_identifier: String,
    pub execution_id: String,
    pub timestamp: DateTime<Utc>,
}

/// What a channel handler reports back on success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    pub status: DeliveryStatus,
    #[serde(default)]
    pub details: Value,
}

impl Delivery {
    pub fn sent(details: Value) -> Self {
        Self { status: DeliveryStatus::Sent, details }
    }

    pub fn mocked(details: Value) -> Self {
        Self { status: DeliveryStatus::Mocked, details }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Mocked,
}

// ─── Scheduling ───────────────────────────────────────────

/// Persisted schedule record, keyed by workflow name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleMetadata {
    pub cron_expression: String,
    pub workflow: Workflow,
    #[serde(default)]
    pub context: Value,
    pub created_at: DateTime<Utc>,
    pub job_name: String,
}

// ─── Queue ────────────────────────────────────────────────

/// Closed set of queue job kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    ExecuteWorkflow,
    ScheduledWorkflow,
    RecurringWorkflow,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ExecuteWorkflow => "execute-workflow",
            JobType::ScheduledWorkflow => "scheduled-workflow",
            JobType::RecurringWorkflow => "recurring-workflow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "execute-workflow" => Some(JobType::ExecuteWorkflow),
            "scheduled-workflow" => Some(JobType::ScheduledWorkflow),
            "recurring-workflow" => Some(JobType::RecurringWorkflow),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored job state. "Delayed" is a waiting job whose `run_at` is in the future.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(JobStatus::Waiting),
            "active" => Some(JobStatus::Active),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A job stored in a persistent queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueJob {
    pub id: String,
    pub queue: String,
    pub job_type: JobType,
    /// Set for recurring occurrences (the registration name).
    #[serde(default)]
    pub name: Option<String>,
    pub payload: Value,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

/// A repeating job registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurringRegistration {
    pub job_name: String,
    pub queue: String,
    pub cron: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Per-queue job counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_type_tags() {
        let d: DistributorConfig =
            serde_json::from_value(json!({"type": "slack", "config": {"channel": "#sales"}}))
                .unwrap();
        assert_eq!(d.channel_type, ChannelType::Messaging);

        let d: DistributorConfig = serde_json::from_value(json!({"type": "fax"})).unwrap();
        assert_eq!(d.channel_type, ChannelType::Unknown("fax".into()));
        assert!(!d.channel_type.is_known());
        assert_eq!(serde_json::to_value(&d).unwrap()["type"], "fax");
    }

    #[test]
    fn test_trigger_tagging() {
        let t: Trigger =
            serde_json::from_value(json!({"type": "schedule", "cron": "0 8 * * 1"})).unwrap();
        assert_eq!(t.cron(), Some("0 8 * * 1"));
        let t: Trigger = serde_json::from_value(json!({"type": "manual"})).unwrap();
        assert!(t.cron().is_none());
    }

    #[test]
    fn test_plan_keeps_unknown_sections() {
        let plan: Plan = serde_json::from_value(json!({
            "account_identifier": "acme",
            "title": "Q3 plan",
            "executive_summary": {"headline": "Grow"},
            "focus_areas": ["expansion"],
            "stakeholders": [{"name": "Dana"}]
        }))
        .unwrap();
        assert_eq!(plan.focus_areas, vec!["expansion"]);
        assert!(plan.sections.contains_key("stakeholders"));
        let text = plan.render_text();
        assert!(text.contains("Q3 plan (acme)"));
        assert!(text.contains("headline: Grow"));
    }

    #[test]
    fn test_job_type_strings() {
        for t in [JobType::ExecuteWorkflow, JobType::ScheduledWorkflow, JobType::RecurringWorkflow] {
            assert_eq!(JobType::parse(t.as_str()), Some(t));
        }
        assert_eq!(
            serde_json::to_value(JobType::RecurringWorkflow).unwrap(),
            json!("recurring-workflow")
        );
    }
}
