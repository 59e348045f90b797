//! Plan generators: remote HTTP service or offline template.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use flowcast_core::clock::Clock;
use flowcast_core::config::PlannerConfig;
use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::traits::PlanGenerator;
use flowcast_core::types::Plan;

/// Build the configured generator: HTTP when a base URL is set, template otherwise.
pub fn from_config(config: &PlannerConfig, clock: Arc<dyn Clock>) -> Arc<dyn PlanGenerator> {
    match config.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(base_url) => {
            tracing::info!("🧠 Plan generator: {base_url}");
            Arc::new(HttpPlanGenerator::new(
                base_url,
                &config.api_key,
                Duration::from_secs(config.timeout_secs.unwrap_or(60)),
            ))
        }
        None => {
            tracing::info!("🧠 Plan generator: built-in template");
            Arc::new(TemplatePlanGenerator::new(clock))
        }
    }
}

/// Fetches plans from `GET {base_url}/accounts/{id}/plan`.
pub struct HttpPlanGenerator {
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpPlanGenerator {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    fn plan_url(&self, account_identifier: &str) -> String {
        format!("{}/accounts/{account_identifier}/plan", self.base_url)
    }
}

/// Decode a generator response. The account identifier is filled in when
/// the service leaves it out; a `plan` envelope is unwrapped.
fn decode_plan(account_identifier: &str, body: Value) -> Result<Plan> {
    let mut body = match body {
        Value::Object(mut map) if map.get("plan").is_some_and(Value::is_object) => {
            map.remove("plan").unwrap_or_default()
        }
        other => other,
    };
    let Some(object) = body.as_object_mut() else {
        return Err(FlowcastError::Plan(format!(
            "plan for '{account_identifier}' is not a JSON object"
        )));
    };
    object
        .entry("account_identifier")
        .or_insert_with(|| json!(account_identifier));
    serde_json::from_value(body)
        .map_err(|e| FlowcastError::Plan(format!("undecodable plan for '{account_identifier}': {e}")))
}

#[async_trait]
impl PlanGenerator for HttpPlanGenerator {
    async fn generate_plan(&self, account_identifier: &str) -> Result<Plan> {
        let mut req = self
            .client
            .get(self.plan_url(account_identifier))
            .timeout(self.timeout);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| FlowcastError::Plan(format!("plan service unreachable: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FlowcastError::Plan(format!(
                "plan service error {status} for '{account_identifier}': {body}"
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| FlowcastError::Plan(format!("invalid plan response: {e}")))?;
        decode_plan(account_identifier, body)
    }
}

/// Offline skeleton plan, used when no plan service is configured.
pub struct TemplatePlanGenerator {
    clock: Arc<dyn Clock>,
}

impl TemplatePlanGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl PlanGenerator for TemplatePlanGenerator {
    async fn generate_plan(&self, account_identifier: &str) -> Result<Plan> {
        let mut summary = Map::new();
        summary.insert("overview".into(), json!(format!("Account review for {account_identifier}")));
        summary.insert("source".into(), json!("template"));

        let mut plan = Plan::new(account_identifier, &format!("Account plan: {account_identifier}"));
        plan.executive_summary = summary;
        plan.focus_areas = vec!["relationship health".into(), "open opportunities".into()];
        plan.generated_at = self.clock.now();
        Ok(plan)
    }
}
