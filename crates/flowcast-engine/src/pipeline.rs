//! Account pipeline: plan → customize → distribute, for one account.
//!
//! Failures are contained: a plan error becomes a failed result for this
//! account only, a channel error a failed entry in its distribution results.

use std::sync::Arc;

use serde_json::{Map, Value};

use flowcast_channels::{ChannelRegistry, fanout};
use flowcast_core::clock::Clock;
use flowcast_core::traits::PlanGenerator;
use flowcast_core::types::{
    AccountConfig, AccountResult, DeliveryContext, DistributorConfig, ExecutionContext,
    OutcomeStatus, Plan,
};

pub struct AccountPipeline {
    planner: Arc<dyn PlanGenerator>,
    channels: Arc<ChannelRegistry>,
    clock: Arc<dyn Clock>,
    parallel_channels: bool,
}

impl AccountPipeline {
    pub fn new(
        planner: Arc<dyn PlanGenerator>,
        channels: Arc<ChannelRegistry>,
        clock: Arc<dyn Clock>,
        parallel_channels: bool,
    ) -> Self {
        Self {
            planner,
            channels,
            clock,
            parallel_channels,
        }
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub async fn process_account(
        &self,
        account: &AccountConfig,
        distributors: &[DistributorConfig],
        execution_id: &str,
        context: &ExecutionContext,
    ) -> AccountResult {
        let id = account.account_identifier.as_str();
        tracing::debug!("🏢 Processing account {id} ({:?} run {execution_id})", context.source);

        let mut plan = match self.planner.generate_plan(id).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!("⚠️ Plan generation failed for {id}: {e}");
                let mut failed = AccountResult::failed(id, e.to_string());
                failed.processed_at = self.clock.now();
                return failed;
            }
        };
        apply_customization(&mut plan, &account.customization);

        let ctx = DeliveryContext {
            account_identifier: id.to_string(),
            execution_id: execution_id.to_string(),
            timestamp: self.clock.now(),
        };
        let distribution_results =
            fanout::distribute(&self.channels, &plan, distributors, &ctx, self.parallel_channels).await;

        AccountResult {
            account_identifier: id.to_string(),
            status: OutcomeStatus::Success,
            plan: Some(plan),
            distribution_results,
            error: None,
            processed_at: self.clock.now(),
        }
    }
}

/// Shallow-merge per-account overrides onto named plan sections.
///
/// - `executive_summary`: object, keys merged over the generated ones
/// - `focus_areas`: array or string, appended without duplicates
/// - `title`: string, replaces
///
/// Other keys are ignored.
pub fn apply_customization(plan: &mut Plan, customization: &Map<String, Value>) {
    for (key, value) in customization {
        match (key.as_str(), value) {
            ("executive_summary", Value::Object(extra)) => {
                for (k, v) in extra {
                    plan.executive_summary.insert(k.clone(), v.clone());
                }
            }
            ("focus_areas", Value::Array(tags)) => {
                for tag in tags.iter().filter_map(Value::as_str) {
                    push_unique(&mut plan.focus_areas, tag);
                }
            }
            ("focus_areas", Value::String(tag)) => push_unique(&mut plan.focus_areas, tag),
            ("title", Value::String(title)) => plan.title = title.clone(),
            _ => tracing::debug!(
                "Ignoring customization '{key}' for {}",
                plan.account_identifier
            ),
        }
    }
}

fn push_unique(tags: &mut Vec<String>, tag: &str) {
    let tag = tag.trim();
    if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
        tags.push(tag.to_string());
    }
}
