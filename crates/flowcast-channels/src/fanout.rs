//! Distribution fan-out: one plan, N distributors, independent outcomes.
//!
//! The result always has one entry per configured distributor, in
//! configuration order, whatever happened to the others.

use futures::future::join_all;
use serde_json::Value;

use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::types::{
    DeliveryContext, DistributionOutcome, DistributorConfig, OutcomeStatus, Plan,
};

use crate::registry::ChannelRegistry;

/// Deliver `plan` through every distributor. With `parallel`, handlers run
/// concurrently; output order is unchanged.
pub async fn distribute(
    registry: &ChannelRegistry,
    plan: &Plan,
    distributors: &[DistributorConfig],
    ctx: &DeliveryContext,
    parallel: bool,
) -> Vec<DistributionOutcome> {
    if parallel {
        join_all(distributors.iter().map(|d| deliver_one(registry, plan, d, ctx))).await
    } else {
        let mut outcomes = Vec::with_capacity(distributors.len());
        for distributor in distributors {
            outcomes.push(deliver_one(registry, plan, distributor, ctx).await);
        }
        outcomes
    }
}

async fn deliver_one(
    registry: &ChannelRegistry,
    plan: &Plan,
    distributor: &DistributorConfig,
    ctx: &DeliveryContext,
) -> DistributionOutcome {
    let channel_type = distributor.channel_type.clone();
    match try_deliver(registry, plan, distributor, ctx).await {
        Ok(result) => {
            tracing::debug!("📨 {channel_type} delivered for {}", ctx.account_identifier);
            DistributionOutcome {
                channel_type,
                status: OutcomeStatus::Success,
                result: Some(result),
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!("⚠️ {channel_type} delivery failed for {}: {e}", ctx.account_identifier);
            DistributionOutcome {
                channel_type,
                status: OutcomeStatus::Failed,
                result: None,
                error: Some(e.to_string()),
            }
        }
    }
}

async fn try_deliver(
    registry: &ChannelRegistry,
    plan: &Plan,
    distributor: &DistributorConfig,
    ctx: &DeliveryContext,
) -> Result<Value> {
    let channel_type = &distributor.channel_type;
    if !channel_type.is_known() {
        return Err(FlowcastError::UnknownDistributor(channel_type.to_string()));
    }
    let handler = registry
        .get(channel_type)
        .ok_or_else(|| FlowcastError::UnknownDistributor(format!("{channel_type} (no handler registered)")))?;
    let delivery = handler.distribute(plan, &distributor.config, ctx).await?;
    Ok(serde_json::to_value(delivery)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use flowcast_core::traits::ChannelHandler;
    use flowcast_core::types::{ChannelType, Delivery};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    /// Fails when the distributor config says so; sleeps `delay_ms` first.
    struct Scripted(ChannelType);

    #[async_trait]
    impl ChannelHandler for Scripted {
        fn channel_type(&self) -> ChannelType {
            self.0.clone()
        }

        async fn distribute(&self, _plan: &Plan, config: &Value, ctx: &DeliveryContext) -> Result<Delivery> {
            if let Some(ms) = config.get("delay_ms").and_then(Value::as_u64) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if config.get("fail").and_then(Value::as_bool).unwrap_or(false) {
                return Err(FlowcastError::Channel("smtp refused".into()));
            }
            Ok(Delivery::sent(json!({ "account": ctx.account_identifier, "tag": config["tag"] })))
        }
    }

    fn registry() -> ChannelRegistry {
        let mut r = ChannelRegistry::new();
        r.register(Arc::new(Scripted(ChannelType::Messaging)));
        r.register(Arc::new(Scripted(ChannelType::Email)));
        r.register(Arc::new(Scripted(ChannelType::Crm)));
        r
    }

    fn ctx() -> DeliveryContext {
        DeliveryContext {
            account_identifier: "acme".into(),
            execution_id: "exec-1".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_one_failing_channel_is_isolated() {
        let distributors = vec![
            DistributorConfig::new(ChannelType::Messaging, json!({})),
            DistributorConfig::new(ChannelType::Email, json!({"fail": true})),
            DistributorConfig::new(ChannelType::Crm, json!({})),
        ];
        let out = distribute(&registry(), &Plan::new("acme", "p"), &distributors, &ctx(), false).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].status, OutcomeStatus::Success);
        assert_eq!(out[1].status, OutcomeStatus::Failed);
        assert!(out[1].error.as_deref().unwrap().contains("smtp refused"));
        assert_eq!(out[2].status, OutcomeStatus::Success);
    }

    #[tokio::test]
    async fn test_unknown_and_unregistered_channels() {
        let distributors = vec![
            DistributorConfig::new(ChannelType::Unknown("fax".into()), json!({})),
            DistributorConfig::new(ChannelType::Webhook, json!({})),
            DistributorConfig::new(ChannelType::Messaging, json!({})),
        ];
        let out = distribute(&registry(), &Plan::new("acme", "p"), &distributors, &ctx(), false).await;
        assert_eq!(out.len(), 3);
        assert!(out[0].error.as_deref().unwrap().starts_with("Unknown distributor: fax"));
        assert!(out[1].error.as_deref().unwrap().contains("no handler registered"));
        assert_eq!(out[2].status, OutcomeStatus::Success);
    }

    #[tokio::test]
    async fn test_parallel_keeps_configuration_order() {
        let distributors = vec![
            DistributorConfig::new(ChannelType::Messaging, json!({"delay_ms": 30, "tag": "first"})),
            DistributorConfig::new(ChannelType::Email, json!({"delay_ms": 1, "tag": "second"})),
            DistributorConfig::new(ChannelType::Crm, json!({"fail": true})),
        ];
        let out = distribute(&registry(), &Plan::new("acme", "p"), &distributors, &ctx(), true).await;
        assert_eq!(out[0].result.as_ref().unwrap()["details"]["tag"], "first");
        assert_eq!(out[1].result.as_ref().unwrap()["details"]["tag"], "second");
        assert_eq!(out[2].status, OutcomeStatus::Failed);
    }

    #[tokio::test]
    async fn test_no_distributors() {
        let out = distribute(&registry(), &Plan::new("acme", "p"), &[], &ctx(), false).await;
        assert!(out.is_empty());
    }
}
