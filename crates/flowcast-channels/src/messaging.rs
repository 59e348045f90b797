//! Messaging channel: Slack-compatible incoming webhook.
//!
//! Distributor config: `{ "channel": "#sales", "webhook_url": "..." }`, both
//! optional. A per-distributor `webhook_url` overrides the global one.

use async_trait::async_trait;
use serde_json::{Value, json};

use flowcast_core::config::MessagingConfig;
use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::traits::ChannelHandler;
use flowcast_core::types::{ChannelType, Delivery, DeliveryContext, Plan};

use crate::{HTTP_TIMEOUT, read_response, str_field};

pub struct MessagingChannel {
    config: MessagingConfig,
    client: reqwest::Client,
}

impl MessagingChannel {
    pub fn new(config: MessagingConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn webhook_url<'a>(&'a self, distributor: &'a Value) -> Option<&'a str> {
        str_field(distributor, "webhook_url")
            .or_else(|| Some(self.config.webhook_url.as_str()).filter(|u| !u.trim().is_empty()))
    }
}

/// Slack message body for a plan.
fn message_text(plan: &Plan, ctx: &DeliveryContext) -> String {
    format!(
        "📊 {}\n_Execution {} • {}_",
        plan.render_text().trim_end(),
        ctx.execution_id,
        ctx.timestamp.format("%Y-%m-%d %H:%M UTC")
    )
}

#[async_trait]
impl ChannelHandler for MessagingChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Messaging
    }

    async fn initialize(&self) -> Result<()> {
        if self.config.mock || self.config.webhook_url.is_empty() {
            tracing::info!("💬 Messaging channel in mock mode");
        }
        Ok(())
    }

    async fn distribute(&self, plan: &Plan, config: &Value, ctx: &DeliveryContext) -> Result<Delivery> {
        let channel = str_field(config, "channel")
            .map(str::to_string)
            .or_else(|| self.config.default_channel.clone());
        let text = message_text(plan, ctx);

        let url = match self.webhook_url(config) {
            Some(url) if !self.config.mock => url,
            _ => {
                tracing::debug!("💬 [mock] message for {} → {:?}", ctx.account_identifier, channel);
                return Ok(Delivery::mocked(json!({
                    "channel": channel,
                    "text": text,
                })));
            }
        };

        let mut body = json!({ "text": text });
        if let Some(channel) = &channel {
            body["channel"] = json!(channel);
        }
        let resp = self
            .client
            .post(url)
            .json(&body)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map_err(|e| FlowcastError::Channel(format!("Messaging send failed: {e}")))?;
        let response = read_response(resp, "Messaging webhook").await?;

        tracing::info!("✅ Message sent for {}", ctx.account_identifier);
        Ok(Delivery::sent(json!({
            "channel": channel,
            "response": response,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx() -> DeliveryContext {
        DeliveryContext {
            account_identifier: "acme".into(),
            execution_id: "exec-1".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_mock_without_webhook() {
        let channel = MessagingChannel::new(MessagingConfig {
            default_channel: Some("#accounts".into()),
            ..Default::default()
        });
        let plan = Plan::new("acme", "Q3 plan");
        let delivery = channel.distribute(&plan, &json!({}), &ctx()).await.unwrap();
        assert_eq!(delivery.status, flowcast_core::types::DeliveryStatus::Mocked);
        assert_eq!(delivery.details["channel"], "#accounts");
        assert!(delivery.details["text"].as_str().unwrap().contains("Q3 plan (acme)"));
    }

    #[tokio::test]
    async fn test_mock_flag_wins_over_url() {
        let channel = MessagingChannel::new(MessagingConfig {
            webhook_url: "http://127.0.0.1:9/hook".into(),
            mock: true,
            ..Default::default()
        });
        let plan = Plan::new("acme", "");
        let delivery = channel
            .distribute(&plan, &json!({"channel": "#sales"}), &ctx())
            .await
            .unwrap();
        assert_eq!(delivery.details["channel"], "#sales");
    }
}
