//! Generic webhook channel: JSON POST of the full plan.
//!
//! Distributor config: `{ "url": "...", "headers": { "X-Key": "..." } }`.
//! Headers from the global webhook config are sent first, per-distributor
//! headers override them.

use async_trait::async_trait;
use serde_json::{Value, json};

use flowcast_core::config::WebhookConfig;
use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::traits::ChannelHandler;
use flowcast_core::types::{ChannelType, Delivery, DeliveryContext, Plan};

use crate::{HTTP_TIMEOUT, read_response, str_field};

pub struct WebhookChannel {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn headers(&self, distributor: &Value) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(extra) = distributor.get("headers").and_then(Value::as_object) {
            for (k, v) in extra {
                let Some(v) = v.as_str() else { continue };
                headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(k));
                headers.push((k.clone(), v.to_string()));
            }
        }
        headers
    }
}

#[async_trait]
impl ChannelHandler for WebhookChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Webhook
    }

    async fn distribute(&self, plan: &Plan, config: &Value, ctx: &DeliveryContext) -> Result<Delivery> {
        let url = str_field(config, "url")
            .ok_or_else(|| FlowcastError::Channel("webhook distributor needs a 'url'".into()))?;
        let body = json!({
            "account_identifier": ctx.account_identifier,
            "execution_id": ctx.execution_id,
            "timestamp": ctx.timestamp,
            "plan": plan,
        });

        if self.config.mock {
            tracing::debug!("🌐 [mock] webhook {url}");
            return Ok(Delivery::mocked(json!({ "url": url })));
        }

        let mut req = self.client.post(url).json(&body).timeout(HTTP_TIMEOUT);
        for (k, v) in self.headers(config) {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| FlowcastError::Channel(format!("Webhook send failed: {e}")))?;
        let response = read_response(resp, "Webhook").await?;

        tracing::info!("✅ Webhook delivered: {url}");
        Ok(Delivery::sent(json!({ "url": url, "response": response })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    #[test]
    fn test_distributor_headers_override() {
        let channel = WebhookChannel::new(WebhookConfig {
            headers: HashMap::from([("X-Api-Key".to_string(), "global".to_string())]),
            mock: false,
        });
        let headers = channel.headers(&json!({"headers": {"x-api-key": "local", "X-Trace": "1"}}));
        assert_eq!(headers.len(), 2);
        assert!(headers.contains(&("x-api-key".into(), "local".into())));
    }

    #[tokio::test]
    async fn test_missing_url_is_an_error() {
        let channel = WebhookChannel::new(WebhookConfig { mock: true, ..Default::default() });
        let ctx = DeliveryContext {
            account_identifier: "acme".into(),
            execution_id: "e".into(),
            timestamp: Utc::now(),
        };
        let err = channel.distribute(&Plan::new("acme", ""), &json!({}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("url"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails() {
        let channel = WebhookChannel::new(WebhookConfig::default());
        let ctx = DeliveryContext {
            account_identifier: "acme".into(),
            execution_id: "e".into(),
            timestamp: Utc::now(),
        };
        let result = channel
            .distribute(&Plan::new("acme", ""), &json!({"url": "http://127.0.0.1:9/hook"}), &ctx)
            .await;
        assert!(matches!(result, Err(FlowcastError::Channel(_))));
    }
}
