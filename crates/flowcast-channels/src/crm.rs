//! CRM channel: writes the plan summary onto a CRM record.
//!
//! `PATCH {base_url}/records/{record_id}` with a bearer token. The record id
//! comes from the distributor config and defaults to the account identifier.

use async_trait::async_trait;
use serde_json::{Value, json};

use flowcast_core::config::CrmConfig;
use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::traits::ChannelHandler;
use flowcast_core::types::{ChannelType, Delivery, DeliveryContext, Plan};

use crate::{HTTP_TIMEOUT, read_response, str_field};

pub struct CrmChannel {
    config: CrmConfig,
    client: reqwest::Client,
}

impl CrmChannel {
    pub fn new(config: CrmConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn is_live(&self) -> bool {
        !self.config.mock && !self.config.base_url.trim().is_empty()
    }

    fn record_url(&self, record_id: &str) -> String {
        format!("{}/records/{record_id}", self.config.base_url.trim_end_matches('/'))
    }
}

/// Fields written onto the record.
fn record_update(plan: &Plan, ctx: &DeliveryContext) -> Value {
    json!({
        "account_identifier": plan.account_identifier,
        "plan_title": plan.title,
        "executive_summary": plan.executive_summary,
        "focus_areas": plan.focus_areas,
        "execution_id": ctx.execution_id,
        "updated_at": ctx.timestamp,
    })
}

#[async_trait]
impl ChannelHandler for CrmChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Crm
    }

    async fn initialize(&self) -> Result<()> {
        if !self.is_live() {
            tracing::info!("🗂️ CRM channel in mock mode");
        }
        Ok(())
    }

    async fn distribute(&self, plan: &Plan, config: &Value, ctx: &DeliveryContext) -> Result<Delivery> {
        let record_id = str_field(config, "record_id").unwrap_or(ctx.account_identifier.as_str());
        let update = record_update(plan, ctx);

        if !self.is_live() {
            tracing::debug!("🗂️ [mock] CRM update for record {record_id}");
            return Ok(Delivery::mocked(json!({ "record_id": record_id, "fields": update })));
        }

        let mut req = self
            .client
            .patch(self.record_url(record_id))
            .json(&update)
            .timeout(HTTP_TIMEOUT);
        if !self.config.api_token.is_empty() {
            req = req.bearer_auth(&self.config.api_token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| FlowcastError::Channel(format!("CRM update failed: {e}")))?;
        let response = read_response(resp, "CRM API").await?;

        tracing::info!("✅ CRM record {record_id} updated");
        Ok(Delivery::sent(json!({ "record_id": record_id, "response": response })))
    }
}
