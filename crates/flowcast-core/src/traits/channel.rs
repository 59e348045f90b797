//! Channel trait: one handler per distributor type.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::{ChannelType, Delivery, DeliveryContext, Plan};

/// A delivery target for generated plans.
///
/// Handlers decide their own mock-vs-live behaviour. A returned `Err` is
/// recorded as a failed distribution for that entry only.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// One-time setup before the first delivery.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn distribute(&self, plan: &Plan, config: &Value, ctx: &DeliveryContext) -> Result<Delivery>;
}
