//! Plan generator trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Plan;

/// Produces the content distributed for an account.
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate_plan(&self, account_identifier: &str) -> Result<Plan>;
}
