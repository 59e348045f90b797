//! # Flowcast Channels
//! Delivery targets for generated plans.
//!
//! Each handler decides by itself whether to deliver live or in mock mode
//! (mock when its live credentials are absent or `mock = true`).
//!
//! ```text
//! fanout::distribute(plan, distributors)
//!   ├── messaging → Slack-compatible incoming webhook
//!   ├── email     → SMTP (lettre)
//!   ├── crm       → PATCH {base_url}/records/{id}
//!   └── webhook   → JSON POST
//! ```

pub mod crm;
pub mod email;
pub mod fanout;
pub mod messaging;
pub mod registry;
pub mod webhook;

pub use crm::CrmChannel;
pub use email::EmailChannel;
pub use fanout::distribute;
pub use messaging::MessagingChannel;
pub use registry::ChannelRegistry;
pub use webhook::WebhookChannel;

use std::time::Duration;

use flowcast_core::error::{FlowcastError, Result};
use serde_json::Value;

/// Per-request timeout for live HTTP deliveries.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// String field of a distributor config object.
pub(crate) fn str_field<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

/// Map a non-2xx response to a channel error, otherwise return its body.
pub(crate) async fn read_response(resp: reqwest::Response, label: &str) -> Result<Value> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(FlowcastError::Channel(format!("{label} error {status}: {body}")));
    }
    Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
}
