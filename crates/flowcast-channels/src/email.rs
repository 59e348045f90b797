//! Email channel: plans sent over SMTP (async lettre, STARTTLS).
//!
//! Distributor config: `{ "to": ["a@example.com"], "subject": "..." }`.
//! `to` may also be a single string.

use async_trait::async_trait;
use serde_json::{Value, json};

use flowcast_core::config::SmtpConfig;
use flowcast_core::error::{FlowcastError, Result};
use flowcast_core::traits::ChannelHandler;
use flowcast_core::types::{ChannelType, Delivery, DeliveryContext, Plan};

use crate::str_field;

pub struct EmailChannel {
    config: SmtpConfig,
}

impl EmailChannel {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn is_live(&self) -> bool {
        !self.config.mock && !self.config.smtp_host.trim().is_empty()
    }

    async fn send(&self, recipients: &[String], subject: &str, body: String) -> Result<()> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message, message::Mailbox,
            message::header::ContentType, transport::smtp::authentication::Credentials,
        };

        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e| FlowcastError::Channel(format!("Invalid from: {e}")))?;
        let mut builder = Message::builder()
            .from(from)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for to in recipients {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| FlowcastError::Channel(format!("Invalid to '{to}': {e}")))?;
            builder = builder.to(mailbox);
        }
        let email = builder
            .body(body)
            .map_err(|e| FlowcastError::Channel(format!("Build email: {e}")))?;

        let mut transport = AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.config.smtp_host)
            .map_err(|e| FlowcastError::Channel(format!("SMTP relay: {e}")))?
            .port(self.config.smtp_port);
        if !self.config.username.is_empty() {
            transport = transport.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ));
        }
        transport
            .build()
            .send(email)
            .await
            .map_err(|e| FlowcastError::Channel(format!("SMTP send: {e}")))?;
        Ok(())
    }
}

/// Recipient list from distributor config.
fn recipients(config: &Value) -> Result<Vec<String>> {
    let list: Vec<String> = match config.get("to") {
        Some(Value::String(one)) => vec![one.clone()],
        Some(Value::Array(many)) => many
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    let list: Vec<String> = list.into_iter().filter(|s| !s.trim().is_empty()).collect();
    if list.is_empty() {
        return Err(FlowcastError::Channel(
            "email distributor needs at least one 'to' address".into(),
        ));
    }
    Ok(list)
}

#[async_trait]
impl ChannelHandler for EmailChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn initialize(&self) -> Result<()> {
        if self.is_live() {
            tracing::info!("📧 Email channel via {}:{}", self.config.smtp_host, self.config.smtp_port);
        } else {
            tracing::info!("📧 Email channel in mock mode");
        }
        Ok(())
    }

    async fn distribute(&self, plan: &Plan, config: &Value, ctx: &DeliveryContext) -> Result<Delivery> {
        let to = recipients(config)?;
        let subject = str_field(config, "subject")
            .map(str::to_string)
            .unwrap_or_else(|| match plan.title.as_str() {
                "" => format!("Account plan: {}", ctx.account_identifier),
                title => title.to_string(),
            });
        let body = format!(
            "{}\n--\nExecution {} at {}\n",
            plan.render_text(),
            ctx.execution_id,
            ctx.timestamp.to_rfc3339()
        );

        if !self.is_live() {
            tracing::debug!("📧 [mock] email for {} → {}", ctx.account_identifier, to.join(", "));
            return Ok(Delivery::mocked(json!({ "to": to, "subject": subject })));
        }

        self.send(&to, &subject, body).await?;
        tracing::info!("📤 Email sent to: {}", to.join(", "));
        Ok(Delivery::sent(json!({ "to": to, "subject": subject })))
    }
}
