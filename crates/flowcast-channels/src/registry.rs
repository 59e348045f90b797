//! Handler lookup by channel type.

use std::collections::HashMap;
use std::sync::Arc;

use flowcast_core::config::ChannelsConfig;
use flowcast_core::traits::ChannelHandler;
use flowcast_core::types::ChannelType;

use crate::{CrmChannel, EmailChannel, MessagingChannel, WebhookChannel};

#[derive(Default, Clone)]
pub struct ChannelRegistry {
    handlers: HashMap<ChannelType, Arc<dyn ChannelHandler>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler, configured from `[channels]`.
    pub fn from_config(config: &ChannelsConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MessagingChannel::new(config.messaging.clone())));
        registry.register(Arc::new(EmailChannel::new(config.email.clone())));
        registry.register(Arc::new(CrmChannel::new(config.crm.clone())));
        registry.register(Arc::new(WebhookChannel::new(config.webhook.clone())));
        registry
    }

    /// Add or replace the handler for its channel type.
    pub fn register(&mut self, handler: Arc<dyn ChannelHandler>) {
        self.handlers.insert(handler.channel_type(), handler);
    }

    pub fn get(&self, channel_type: &ChannelType) -> Option<Arc<dyn ChannelHandler>> {
        self.handlers.get(channel_type).cloned()
    }

    pub fn channel_types(&self) -> Vec<ChannelType> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }

    /// Run every handler's `initialize`. A failing handler stays registered;
    /// its deliveries will fail individually.
    pub async fn initialize_all(&self) {
        for (channel_type, handler) in &self.handlers {
            if let Err(e) = handler.initialize().await {
                tracing::warn!("⚠️ Channel '{channel_type}' failed to initialize: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_registers_builtins() {
        let registry = ChannelRegistry::from_config(&ChannelsConfig::default());
        assert_eq!(
            registry.channel_types(),
            vec![ChannelType::Crm, ChannelType::Email, ChannelType::Messaging, ChannelType::Webhook]
        );
        assert!(registry.get(&ChannelType::Unknown("fax".into())).is_none());
    }
}
