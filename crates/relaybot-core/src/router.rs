//! Inbound message handling: prompt extraction, resolution and delivery

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::delivery::ChatGateway;
use crate::resolver::ResponseResolver;
use crate::types::{DeliveryMode, InboundMessage, OutboundResponse};

/// Default prefix that requests a private reply
pub const DEFAULT_PRIVATE_PREFIX: char = '?';

/// Routes each inbound message to the resolver and delivers the reply.
///
/// Every message is handled on its own; nothing is carried between calls.
pub struct MessageRouter {
    resolver: ResponseResolver,
    gateway: Arc<dyn ChatGateway>,
    models: Vec<String>,
    private_prefix: char,
}

impl MessageRouter {
    pub fn new(resolver: ResponseResolver, gateway: Arc<dyn ChatGateway>, models: Vec<String>) -> Self {
        Self {
            resolver,
            gateway,
            models,
            private_prefix: DEFAULT_PRIVATE_PREFIX,
        }
    }

    /// Set the leading character that switches a reply to a direct message
    pub fn with_private_prefix(mut self, prefix: char) -> Self {
        self.private_prefix = prefix;
        self
    }

    /// Candidate models, in fallback order
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Handle one inbound message. Sends at most one response and never fails.
    pub async fn handle(&self, msg: InboundMessage) {
        if msg.is_from_self {
            return;
        }

        info!("[{}] {}: \"{}\"", msg.channel_id, msg.author_name, msg.content);

        let Some((delivery, prompt)) = split_prompt(&msg.content, self.private_prefix) else {
            info!("(Message was empty, check that the message content intent is enabled)");
            return;
        };

        let reply = self.resolver.resolve(prompt, &self.models).await;
        let response = OutboundResponse::reply_to(&msg, reply, delivery);
        let target = response.target().to_string();

        debug!(
            "Delivering {} reply to message {} ({} chars) via {} to {}",
            delivery,
            msg.id,
            response.content.chars().count(),
            self.gateway.name(),
            target
        );

        if let Err(e) = self.gateway.send(response).await {
            error!(
                "Error sending {} reply to message {} to {}: {}",
                delivery, msg.id, target, e
            );
        }
    }
}

/// Decide the delivery mode and the prompt for `content`.
///
/// Returns None for empty content. A leading `prefix` selects private delivery
/// and is removed from the prompt.
pub fn split_prompt(content: &str, prefix: char) -> Option<(DeliveryMode, &str)> {
    if content.is_empty() {
        return None;
    }

    match content.strip_prefix(prefix) {
        Some(rest) => Some((DeliveryMode::Private, rest)),
        None => Some((DeliveryMode::Public, content)),
    }
}
