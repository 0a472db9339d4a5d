//! Shared types for relaybot-core

use serde::{Deserialize, Serialize};

/// Incoming chat message, as delivered by a gateway
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub channel_id: String,
    pub content: String,
    /// True when the bot itself authored the message
    pub is_from_self: bool,
}

/// Where a response should be delivered
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Reply in the channel the message came from
    #[default]
    Public,
    /// Reply as a direct message to the author
    Private,
}

/// Response to be sent back through the gateway
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub content: String,
    pub delivery: DeliveryMode,
    pub channel_id: String,
    pub author_id: String,
}

impl OutboundResponse {
    /// Build a response addressed to the author or channel of `msg`
    pub fn reply_to(msg: &InboundMessage, content: String, delivery: DeliveryMode) -> Self {
        Self {
            content,
            delivery,
            channel_id: msg.channel_id.clone(),
            author_id: msg.author_id.clone(),
        }
    }

    /// The id of the recipient: the author for private replies, otherwise the channel
    pub fn target(&self) -> &str {
        match self.delivery {
            DeliveryMode::Public => &self.channel_id,
            DeliveryMode::Private => &self.author_id,
        }
    }
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InboundMessage {
        InboundMessage {
            id: "1".to_string(),
            author_id: "42".to_string(),
            author_name: "alice".to_string(),
            channel_id: "7".to_string(),
            content: "hello".to_string(),
            is_from_self: false,
        }
    }

    #[test]
    fn test_reply_target_follows_delivery_mode() {
        let msg = sample();
        let public = OutboundResponse::reply_to(&msg, "hi".to_string(), DeliveryMode::Public);
        assert_eq!(public.target(), "7");

        let private = OutboundResponse::reply_to(&msg, "hi".to_string(), DeliveryMode::Private);
        assert_eq!(private.target(), "42");
    }

    #[test]
    fn test_delivery_mode_serde() {
        let json = serde_json::to_string(&DeliveryMode::Private).unwrap();
        assert_eq!(json, "\"private\"");
        assert_eq!(DeliveryMode::default(), DeliveryMode::Public);
        assert_eq!(DeliveryMode::Private.to_string(), "private");
    }
}
