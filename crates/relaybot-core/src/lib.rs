//! relaybot-core - message routing and completion policy for relaybot
//!
//! This crate provides:
//! - Completion provider trait with a typed error taxonomy and an OpenAI client
//! - Response resolver that walks candidate models and maps failures to replies
//! - Message router that picks public or private delivery and dispatches replies
//! - The delivery trait implemented by chat platform adapters

pub mod delivery;
pub mod providers;
pub mod resolver;
pub mod router;
pub mod types;

// Re-export main types for convenience
pub use delivery::ChatGateway;
pub use providers::{
    CompletionClient, CompletionError, CompletionRequest, GenerationParams, OpenAiClient,
    OpenAiEndpoint,
};
pub use resolver::ResponseResolver;
pub use router::MessageRouter;
pub use types::{DeliveryMode, InboundMessage, OutboundResponse};
