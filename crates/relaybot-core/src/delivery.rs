//! Outbound delivery seam between the router and a chat platform

use anyhow::Result;
use async_trait::async_trait;

use crate::types::OutboundResponse;

/// Send side of a chat gateway.
///
/// Implementations deliver public responses to `channel_id` and private
/// responses as a direct message to `author_id`.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Platform name used in logs (e.g. "discord")
    fn name(&self) -> &str;

    /// Deliver a response once; callers do not retry
    async fn send(&self, response: OutboundResponse) -> Result<()>;
}
