//! Model fallback and error-to-reply mapping

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::providers::{CompletionClient, CompletionError, CompletionRequest, GenerationParams};

pub const RATE_LIMIT_REPLY: &str = "Rate limit exceeded. Please try again later.";
pub const PLAN_UPGRADE_REPLY: &str = "You have reached the limits of the free plan. Please consider upgrading to a Plus or Team plan for more access.";
pub const INVALID_REQUEST_REPLY: &str = "There was an error with the request. Please try again.";
pub const AUTHENTICATION_REPLY: &str = "Authentication failed. Please check the API key.";
pub const PROVIDER_ERROR_REPLY: &str = "An error occurred with OpenAI's API. Please try again later.";
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't process your request.";

/// Substring of an invalid-request message that signals an exhausted free plan
const PLAN_UPGRADE_MARKER: &str = "upgrade your plan";

/// Turns a prompt into a user-facing reply, trying candidate models in order.
///
/// The first successful completion wins. A classified failure (rate limit,
/// invalid request, authentication, provider error) ends the attempt with its
/// fixed reply and does not consult the remaining candidates. Only
/// unclassified failures move on to the next model.
pub struct ResponseResolver {
    client: Arc<dyn CompletionClient>,
    params: GenerationParams,
}

impl ResponseResolver {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            params: GenerationParams::default(),
        }
    }

    /// Override the generation parameters sent with each request
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Resolve `prompt` against `models`. Never fails.
    pub async fn resolve(&self, prompt: &str, models: &[String]) -> String {
        for (idx, model) in models.iter().enumerate() {
            debug!(
                "Trying {} model {} ({}/{})",
                self.client.provider_name(),
                model,
                idx + 1,
                models.len()
            );

            let request = CompletionRequest {
                model: model.clone(),
                prompt: prompt.to_string(),
                params: self.params.clone(),
            };

            match self.client.complete(&request).await {
                Ok(text) => {
                    if idx > 0 {
                        info!("Request succeeded on fallback model {}", model);
                    }
                    return text.trim().to_string();
                }
                Err(e) => {
                    if let Some(reply) = classified_reply(&e) {
                        warn!("Completion with {} failed: {}", model, e);
                        return reply.to_string();
                    }

                    error!(
                        "Error fetching response from {} using {}: {}",
                        self.client.provider_name(),
                        model,
                        e
                    );
                    if let Some(next) = models.get(idx + 1) {
                        info!("Falling back from {} to {}", model, next);
                    }
                }
            }
        }

        FALLBACK_REPLY.to_string()
    }
}

/// The fixed reply for a classified failure, or None when the failure is unclassified
pub fn classified_reply(err: &CompletionError) -> Option<&'static str> {
    match err {
        CompletionError::RateLimit(_) => Some(RATE_LIMIT_REPLY),
        CompletionError::InvalidRequest(message) if message.contains(PLAN_UPGRADE_MARKER) => {
            Some(PLAN_UPGRADE_REPLY)
        }
        CompletionError::InvalidRequest(_) => Some(INVALID_REQUEST_REPLY),
        CompletionError::Authentication(_) => Some(AUTHENTICATION_REPLY),
        CompletionError::Provider { .. } => Some(PROVIDER_ERROR_REPLY),
        CompletionError::Other(_) => None,
    }
}
