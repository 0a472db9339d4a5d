//! Provider-agnostic types for text completion

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sampling parameters sent with every completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    /// Number of candidates to generate
    pub n: u32,
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 150,
            n: 1,
            temperature: 0.7,
            stop: None,
        }
    }
}

/// A single completion request against one model
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub params: GenerationParams,
}

/// Failure kinds reported by a completion provider
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Any other error status reported by the provider itself
    #[error("provider error (status {status}): {message}")]
    Provider { status: u16, message: String },

    /// Transport failures, undecodable responses and everything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CompletionError {
    /// Whether this failure maps to a fixed user-facing message
    pub fn is_classified(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// Trait that all completion providers implement
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Human-readable provider name (e.g. "openai")
    fn provider_name(&self) -> &str;

    /// Generate text for the request, returning the first candidate untrimmed
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_generation_params_default() {
        let params = GenerationParams::default();
        assert_eq!(params.max_tokens, 150);
        assert_eq!(params.n, 1);
        assert!((params.temperature - 0.7).abs() < f64::EPSILON);
        assert!(params.stop.is_none());
    }

    #[test]
    fn test_is_classified() {
        assert!(CompletionError::RateLimit("slow down".to_string()).is_classified());
        assert!(CompletionError::Authentication("bad key".to_string()).is_classified());
        assert!(
            CompletionError::Provider {
                status: 503,
                message: "overloaded".to_string()
            }
            .is_classified()
        );
        assert!(!CompletionError::Other(anyhow!("connection reset")).is_classified());
    }

    #[test]
    fn test_error_display() {
        let err = CompletionError::Provider {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "provider error (status 500): boom");

        let err = CompletionError::InvalidRequest("bad model".to_string());
        assert_eq!(err.to_string(), "invalid request: bad model");
    }
}
