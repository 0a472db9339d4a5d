//! OpenAI completion client (chat completions and legacy text completions)

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::types::{CompletionClient, CompletionError, CompletionRequest};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Which OpenAI API the prompt is posted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAiEndpoint {
    /// `/v1/chat/completions`, prompt sent as a single user message
    #[default]
    Chat,
    /// `/v1/completions`, prompt sent verbatim
    Completions,
}

impl std::fmt::Display for OpenAiEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Completions => write!(f, "completions"),
        }
    }
}

/// OpenAI client
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    endpoint: OpenAiEndpoint,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: build_http_client(DEFAULT_TIMEOUT),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            endpoint: OpenAiEndpoint::default(),
        }
    }

    /// Select the chat or legacy completions API
    pub fn with_endpoint(mut self, endpoint: OpenAiEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_http_client(timeout);
        self
    }

    fn url(&self) -> String {
        match self.endpoint {
            OpenAiEndpoint::Chat => format!("{}/v1/chat/completions", self.base_url),
            OpenAiEndpoint::Completions => format!("{}/v1/completions", self.base_url),
        }
    }

    /// Build the JSON request body for the configured endpoint
    fn to_request_body(endpoint: OpenAiEndpoint, request: &CompletionRequest) -> Value {
        let params = &request.params;
        let mut body = match endpoint {
            OpenAiEndpoint::Chat => serde_json::json!({
                "model": request.model,
                "messages": [{ "role": "user", "content": request.prompt }],
            }),
            OpenAiEndpoint::Completions => serde_json::json!({
                "model": request.model,
                "prompt": request.prompt,
            }),
        };

        body["max_tokens"] = Value::from(params.max_tokens);
        body["n"] = Value::from(params.n);
        body["temperature"] = Value::from(params.temperature);
        if let Some(stop) = &params.stop {
            body["stop"] = Value::from(stop.clone());
        }

        body
    }

    /// Pull the first candidate's text out of a successful response
    fn from_openai_response(resp: OpenAiApiResponse) -> Result<String, CompletionError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OpenAI response had no choices"))?;

        let text = choice
            .message
            .and_then(|m| m.content)
            .or(choice.text)
            .ok_or_else(|| anyhow!("OpenAI response choice had no text"))?;

        Ok(text)
    }
}

fn build_http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .expect("Failed to build HTTP client")
}

/// Map a non-success HTTP status and its body to a typed failure
fn classify_failure(status: StatusCode, body: &str) -> CompletionError {
    let message = match serde_json::from_str::<OpenAiErrorBody>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => parsed.error.message,
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
    };

    match status.as_u16() {
        429 => CompletionError::RateLimit(message),
        400 | 404 | 415 => CompletionError::InvalidRequest(message),
        401 => CompletionError::Authentication(message),
        code => CompletionError::Provider {
            status: code,
            message,
        },
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let url = self.url();
        let body = Self::to_request_body(self.endpoint, request);

        debug!(
            "OpenAI request: model={}, endpoint={}, prompt={} chars",
            request.model,
            self.endpoint,
            request.prompt.chars().count()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_failure(status, &error_text));
        }

        let api_response: OpenAiApiResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI API response")?;

        debug!(
            "OpenAI response: choices={}, finish_reason={:?}",
            api_response.choices.len(),
            api_response.choices.first().map(|c| &c.finish_reason)
        );

        Self::from_openai_response(api_response)
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    message: Option<OpenAiChoiceMessage>,
    #[serde(default)]
    text: Option<String>,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiErrorDetail {
    #[serde(default)]
    message: String,
}
