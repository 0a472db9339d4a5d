//! Completion provider abstraction
//!
//! Providers implement the [`CompletionClient`] trait and report failures as a
//! typed [`CompletionError`], which [`crate::resolver::ResponseResolver`] maps to
//! user-facing replies.

pub mod openai;
pub mod types;

pub use openai::{OpenAiClient, OpenAiEndpoint};
pub use types::{CompletionClient, CompletionError, CompletionRequest, GenerationParams};
