//! Provider abstraction

use async_trait::async_trait;

use crate::{CompletionRequest, CompletionResponse, Result};

/// A chat completion backend bound to one credential.
///
/// Rotating between keys means switching between provider instances, which
/// keeps every instance free of shared mutable state.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Short backend name for logs, such as `openai`
    fn name(&self) -> &str;
}
