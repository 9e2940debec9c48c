//! Completion request and response types

use serde::{Deserialize, Serialize};

use crate::Message;

const DEFAULT_MAX_TOKENS: usize = 2048;

/// One chat completion call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model name as the endpoint knows it
    pub model: String,
    pub messages: Vec<Message>,
    /// Sent ahead of `messages` as a system message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn builder(model: impl Into<String>) -> CompletionRequestBuilder {
        CompletionRequestBuilder {
            request: Self {
                model: model.into(),
                messages: Vec::new(),
                system: None,
                max_tokens: DEFAULT_MAX_TOKENS,
                temperature: None,
            },
        }
    }
}

/// Builder for [`CompletionRequest`]
#[derive(Debug, Clone)]
pub struct CompletionRequestBuilder {
    request: CompletionRequest,
}

impl CompletionRequestBuilder {
    pub fn add_message(mut self, message: Message) -> Self {
        self.request.messages.push(message);
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.request.system = Some(system.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.request.max_tokens = max_tokens;
        self
    }

    /// Sampling temperature, clamped to 0.0..=2.0
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.request.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn build(self) -> CompletionRequest {
        self.request
    }
}

/// Model reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub message: Message,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

impl CompletionResponse {
    /// The reply was cut off by the token limit
    pub fn is_truncated(&self) -> bool {
        self.stop_reason == StopReason::MaxTokens
    }
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    /// Output withheld by the provider's content filter
    ContentFilter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let request = CompletionRequest::builder("gpt-4o-mini")
            .add_message(Message::user("Analyze 600519"))
            .build();

        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.max_tokens, DEFAULT_MAX_TOKENS);
        assert!(request.system.is_none());
        assert!(request.temperature.is_none());
    }

    #[test]
    fn test_builder_clamps_temperature() {
        let request = CompletionRequest::builder("deepseek-chat")
            .system("You are a trading assistant")
            .max_tokens(1024)
            .temperature(3.5)
            .build();

        assert_eq!(request.max_tokens, 1024);
        assert_eq!(request.temperature, Some(2.0));
    }

    #[test]
    fn test_truncation_and_usage() {
        let response = CompletionResponse {
            message: Message::assistant("BUY, because"),
            stop_reason: StopReason::MaxTokens,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
        };
        assert!(response.is_truncated());
        assert_eq!(response.usage.total(), 150);
    }
}
