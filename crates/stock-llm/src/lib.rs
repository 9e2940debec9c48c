//! Model access for the watchlist engine
//!
//! A provider turns one [`CompletionRequest`] into one
//! [`CompletionResponse`]. Errors carry a retry classification so the
//! engine can rotate to another key or model on rate limits. The
//! OpenAI-compatible provider lives behind the `openai` feature.

pub mod completion;
pub mod error;
pub mod messages;
pub mod provider;

pub use completion::{
    CompletionRequest, CompletionRequestBuilder, CompletionResponse, StopReason, TokenUsage,
};
pub use error::{LLMError, Result};
pub use messages::{Message, Role};
pub use provider::LLMProvider;

#[cfg(feature = "openai")]
pub mod providers;
