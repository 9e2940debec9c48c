//! Error types for LLM operations

use stock_utils::{RetryClass, RetryClassify};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LLMError>;

/// Failures of a model call, classified for the retrying caller
#[derive(Error, Debug)]
pub enum LLMError {
    /// Non-2xx status without a more specific mapping
    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("API key rejected")]
    AuthenticationFailed,

    /// HTTP 429 or a quota message
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Transport failure before any status was received
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// 2xx body without usable content
    #[error("Unexpected response format: {0}")]
    UnexpectedResponse(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl RetryClassify for LLMError {
    /// Key- or model-specific failures move on to the next endpoint in the
    /// pool; transport trouble waits and retries the same one.
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimitExceeded(_) | Self::AuthenticationFailed | Self::ModelNotFound(_) => {
                RetryClass::Rotate
            }
            Self::RequestFailed(_) | Self::HttpError(_) | Self::UnexpectedResponse(_) => {
                RetryClass::Backoff
            }
            Self::InvalidRequest(_) | Self::SerializationError(_) | Self::ConfigurationError(_) => {
                RetryClass::Abort
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classes() {
        assert_eq!(
            LLMError::RateLimitExceeded("quota".to_string()).retry_class(),
            RetryClass::Rotate
        );
        assert_eq!(
            LLMError::AuthenticationFailed.retry_class(),
            RetryClass::Rotate
        );
        assert_eq!(
            LLMError::RequestFailed("HTTP 502".to_string()).retry_class(),
            RetryClass::Backoff
        );
        assert_eq!(
            LLMError::InvalidRequest("bad".to_string()).retry_class(),
            RetryClass::Abort
        );
    }
}
