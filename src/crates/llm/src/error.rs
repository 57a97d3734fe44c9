//! Error types for chat model clients.

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when talking to a model provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Failed to serialize/deserialize data.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// API authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// API key not found in environment.
    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    /// Model not found or unavailable.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Provider service unavailable (e.g., Ollama not running).
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid response from provider.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Provider prefix of a `provider:model` spec is not supported.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// General provider error.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LlmError {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => LlmError::AuthenticationError(body),
            404 => LlmError::ModelNotFound(body),
            429 => LlmError::RateLimitExceeded(body),
            400 | 422 => LlmError::InvalidRequest(body),
            500..=599 => LlmError::ServiceUnavailable(format!("{} API error {}: {}", provider, status, body)),
            _ => LlmError::ProviderError(format!("{} API error {}: {}", provider, status, body)),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::HttpError(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            LlmError::ServiceUnavailable(_) | LlmError::RateLimitExceeded(_) => true,
            _ => false,
        }
    }

    /// Check if this error is due to authentication.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            LlmError::AuthenticationError(_) | LlmError::ApiKeyNotFound(_)
        )
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::SerializationError(err.to_string())
    }
}

/// Provider failures surface to nodes as model errors.
impl From<LlmError> for agentgraph_core::GraphError {
    fn from(err: LlmError) -> Self {
        agentgraph_core::GraphError::Model(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgraph_core::GraphError;
    use reqwest::StatusCode;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            LlmError::from_status("OpenAI", StatusCode::UNAUTHORIZED, "bad key".into()),
            LlmError::AuthenticationError(_)
        ));
        assert!(matches!(
            LlmError::from_status("OpenAI", StatusCode::TOO_MANY_REQUESTS, String::new()),
            LlmError::RateLimitExceeded(_)
        ));
        assert!(matches!(
            LlmError::from_status("Ollama", StatusCode::NOT_FOUND, "model 'x' not found".into()),
            LlmError::ModelNotFound(_)
        ));
        assert!(matches!(
            LlmError::from_status("Claude", StatusCode::BAD_GATEWAY, String::new()),
            LlmError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(LlmError::RateLimitExceeded("slow down".into()).is_retryable());
        assert!(LlmError::ServiceUnavailable("overloaded".into()).is_retryable());
        assert!(!LlmError::AuthenticationError("bad key".into()).is_retryable());
        assert!(!LlmError::InvalidResponse("no choices".into()).is_retryable());
        assert!(LlmError::ApiKeyNotFound("OPENAI_API_KEY".into()).is_auth_error());
    }

    #[test]
    fn test_converts_to_model_error() {
        let err: GraphError = LlmError::InvalidResponse("no choices".into()).into();
        assert!(matches!(err, GraphError::Model(ref msg) if msg.contains("no choices")));
    }
}
