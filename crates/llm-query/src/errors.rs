use thiserror::Error;

use crate::secrets::SecretError;

/// Errors surfaced by provider calls and stream decoding
///
/// Nothing in this crate retries; `is_retryable` only classifies the failure for callers.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Rejected before any I/O, the caller can fix it
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// DNS, TCP, TLS or timeout failure
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx status, or an explicit error in an otherwise successful body
    #[error("Request failed with status {status}: {body}")]
    Protocol { status: u16, body: String },

    #[error("Context length exceeded. Message: {0}")]
    ContextLengthExceeded(String),

    /// Body did not match the expected schema
    #[error("Could not decode provider response: {0}")]
    Decode(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    pub fn decode<E: std::fmt::Display>(err: E) -> Self {
        ProviderError::Decode(err.to_string())
    }

    /// HTTP status attached to the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Protocol { status, .. } => Some(*status),
            ProviderError::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// Raw body the provider sent with a protocol error
    pub fn body(&self) -> Option<&str> {
        match self {
            ProviderError::Protocol { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ProviderError::Cancelled | ProviderError::DeadlineExceeded
        )
    }

    /// Whether a caller-side retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Protocol { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors raised when mutating a conversation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error("System prompt cannot be empty")]
    EmptySystemPrompt,

    #[error("User message cannot be empty")]
    EmptyUserMessage,

    #[error("Assistant response has neither text nor tool calls")]
    EmptyAssistantResponse,

    #[error("Tool result needs a non-empty tool call id")]
    EmptyToolCallId,
}

/// Errors raised while turning settings into a provider config
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    MissingField(String),

    #[error("No API key configured for {provider}, set api_key or {env_var}")]
    MissingApiKey { provider: String, env_var: String },

    #[error("API key for {provider} is too short: expected at least {required} characters, got {got}")]
    ApiKeyTooShort {
        provider: String,
        required: usize,
        got: usize,
    },

    #[error("Failed to read secret: {0}")]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Other(#[from] config::ConfigError),
}
