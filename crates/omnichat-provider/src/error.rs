//! Provider error types.

use thiserror::Error;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur during provider operations.
///
/// Apart from [`DispatchError`], none of these reach the caller as a return
/// value: adapters funnel them into the session's `end` event.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API error with status code (including a rejected stream handshake).
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// Response did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A required credential or field was not supplied.
    #[error("{provider}: missing required {field}")]
    MissingCredential { provider: String, field: String },

    /// A streamed fragment could not be parsed. Carries the raw payload.
    #[error("Malformed fragment: {payload}")]
    MalformedFragment { payload: String },

    /// The provider reported an error in its own words.
    #[error("{0}")]
    ProviderReported(String),

    /// Content filtered/blocked.
    #[error("block reason: {reason}")]
    ContentFiltered { reason: String },

    /// Operation cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Tool selection or script execution failed.
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// WebSocket handshake or framing error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Reading or writing a local file failed.
    #[error("File error ({path}): {message}")]
    File { path: String, message: String },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error (for streaming).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal provider error.
    #[error("Provider error: {message}")]
    Internal { message: String },
}

impl ProviderError {
    /// Create a missing credential error.
    pub fn missing(provider: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingCredential {
            provider: provider.into(),
            field: field.into(),
        }
    }

    /// Create a malformed fragment error carrying the offending payload.
    pub fn malformed(payload: impl Into<String>) -> Self {
        Self::MalformedFragment {
            payload: payload.into(),
        }
    }

    /// Create a provider-reported error.
    pub fn reported(message: impl Into<String>) -> Self {
        Self::ProviderReported(message.into())
    }

    /// Create an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an API error.
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Create a file error.
    pub fn file(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::File {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }

    /// Whether this error was detected before any transport was opened.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ProviderError::MissingCredential { .. })
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ProviderError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<omnichat_sandbox::SandboxError> for ProviderError {
    fn from(err: omnichat_sandbox::SandboxError) -> Self {
        Self::ToolExecution(err.to_string())
    }
}

/// Failure to route a request to an adapter.
///
/// This is the only error raised synchronously, before any request is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Provider {provider} does not support {operation}")]
    UnsupportedOperation { provider: String, operation: String },
}
