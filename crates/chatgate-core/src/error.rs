//! Error types for Chatgate.
//!
//! Every failure a caller of the session manager can observe maps to one
//! variant here, with a recovery suggestion where one exists.

use thiserror::Error;

/// Result type alias using the Chatgate error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Chatgate.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Completion API error with structured details
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// Backing table never became active within the deadline
    #[error("Timed out after {waited_ms}ms waiting for table '{table}' to become active")]
    ProvisioningTimeout { table: String, waited_ms: u64 },

    /// Backing table creation failed
    #[error("Failed to provision table '{table}': {message}")]
    ProvisioningFailed { table: String, message: String },

    /// No context-size entry for the requested model
    #[error("Unsupported model '{0}': no context window size is known")]
    UnsupportedModel(String),

    /// Storage backend error
    #[error("Store error: {0}")]
    Store(String),

    /// Tokenizer error
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your config file at ~/.config/chatgate/config.toml"),
            Error::Provider(e) => e.recovery_suggestion(),
            Error::ProvisioningTimeout { .. } => {
                Some("The storage backend is slow to provision; retry once the table is active")
            }
            Error::ProvisioningFailed { .. } => {
                Some("Check storage credentials and permissions, then restart")
            }
            Error::UnsupportedModel(_) => {
                Some("Add the model's context size under [models] in the config file")
            }
            _ => None,
        }
    }

    /// Create a provider-not-configured error.
    pub fn provider_not_configured(provider: &str, env_var: Option<&str>) -> Self {
        Error::Provider(ProviderError::NotConfigured {
            provider: provider.to_string(),
            env_var: env_var.map(str::to_string),
        })
    }
}

/// Completion API errors with detailed context.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider not configured
    #[error("Provider '{provider}' is not configured")]
    NotConfigured {
        provider: String,
        env_var: Option<String>,
    },

    /// API request failed with a non-success status
    #[error("API request to {provider} failed: {status} - {message}")]
    ApiError {
        provider: String,
        status: u16,
        message: String,
        /// Remote error payload, when the body was JSON
        body: Option<serde_json::Value>,
    },

    /// Streaming error
    #[error("Streaming error from {provider}: {message}")]
    StreamError { provider: String, message: String },

    /// A single stream event could not be parsed
    #[error("Malformed stream event: {message}")]
    MalformedEvent { line: String, message: String },

    /// Timeout
    #[error("Request to {provider} timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    /// Network error
    #[error("Network error connecting to {provider}: {message}")]
    NetworkError { provider: String, message: String },
}

impl ProviderError {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            ProviderError::NotConfigured {
                env_var: Some(_), ..
            } => Some("Set the API key environment variable"),
            ProviderError::NotConfigured { .. } => {
                Some("Set provider.api_key in ~/.config/chatgate/config.toml")
            }
            ProviderError::ApiError { status: 401, .. } => {
                Some("Check that your API key is valid and not expired")
            }
            ProviderError::ApiError { status: 429, .. } => {
                Some("You've hit rate limits. Wait a moment and try again")
            }
            ProviderError::ApiError {
                status: 500..=599, ..
            } => Some("The API service is having issues. Try again later"),
            ProviderError::Timeout { .. } => {
                Some("Try a smaller max_tokens or check your network connection")
            }
            ProviderError::NetworkError { .. } => Some("Check your internet connection"),
            _ => None,
        }
    }

    /// Create an API error from status code and response body.
    ///
    /// The message is taken from an OpenAI-style `{"error": {"message": ..}}`
    /// payload when present, otherwise the raw body.
    pub fn api_error(provider: impl Into<String>, status: u16, body_text: &str) -> Self {
        let body: Option<serde_json::Value> = serde_json::from_str(body_text).ok();
        let message = body
            .as_ref()
            .and_then(|b| b.pointer("/error/message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body_text.to_string());

        ProviderError::ApiError {
            provider: provider.into(),
            status,
            message,
            body,
        }
    }

    /// Create a malformed-event error for a stream line.
    pub fn malformed_event(line: impl Into<String>, message: impl ToString) -> Self {
        ProviderError::MalformedEvent {
            line: line.into(),
            message: message.to_string(),
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}
