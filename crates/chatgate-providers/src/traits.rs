//! Completion client trait definitions.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use chatgate_core::{OutboundMessage, ProviderError};

/// Raw byte source of a streamed completion.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// Request for a chat completion.
///
/// Serializes to the wire body: `stop` is always sent (as `null` when unset)
/// and `stream` only when true.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    /// Model to use
    pub model: String,
    /// Messages in the conversation, oldest first
    pub messages: Vec<OutboundMessage>,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Number of choices
    pub n: u32,
    /// Stop sequences
    pub stop: Option<Vec<String>>,
    /// Request an event stream instead of a single body
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl CompletionRequest {
    /// Create a single-choice, non-streaming request.
    pub fn new(
        model: impl Into<String>,
        messages: Vec<OutboundMessage>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens,
            temperature,
            n: 1,
            stop: None,
            stream: false,
        }
    }

    /// The same request in streaming mode.
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// A complete, non-streamed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Assistant reply text
    pub content: String,
    /// Tokens in the prompt as reported by the API
    pub prompt_tokens: u32,
    /// Tokens in the reply as reported by the API
    pub completion_tokens: u32,
    /// Reported total for the call
    pub total_tokens: u32,
    /// Why generation stopped, if reported
    pub finish_reason: Option<String>,
}

/// A remote chat-completion endpoint.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Client identifier used in errors and logs.
    fn id(&self) -> &str;

    /// Generate a completion (blocking until the full answer arrives).
    async fn complete(
        &self,
        request: &CompletionRequest,
        api_key: &str,
    ) -> Result<Completion, ProviderError>;

    /// Start a streamed completion and hand back the live byte source.
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        api_key: &str,
    ) -> Result<ByteStream, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_core::ChatMessage;

    #[test]
    fn test_request_wire_shape() {
        let request = CompletionRequest::new(
            "gpt-3.5-turbo",
            vec![ChatMessage::user("hi").outbound()],
            50,
            1.0,
        );
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["n"], 1);
        assert!(json["stop"].is_null());
        assert!(json.get("stop").is_some());
        assert!(json.get("stream").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_streaming_request_sets_flag() {
        let request = CompletionRequest::new("gpt-4o", vec![], 10, 0.5).streaming();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
    }
}
