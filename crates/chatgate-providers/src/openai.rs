//! OpenAI chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, error, instrument};

use chatgate_core::config::ProviderConfig;
use chatgate_core::ProviderError;

use crate::traits::{ByteStream, Completion, CompletionClient, CompletionRequest};

/// Default OpenAI API base URL.
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Client identifier.
const PROVIDER_ID: &str = "openai";

/// Client for the OpenAI `/chat/completions` endpoint.
pub struct OpenAIClient {
    client: Client,
    base_url: String,
    /// Whole-request deadline for blocking calls
    timeout: Duration,
    /// Deadline for a streaming response to start
    stream_timeout: Duration,
}

impl OpenAIClient {
    /// Create a new client against the public API.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: OPENAI_API_URL.to_string(),
            timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(30),
        }
    }

    /// Create a client from the provider section of the configuration.
    pub fn from_config(config: &ProviderConfig) -> Self {
        let mut client = Self::new()
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .with_stream_timeout(Duration::from_secs(config.stream_timeout_secs));
        if let Some(ref base_url) = config.base_url {
            client = client.with_base_url(base_url);
        }
        client
    }

    /// Set a custom base URL (for compatible gateways).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the blocking request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the streaming start timeout.
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Map a transport failure into a provider error.
    fn send_error(&self, e: reqwest::Error, timeout: Duration) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout {
                provider: PROVIDER_ID.to_string(),
                seconds: timeout.as_secs(),
            }
        } else {
            ProviderError::NetworkError {
                provider: PROVIDER_ID.to_string(),
                message: e.to_string(),
            }
        }
    }

    /// Turn a non-success response into an API error carrying the remote body.
    async fn check_status(response: Response) -> Result<Response, ProviderError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        error!("OpenAI API error: {} - {}", status, error_text);
        Err(ProviderError::api_error(PROVIDER_ID, status.as_u16(), &error_text))
    }

    fn parse_response(response: ChatCompletionResponse) -> Completion {
        let choice = response.choices.into_iter().next();
        let usage = response.usage.unwrap_or_default();

        Completion {
            content: choice
                .as_ref()
                .and_then(|c| c.message.content.clone())
                .unwrap_or_default(),
            finish_reason: choice.and_then(|c| c.finish_reason),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl Default for OpenAIClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionClient for OpenAIClient {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    #[instrument(skip(self, request, api_key), fields(model = %request.model))]
    async fn complete(
        &self,
        request: &CompletionRequest,
        api_key: &str,
    ) -> Result<Completion, ProviderError> {
        debug!(messages = request.messages.len(), "Sending request to OpenAI API");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| self.send_error(e, self.timeout))?;

        let response = Self::check_status(response).await?;

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| self.send_error(e, self.timeout))?;

        Ok(Self::parse_response(api_response))
    }

    #[instrument(skip(self, request, api_key), fields(model = %request.model))]
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        api_key: &str,
    ) -> Result<ByteStream, ProviderError> {
        let request = request.clone().streaming();

        debug!(messages = request.messages.len(), "Sending streaming request to OpenAI API");

        let send = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .header("Accept", "text/event-stream")
            .json(&request)
            .send();

        // Only the start of the stream is bounded; the body may take longer
        let response = tokio::time::timeout(self.stream_timeout, send)
            .await
            .map_err(|_| ProviderError::Timeout {
                provider: PROVIDER_ID.to_string(),
                seconds: self.stream_timeout.as_secs(),
            })?
            .map_err(|e| self.send_error(e, self.stream_timeout))?;

        let response = Self::check_status(response).await?;

        let byte_stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| ProviderError::StreamError {
                provider: PROVIDER_ID.to_string(),
                message: e.to_string(),
            })
        });

        Ok(Box::pin(byte_stream))
    }
}

// OpenAI API types

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
