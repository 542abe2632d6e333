//! Turn orchestration.
//!
//! [`SessionManager`] loads a conversation, fits it to the model's context
//! window, calls the completion client, and stores the finished turn. A turn
//! that fails before the reply arrives leaves the stored record untouched.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use chatgate_core::{ChatMessage, Config, ConversationRecord, Error, HistoryRetention, Result};
use chatgate_providers::{CompletionClient, CompletionRequest, ModelRegistry, Tokenizer};

use crate::store::ConversationStore;
use crate::stream::{CompletionCallback, PendingTurn, ReplyStream, StreamReconstructor};
use crate::window::{ContextWindow, ContextWindowBuilder, MessageSelector, WindowBudget, SAFETY_MARGIN};

/// Reply budget when neither the call nor the manager sets one.
pub const DEFAULT_MAX_TOKENS: u32 = 50;

/// Sampling temperature when neither the call nor the manager sets one.
pub const DEFAULT_TEMPERATURE: f32 = 1.0;

/// Per-turn options. Unset fields fall back to the manager's defaults.
#[derive(Clone, Default)]
pub struct AnswerOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub api_key: Option<String>,
    /// Replaces oldest-first eviction for this turn
    pub extract_messages: Option<Arc<dyn MessageSelector>>,
}

impl AnswerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn MessageSelector>) -> Self {
        self.extract_messages = Some(selector);
        self
    }

    /// Fill unset fields from `defaults`.
    fn or(self, defaults: &AnswerOptions) -> AnswerOptions {
        AnswerOptions {
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            temperature: self.temperature.or(defaults.temperature),
            api_key: self.api_key.or_else(|| defaults.api_key.clone()),
            extract_messages: self
                .extract_messages
                .or_else(|| defaults.extract_messages.clone()),
        }
    }
}

impl fmt::Debug for AnswerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnswerOptions")
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("extract_messages", &self.extract_messages.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

/// Fully resolved settings for one turn.
struct TurnSettings {
    max_tokens: u32,
    temperature: f32,
    api_key: String,
    selector: Option<Arc<dyn MessageSelector>>,
}

/// Everything needed to send a turn, computed before any network call.
struct PreparedTurn {
    record: ConversationRecord,
    first_turn: bool,
    window: ContextWindow,
    request: CompletionRequest,
    api_key: String,
}

/// Runs conversation turns against a store and a completion client.
pub struct SessionManager {
    store: Arc<dyn ConversationStore>,
    client: Arc<dyn CompletionClient>,
    tokenizer: Arc<dyn Tokenizer>,
    models: ModelRegistry,
    defaults: AnswerOptions,
    safety_margin: u32,
    retention: HistoryRetention,
    default_model: String,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        client: Arc<dyn CompletionClient>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            store,
            client,
            tokenizer,
            models: ModelRegistry::new(),
            defaults: AnswerOptions::default(),
            safety_margin: SAFETY_MARGIN,
            retention: HistoryRetention::default(),
            default_model: chatgate_core::config::DEFAULT_MODEL.to_string(),
        }
    }

    /// Manager configured from the loaded configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn ConversationStore>,
        client: Arc<dyn CompletionClient>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        let defaults = AnswerOptions {
            max_tokens: Some(config.limits.max_tokens),
            temperature: Some(config.limits.temperature),
            api_key: config.provider.resolve_api_key(),
            extract_messages: None,
        };

        Self::new(store, client, tokenizer)
            .with_models(ModelRegistry::from_config(config))
            .with_defaults(defaults)
            .with_safety_margin(config.limits.safety_margin)
            .with_retention(config.history.retention)
            .with_default_model(config.general.model.clone())
    }

    pub fn with_defaults(mut self, defaults: AnswerOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_models(mut self, models: ModelRegistry) -> Self {
        self.models = models;
        self
    }

    pub fn with_safety_margin(mut self, safety_margin: u32) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    pub fn with_retention(mut self, retention: HistoryRetention) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Model used when the caller has no preference.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Run one blocking turn and return the stored record.
    #[instrument(skip(self, prompt, model, options), fields(model = %model))]
    pub async fn answer(
        &self,
        session_id: &str,
        prompt: &str,
        model: &str,
        options: AnswerOptions,
    ) -> Result<ConversationRecord> {
        let PreparedTurn {
            mut record,
            first_turn,
            window,
            request,
            api_key,
        } = self.prepare(session_id, prompt, model, options).await?;

        let completion = self.client.complete(&request, &api_key).await?;

        let now = Utc::now();
        let mut user = window.prompt.clone();
        user.finalize(completion.prompt_tokens, now);
        let mut reply = ChatMessage::assistant(completion.content);
        reply.finalize(completion.completion_tokens, now);

        self.apply_retention(&mut record, &window);
        record.push_turn(user, reply);
        record.total_tokens = u64::from(completion.total_tokens);
        record.touch(now, first_turn);

        self.store.put(session_id, &record).await?;

        info!(
            session_id,
            total_tokens = record.total_tokens,
            messages = record.messages.len(),
            "Turn stored"
        );
        Ok(record)
    }

    /// Start a streamed turn.
    ///
    /// The returned stream yields the provider's raw bytes; the turn is
    /// stored once the stream terminates, then `on_complete` is called with
    /// the stored record.
    #[instrument(skip(self, prompt, model, options, on_complete), fields(model = %model))]
    pub async fn answer_stream(
        &self,
        session_id: &str,
        prompt: &str,
        model: &str,
        options: AnswerOptions,
        on_complete: Option<CompletionCallback>,
    ) -> Result<ReplyStream> {
        let PreparedTurn {
            mut record,
            first_turn,
            window,
            request,
            api_key,
        } = self.prepare(session_id, prompt, model, options).await?;

        let source = self.client.complete_stream(&request, &api_key).await?;

        let mut user = window.prompt.clone();
        user.finalize(window.prompt_tokens, Utc::now());

        self.apply_retention(&mut record, &window);
        record.push_turn(user, ChatMessage::assistant(""));
        // The reply's cost is added when the stream is finalized
        record.total_tokens = u64::from(window.total_tokens());

        let turn = PendingTurn {
            session_id: session_id.to_string(),
            model: model.to_string(),
            record,
            first_turn,
        };

        debug!(session_id, "Streaming turn started");
        StreamReconstructor::new(self.store.clone(), self.tokenizer.clone())
            .on_complete(on_complete)
            .wrap(turn, source)
    }

    /// Stored record for a session.
    pub async fn history(&self, session_id: &str) -> Result<Option<ConversationRecord>> {
        Ok(self.store.get(session_id).await?)
    }

    /// Forget a session.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.store.delete(session_id).await?;
        info!(session_id, "Session deleted");
        Ok(())
    }

    fn resolve(&self, options: AnswerOptions) -> Result<TurnSettings> {
        let options = options.or(&self.defaults);
        let api_key = options
            .api_key
            .ok_or_else(|| Error::provider_not_configured(self.client.id(), None))?;

        Ok(TurnSettings {
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            api_key,
            selector: options.extract_messages,
        })
    }

    async fn prepare(
        &self,
        session_id: &str,
        prompt: &str,
        model: &str,
        options: AnswerOptions,
    ) -> Result<PreparedTurn> {
        let max_context = self.models.context_window(model)?;
        let settings = self.resolve(options)?;

        let (record, first_turn) = match self.store.get(session_id).await? {
            Some(record) => (record, false),
            None => (ConversationRecord::new(session_id), true),
        };

        let mut builder = ContextWindowBuilder::new(self.tokenizer.clone());
        if let Some(selector) = settings.selector {
            builder = builder.with_selector(selector);
        }

        let budget = WindowBudget::new(max_context, settings.max_tokens)
            .with_safety_margin(self.safety_margin);
        let window = builder.build(&record.messages, ChatMessage::user(prompt), model, budget)?;

        debug!(
            session_id,
            first_turn,
            history = window.history.len(),
            evicted = window.evicted,
            prompt_tokens = window.total_tokens(),
            "Prepared context window"
        );

        let request = CompletionRequest::new(
            model,
            window.outbound(),
            settings.max_tokens,
            settings.temperature,
        );

        Ok(PreparedTurn {
            record,
            first_turn,
            window,
            request,
            api_key: settings.api_key,
        })
    }

    fn apply_retention(&self, record: &mut ConversationRecord, window: &ContextWindow) {
        if self.retention == HistoryRetention::Window && window.evicted > 0 {
            debug!(evicted = window.evicted, "Pruning messages outside the window");
            record.prune_oldest(window.evicted);
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("client", &self.client.id())
            .field("defaults", &self.defaults)
            .field("safety_margin", &self.safety_margin)
            .field("retention", &self.retention)
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}
