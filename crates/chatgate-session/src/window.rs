//! Context window construction.
//!
//! The request for a turn is the longest suffix of the stored history that,
//! together with the new user message, fits in
//! `context_window - max_tokens - safety_margin` tokens. Older messages are
//! dropped first; the new message is always sent.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use chatgate_core::{ChatMessage, OutboundMessage, Result};
use chatgate_providers::Tokenizer;

/// Tokens held back from every window for protocol overhead.
pub const SAFETY_MARGIN: u32 = 100;

/// Token budget for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBudget {
    /// Model context window
    pub max_context: u32,
    /// Tokens reserved for the reply
    pub max_tokens: u32,
    /// Extra headroom
    pub safety_margin: u32,
}

impl WindowBudget {
    pub fn new(max_context: u32, max_tokens: u32) -> Self {
        Self {
            max_context,
            max_tokens,
            safety_margin: SAFETY_MARGIN,
        }
    }

    pub fn with_safety_margin(mut self, safety_margin: u32) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    /// Tokens available for history plus the new message.
    pub fn available(&self) -> u32 {
        self.max_context
            .saturating_sub(self.max_tokens)
            .saturating_sub(self.safety_margin)
    }
}

/// Messages chosen from history and their combined cost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub messages: Vec<ChatMessage>,
    pub history_tokens: u32,
}

/// Strategy for picking which history messages go into a request.
///
/// Any closure with the same signature is a selector.
pub trait MessageSelector: Send + Sync {
    fn select(
        &self,
        history: &[ChatMessage],
        new_message_tokens: u32,
        available: u32,
        model: &str,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Selection>;
}

impl<F> MessageSelector for F
where
    F: Fn(&[ChatMessage], u32, u32, &str, &dyn Tokenizer) -> Result<Selection> + Send + Sync,
{
    fn select(
        &self,
        history: &[ChatMessage],
        new_message_tokens: u32,
        available: u32,
        model: &str,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Selection> {
        self(history, new_message_tokens, available, model, tokenizer)
    }
}

/// Drop the oldest messages until the rest fits.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoSelector;

impl MessageSelector for FifoSelector {
    fn select(
        &self,
        history: &[ChatMessage],
        new_message_tokens: u32,
        available: u32,
        model: &str,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Selection> {
        let costs = history
            .iter()
            .map(|message| tokenizer.count_message(model, &message.outbound()))
            .collect::<Result<Vec<u32>>>()?;

        let limit = u64::from(available);
        let mut total: u64 = costs.iter().map(|&c| u64::from(c)).sum();
        let mut start = 0;

        while start < history.len() && total + u64::from(new_message_tokens) > limit {
            total -= u64::from(costs[start]);
            start += 1;
        }

        Ok(Selection {
            messages: history[start..].to_vec(),
            history_tokens: u32::try_from(total).unwrap_or(u32::MAX),
        })
    }
}

/// The messages for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextWindow {
    /// History kept for this request, oldest first
    pub history: Vec<ChatMessage>,
    /// The new user message
    pub prompt: ChatMessage,
    /// Cost of `history`
    pub history_tokens: u32,
    /// Cost of `prompt`
    pub prompt_tokens: u32,
    /// Length of the history prefix left out; 0 if the selection was not a suffix
    pub evicted: usize,
    pub budget: WindowBudget,
}

impl ContextWindow {
    /// Estimated prompt cost of the whole request.
    pub fn total_tokens(&self) -> u32 {
        self.history_tokens.saturating_add(self.prompt_tokens)
    }

    /// Whether the request is within budget. False only when the new
    /// message alone is too large.
    pub fn fits(&self) -> bool {
        self.total_tokens() <= self.budget.available()
    }

    /// Messages to send, in order.
    pub fn outbound(&self) -> Vec<OutboundMessage> {
        self.history
            .iter()
            .chain(std::iter::once(&self.prompt))
            .map(ChatMessage::outbound)
            .collect()
    }
}

/// Builds [`ContextWindow`]s with a tokenizer and a selection strategy.
#[derive(Clone)]
pub struct ContextWindowBuilder {
    tokenizer: Arc<dyn Tokenizer>,
    selector: Arc<dyn MessageSelector>,
}

impl ContextWindowBuilder {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            tokenizer,
            selector: Arc::new(FifoSelector),
        }
    }

    /// Replace the default oldest-first eviction.
    pub fn with_selector(mut self, selector: Arc<dyn MessageSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Select history for a new user message.
    pub fn build(
        &self,
        history: &[ChatMessage],
        prompt: ChatMessage,
        model: &str,
        budget: WindowBudget,
    ) -> Result<ContextWindow> {
        let prompt_tokens = self.tokenizer.count_message(model, &prompt.outbound())?;
        let available = budget.available();

        let selection = self.selector.select(
            history,
            prompt_tokens,
            available,
            model,
            self.tokenizer.as_ref(),
        )?;

        let evicted = if history.ends_with(&selection.messages) {
            history.len() - selection.messages.len()
        } else {
            0
        };

        if prompt_tokens > available {
            debug!(
                model,
                prompt_tokens, available, "New message alone exceeds the window budget"
            );
        } else if evicted > 0 {
            debug!(model, evicted, kept = selection.messages.len(), "Trimmed history to fit window");
        }

        Ok(ContextWindow {
            history: selection.messages,
            prompt,
            history_tokens: selection.history_tokens,
            prompt_tokens,
            evicted,
            budget,
        })
    }
}

impl fmt::Debug for ContextWindowBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextWindowBuilder").finish_non_exhaustive()
    }
}
