//! Token counting.
//!
//! [`TiktokenTokenizer`] uses the model's own BPE encoding via `tiktoken-rs`,
//! falling back to `cl100k_base` for models tiktoken does not know.
//! Encoders load vocabulary data, so they are built once per model and kept
//! until the tokenizer is dropped or [`TiktokenTokenizer::release`] is called.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tiktoken_rs::CoreBPE;
use tracing::debug;

use chatgate_core::{Error, OutboundMessage, Result};

/// Fixed framing overhead added to every message's token cost.
pub const MESSAGE_OVERHEAD: u32 = 2;

/// Model-aware token encoder.
pub trait Tokenizer: Send + Sync {
    /// Encode text under the model's encoding.
    fn encode(&self, model: &str, text: &str) -> Result<Vec<u32>>;

    /// Number of tokens in the text.
    fn count(&self, model: &str, text: &str) -> Result<u32> {
        let len = self.encode(model, text)?.len();
        Ok(u32::try_from(len).unwrap_or(u32::MAX))
    }

    /// Cost of a message: its serialized `{role, content}` plus framing overhead.
    fn count_message(&self, model: &str, message: &OutboundMessage) -> Result<u32> {
        Ok(self
            .count(model, &message.serialized())?
            .saturating_add(MESSAGE_OVERHEAD))
    }
}

/// Tokenizer backed by tiktoken BPE encodings.
#[derive(Default)]
pub struct TiktokenTokenizer {
    encoders: Mutex<HashMap<String, Arc<CoreBPE>>>,
}

impl TiktokenTokenizer {
    /// Create a tokenizer with an empty encoder cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached encoder.
    pub fn release(&self) {
        self.encoders.lock().clear();
    }

    /// Number of encoders currently held.
    pub fn cached_encoders(&self) -> usize {
        self.encoders.lock().len()
    }

    fn encoder(&self, model: &str) -> Result<Arc<CoreBPE>> {
        if let Some(encoder) = self.encoders.lock().get(model) {
            return Ok(encoder.clone());
        }

        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => {
                debug!(model, "No tiktoken encoding for model, using cl100k_base");
                tiktoken_rs::cl100k_base().map_err(|e| Error::Tokenizer(e.to_string()))?
            }
        };

        let encoder = Arc::new(bpe);
        self.encoders
            .lock()
            .insert(model.to_string(), encoder.clone());
        Ok(encoder)
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, model: &str, text: &str) -> Result<Vec<u32>> {
        let encoder = self.encoder(model)?;
        Ok(encoder
            .encode_ordinary(text)
            .into_iter()
            .map(|token| token as u32)
            .collect())
    }
}

/// Character-based estimate for environments without BPE data.
#[derive(Debug, Clone, Copy)]
pub struct EstimatingTokenizer {
    /// Average characters per token
    pub chars_per_token: f32,
}

impl Default for EstimatingTokenizer {
    fn default() -> Self {
        Self {
            chars_per_token: 4.0,
        }
    }
}

impl Tokenizer for EstimatingTokenizer {
    fn encode(&self, model: &str, text: &str) -> Result<Vec<u32>> {
        let count = self.count(model, text)?;
        Ok(vec![0; count as usize])
    }

    fn count(&self, _model: &str, text: &str) -> Result<u32> {
        let chars = text.chars().count() as f32;
        Ok((chars / self.chars_per_token).ceil() as u32)
    }
}
