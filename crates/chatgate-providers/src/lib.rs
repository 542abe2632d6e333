//! # chatgate-providers
//!
//! Remote chat-completion plumbing for Chatgate.
//!
//! This crate provides:
//! - The completion client trait and request/response shapes
//! - An OpenAI client for blocking and streamed completions
//! - SSE line framing for completion streams
//! - Model-aware token counting
//! - Context-window lookup per model

pub mod openai;
pub mod registry;
pub mod sse;
pub mod tokenizer;
pub mod traits;

pub use openai::OpenAIClient;
pub use registry::{ModelInfo, ModelRegistry};
pub use sse::{SseLineParser, StreamEvent};
pub use tokenizer::{EstimatingTokenizer, TiktokenTokenizer, Tokenizer, MESSAGE_OVERHEAD};
pub use traits::{ByteStream, Completion, CompletionClient, CompletionRequest};
