//! # chatgate-session
//!
//! Conversation sessions for Chatgate.
//!
//! This crate provides:
//! - Readiness gating for lazily provisioned storage tables
//! - SQLite and in-memory conversation stores
//! - Context window construction against a token budget
//! - Streamed reply reconstruction with exactly-once persistence
//! - The [`SessionManager`] that ties a turn together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chatgate_providers::{OpenAIClient, TiktokenTokenizer};
//! use chatgate_session::{AnswerOptions, MemoryConversationStore, SessionManager};
//!
//! let manager = SessionManager::new(
//!     Arc::new(MemoryConversationStore::new()),
//!     Arc::new(OpenAIClient::new()),
//!     Arc::new(TiktokenTokenizer::new()),
//! );
//!
//! let options = AnswerOptions::new().with_api_key(api_key);
//! let record = manager
//!     .answer("session-1", "What is the capital of France?", "gpt-3.5-turbo", options)
//!     .await?;
//! println!("{}", record.messages.last().unwrap().content);
//! ```
//!
//! ## Persistence
//!
//! A blocking turn is stored after the reply arrives; a failed call stores
//! nothing. A streamed turn is stored exactly once, when the stream ends,
//! errors, or is dropped, whichever happens first.

pub mod gate;
pub mod manager;
pub mod sqlite;
pub mod store;
pub mod stream;
pub mod window;

pub use gate::{GateState, ProvisionError, ProvisionOptions, ProvisionTarget, ReadinessGate, TableStatus};
pub use manager::{AnswerOptions, SessionManager, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
pub use sqlite::SqliteConversationStore;
pub use store::{ConversationStore, MemoryConversationStore, StoreError};
pub use stream::{
    CompletionCallback, PendingTurn, ReplyStream, StreamReconstructor, Termination, TurnCompletion,
    TurnOutcome,
};
pub use window::{
    ContextWindow, ContextWindowBuilder, FifoSelector, MessageSelector, Selection, WindowBudget,
    SAFETY_MARGIN,
};
