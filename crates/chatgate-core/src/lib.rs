//! # chatgate-core
//!
//! Core types and abstractions for Chatgate, a session-aware gateway in
//! front of chat-completion APIs.
//!
//! This crate provides:
//! - Chat message and conversation record primitives
//! - Configuration system
//! - Common error types

pub mod config;
pub mod error;
pub mod message;
pub mod record;

pub use config::{Config, HistoryRetention, StorageBackend};
pub use error::{Error, ProviderError, Result};
pub use message::{ChatMessage, OutboundMessage, Role};
pub use record::ConversationRecord;
