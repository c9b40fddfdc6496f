//! Token-window short-term memory for conversational agents.
//!
//! A [`memory::TokenWindowMemory`] stores each conversation through a
//! [`memory::MemoryStore`] and keeps it under a configured token budget,
//! counting tokens with a model-aware [`memory::TokenEstimator`].
//!
//! # Example
//! ```ignore
//! use tokenwindow::memory::{InMemoryStore, TokenWindowMemory};
//! use tokenwindow::{MemoryConfig, Message};
//!
//! let memory = TokenWindowMemory::new(MemoryConfig::new(2048, "gpt-4o"), InMemoryStore::new())?;
//! memory.add("alice", Message::system("You are a helpful assistant.")).await?;
//! memory.add("alice", Message::user("What is a borrow checker?")).await?;
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod message;
pub mod providers;

pub use config::MemoryConfig;
pub use error::MemoryError;
pub use message::{Message, Role, TokenCount};
