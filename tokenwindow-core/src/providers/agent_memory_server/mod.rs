//! Agent Memory Server working-memory store
//!
//! # Example
//! ```
//! use tokenwindow::providers::agent_memory_server;
//!
//! let store = agent_memory_server::WorkingMemoryStore::builder()
//!     .base_url("http://localhost:8000")
//!     .user_id("alice")
//!     .build()?;
//! ```
//!
//! Or from the environment, using `AGENT_MEMORY_SERVER_URL`:
//!
//! ```
//! let store = agent_memory_server::WorkingMemoryStore::from_env()?;
//! ```

pub mod client;

pub use client::{DEFAULT_BASE_URL, WorkingMemoryStore, WorkingMemoryStoreBuilder};
