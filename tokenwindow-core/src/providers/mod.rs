//! Remote [`crate::memory::MemoryStore`] backends.

pub mod agent_memory_server;
