//! Errors surfaced by the token-window memory.

use thiserror::Error;

use crate::memory::StoreError;

#[derive(Error, Debug)]
pub enum MemoryError {
    /// The store failed or timed out. The add did not take effect and may be retried.
    #[error("Store unavailable for conversation '{conversation_id}': {source}")]
    StoreUnavailable {
        conversation_id: String,
        #[source]
        source: StoreError,
    },
    #[error("Gave up on conversation '{conversation_id}' after {attempts} version conflicts")]
    ConflictRetriesExhausted {
        conversation_id: String,
        attempts: u32,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl MemoryError {
    pub(crate) fn store(conversation_id: &str, source: StoreError) -> Self {
        Self::StoreUnavailable {
            conversation_id: conversation_id.to_string(),
            source,
        }
    }

    /// Whether the caller may retry the whole operation.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidConfiguration(_))
    }
}
