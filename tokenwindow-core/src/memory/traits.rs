//! Core traits for token estimation and conversation persistence.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::message::Message;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Version conflict: expected {expected:?}, found {found:?}")]
    VersionConflict {
        expected: Option<u64>,
        found: Option<u64>,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of a token estimation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Estimate {
    pub tokens: usize,
    /// The model name was not recognized and the default ruleset was used.
    pub fallback: bool,
}

impl Estimate {
    pub fn new(tokens: usize) -> Self {
        Self {
            tokens,
            fallback: false,
        }
    }
}

/// Maps messages to token counts for a given model.
///
/// Implementations must be deterministic and must never fail: an unknown
/// model falls back to a default ruleset and sets [`Estimate::fallback`].
pub trait TokenEstimator: Send + Sync {
    /// Estimate the tokens a single message costs, including its per-message overhead.
    fn estimate(&self, message: &Message, model: &str) -> Estimate;

    /// Estimate a whole sequence of messages.
    ///
    /// Fixed per-request costs must be counted once here rather than once
    /// per message. The default has no such costs and sums the messages.
    fn estimate_batch(&self, messages: &[Message], model: &str) -> Estimate {
        messages
            .iter()
            .map(|message| self.estimate(message, model))
            .fold(Estimate::default(), |acc, e| Estimate {
                tokens: acc.tokens + e.tokens,
                fallback: acc.fallback || e.fallback,
            })
    }
}

impl<E: TokenEstimator + ?Sized> TokenEstimator for Arc<E> {
    fn estimate(&self, message: &Message, model: &str) -> Estimate {
        (**self).estimate(message, model)
    }

    fn estimate_batch(&self, messages: &[Message], model: &str) -> Estimate {
        (**self).estimate_batch(messages, model)
    }
}

/// A value read from a store together with its optimistic-concurrency version.
///
/// `version` is `None` when the store does not track versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: Option<u64>,
}

/// Durable storage of conversation message lists, keyed by conversation id.
///
/// `replace` must swap the whole list atomically: a concurrent `load` for
/// the same id sees either the old list or the new one, never a mix.
pub trait MemoryStore: Send + Sync {
    /// Load the ordered messages of a conversation. Unknown ids yield an empty list.
    fn load(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Append a single message to the end of a conversation.
    fn append(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically replace the full message list of a conversation.
    fn replace(
        &self,
        conversation_id: &str,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a conversation entirely.
    fn delete(&self, conversation_id: &str) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.replace(conversation_id, Vec::new())
    }

    /// Load messages along with a version token, if the store supports versions.
    fn load_versioned(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Versioned<Vec<Message>>, StoreError>> + Send {
        async move {
            let value = self.load(conversation_id).await?;
            Ok(Versioned {
                value,
                version: None,
            })
        }
    }

    /// Replace the message list only if the stored version still equals `expected`.
    ///
    /// Stores without versioning ignore `expected` and behave like [`MemoryStore::replace`].
    fn replace_if_version(
        &self,
        conversation_id: &str,
        messages: Vec<Message>,
        _expected: Option<u64>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.replace(conversation_id, messages)
    }
}

impl<S: MemoryStore> MemoryStore for Arc<S> {
    fn load(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send {
        (**self).load(conversation_id)
    }

    fn append(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).append(conversation_id, message)
    }

    fn replace(
        &self,
        conversation_id: &str,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).replace(conversation_id, messages)
    }

    fn delete(&self, conversation_id: &str) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).delete(conversation_id)
    }

    fn load_versioned(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Versioned<Vec<Message>>, StoreError>> + Send {
        (**self).load_versioned(conversation_id)
    }

    fn replace_if_version(
        &self,
        conversation_id: &str,
        messages: Vec<Message>,
        expected: Option<u64>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).replace_if_version(conversation_id, messages, expected)
    }
}
