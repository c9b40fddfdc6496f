//! Chat messages held in a conversation window.
//!
//! Messages are immutable once created: the `with_*` methods consume the
//! message and return an updated copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The author of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A token count cached on a message, valid only for the model it was computed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub model: String,
    pub tokens: usize,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_count: Option<TokenCount>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
            token_count: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Return a copy stamped with the given creation time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Return a copy carrying a cached token count for `model`.
    pub fn with_token_count(mut self, model: impl Into<String>, tokens: usize) -> Self {
        self.token_count = Some(TokenCount {
            model: model.into(),
            tokens,
        });
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn token_count(&self) -> Option<&TokenCount> {
        self.token_count.as_ref()
    }

    /// The cached token count, if one was computed for exactly this model.
    pub fn cached_tokens_for(&self, model: &str) -> Option<usize> {
        self.token_count
            .as_ref()
            .filter(|count| count.model == model)
            .map(|count| count.tokens)
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Two messages carry the same conversational content, ignoring metadata.
    pub fn same_content(&self, other: &Message) -> bool {
        self.role == other.role && self.content == other.content
    }
}
