//! Construction-time configuration for [`crate::memory::TokenWindowMemory`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Settings for a token-window memory.
///
/// # Example
/// ```ignore
/// use tokenwindow::MemoryConfig;
///
/// let config = MemoryConfig::new(4096, "gpt-4o")
///     .with_store_timeout(Duration::from_secs(2))
///     .with_max_conflict_retries(5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Eviction threshold, in tokens, excluding the exempt system prompt.
    pub max_tokens: usize,
    /// Selects the tokenization ruleset.
    pub model_name: String,
    /// Keep a leading system message out of the budget and never evict it.
    #[serde(default = "default_exempt")]
    pub exempt_system_prompt: bool,
    /// Upper bound on every store call.
    #[serde(
        default = "default_store_timeout",
        rename = "store_timeout_ms",
        with = "duration_ms"
    )]
    pub store_timeout: Duration,
    /// Retries of a whole add after a store version conflict.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

fn default_exempt() -> bool {
    true
}

fn default_store_timeout() -> Duration {
    DEFAULT_STORE_TIMEOUT
}

fn default_max_conflict_retries() -> u32 {
    DEFAULT_MAX_CONFLICT_RETRIES
}

impl MemoryConfig {
    pub fn new(max_tokens: usize, model_name: impl Into<String>) -> Self {
        Self {
            max_tokens,
            model_name: model_name.into(),
            exempt_system_prompt: default_exempt(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_exempt_system_prompt(mut self, exempt: bool) -> Self {
        self.exempt_system_prompt = exempt;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Check the settings, rejecting values the memory cannot run with.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.max_tokens == 0 {
            return Err(MemoryError::InvalidConfiguration(
                "max_tokens must be greater than zero".into(),
            ));
        }
        if self.model_name.trim().is_empty() {
            return Err(MemoryError::InvalidConfiguration(
                "model_name must not be empty".into(),
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(MemoryError::InvalidConfiguration(
                "store_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Read the configuration from `TOKENWINDOW_*` environment variables.
    ///
    /// `TOKENWINDOW_MAX_TOKENS` and `TOKENWINDOW_MODEL` are required;
    /// `TOKENWINDOW_EXEMPT_SYSTEM_PROMPT`, `TOKENWINDOW_STORE_TIMEOUT_MS` and
    /// `TOKENWINDOW_MAX_CONFLICT_RETRIES` are optional.
    pub fn from_env() -> Result<Self, MemoryError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MemoryError> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| MemoryError::InvalidConfiguration(format!("{key} not set")))
        };

        let max_tokens = parse("TOKENWINDOW_MAX_TOKENS", &required("TOKENWINDOW_MAX_TOKENS")?)?;
        let mut config = Self::new(max_tokens, required("TOKENWINDOW_MODEL")?);

        if let Some(value) = lookup("TOKENWINDOW_EXEMPT_SYSTEM_PROMPT") {
            config.exempt_system_prompt = parse("TOKENWINDOW_EXEMPT_SYSTEM_PROMPT", &value)?;
        }
        if let Some(value) = lookup("TOKENWINDOW_STORE_TIMEOUT_MS") {
            config.store_timeout =
                Duration::from_millis(parse("TOKENWINDOW_STORE_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("TOKENWINDOW_MAX_CONFLICT_RETRIES") {
            config.max_conflict_retries = parse("TOKENWINDOW_MAX_CONFLICT_RETRIES", &value)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, MemoryError> {
    value
        .trim()
        .parse()
        .map_err(|_| {
            MemoryError::InvalidConfiguration(format!("{key} has invalid value '{value}'"))
        })
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
