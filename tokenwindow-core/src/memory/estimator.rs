//! Fast, model-aware token estimation without external tokenizers.
//!
//! Uses character-based heuristics with per-family rulesets. Counts are
//! approximate: they track real tokenizers closely enough to enforce a
//! budget, not to bill against one.
//!
//! Each ruleset carries three numbers:
//! - `chars_per_token` for message content,
//! - `per_message` overhead for role delimiters and formatting,
//! - `reply_priming` tokens the provider adds once per request.

use crate::message::Message;

use super::traits::{Estimate, TokenEstimator};

/// Characters per token ratio for unknown models.
/// Natural language is typically ~4.0, code is ~3.0-3.5.
const DEFAULT_CHARS_PER_TOKEN: f32 = 3.4;

/// Overhead tokens per message for role and formatting, for unknown models.
const DEFAULT_MESSAGE_OVERHEAD: usize = 4;

/// Tokenization rules for one model family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ruleset {
    pub family: &'static str,
    pub chars_per_token: f32,
    pub per_message: usize,
    pub reply_priming: usize,
}

impl Ruleset {
    pub const DEFAULT: Ruleset = Ruleset {
        family: "default",
        chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        per_message: DEFAULT_MESSAGE_OVERHEAD,
        reply_priming: 0,
    };

    /// Estimate the tokens of a bare text under this ruleset.
    pub fn text_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.chars().count() as f32 / self.chars_per_token).ceil() as usize
    }

    /// Content plus per-message overhead; the role name costs one token.
    pub fn message_tokens(&self, message: &Message) -> usize {
        self.text_tokens(message.content()) + self.per_message + 1
    }
}

const OPENAI_CHAT: Ruleset = Ruleset {
    family: "openai",
    chars_per_token: 4.0,
    per_message: 3,
    reply_priming: 3,
};

// Legacy snapshot used `<|im_start|>{role}\n{content}<|im_end|>\n` framing.
const OPENAI_LEGACY: Ruleset = Ruleset {
    family: "openai-legacy",
    chars_per_token: 4.0,
    per_message: 4,
    reply_priming: 3,
};

const ANTHROPIC: Ruleset = Ruleset {
    family: "anthropic",
    chars_per_token: 3.5,
    per_message: 5,
    reply_priming: 1,
};

const GEMINI: Ruleset = Ruleset {
    family: "gemini",
    chars_per_token: 4.0,
    per_message: 2,
    reply_priming: 0,
};

const OPEN_WEIGHTS: Ruleset = Ruleset {
    family: "open-weights",
    chars_per_token: 3.6,
    per_message: 4,
    reply_priming: 1,
};

/// Model-name prefixes, matched case-insensitively. Longest prefix wins.
const MODEL_PREFIXES: &[(&str, Ruleset)] = &[
    ("gpt-3.5-turbo-0301", OPENAI_LEGACY),
    ("gpt-3.5", OPENAI_CHAT),
    ("gpt-4", OPENAI_CHAT),
    ("gpt-5", OPENAI_CHAT),
    ("chatgpt", OPENAI_CHAT),
    ("o1", OPENAI_CHAT),
    ("o3", OPENAI_CHAT),
    ("o4", OPENAI_CHAT),
    ("claude", ANTHROPIC),
    ("gemini", GEMINI),
    ("llama", OPEN_WEIGHTS),
    ("mistral", OPEN_WEIGHTS),
    ("mixtral", OPEN_WEIGHTS),
    ("qwen", OPEN_WEIGHTS),
];

/// Resolve the ruleset for a model name.
///
/// Returns the ruleset and whether the default had to be used.
pub fn ruleset_for(model: &str) -> (Ruleset, bool) {
    let model = model.trim().to_ascii_lowercase();
    // Provider-qualified names such as "openai/gpt-4o" match on the last segment.
    let name = model.rsplit('/').next().unwrap_or(&model);

    MODEL_PREFIXES
        .iter()
        .filter(|(prefix, _)| name.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, ruleset)| (*ruleset, false))
        .unwrap_or((Ruleset::DEFAULT, true))
}

/// Estimate token count for a text string using the default ruleset.
#[inline]
pub fn estimate_tokens(text: &str) -> usize {
    Ruleset::DEFAULT.text_tokens(text)
}

/// The default estimator: character heuristics selected by model family.
///
/// A message carrying a cached [`crate::message::TokenCount`] for the
/// requested model is trusted as-is.
///
/// # Example
/// ```ignore
/// use tokenwindow::memory::{HeuristicEstimator, TokenEstimator};
///
/// let estimate = HeuristicEstimator.estimate_batch(&messages, "gpt-4o");
/// println!("~{} tokens", estimate.tokens);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl HeuristicEstimator {
    fn cost(ruleset: &Ruleset, message: &Message, model: &str) -> usize {
        message
            .cached_tokens_for(model)
            .unwrap_or_else(|| ruleset.message_tokens(message))
    }

    fn note_fallback(model: &str) {
        tracing::debug!(
            model,
            "Unrecognized model name; estimating with the default ruleset"
        );
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, message: &Message, model: &str) -> Estimate {
        let (ruleset, fallback) = ruleset_for(model);
        if fallback {
            Self::note_fallback(model);
        }
        Estimate {
            tokens: Self::cost(&ruleset, message, model),
            fallback,
        }
    }

    fn estimate_batch(&self, messages: &[Message], model: &str) -> Estimate {
        let (ruleset, fallback) = ruleset_for(model);
        if fallback {
            Self::note_fallback(model);
        }
        if messages.is_empty() {
            return Estimate {
                tokens: 0,
                fallback,
            };
        }

        let content: usize = messages
            .iter()
            .map(|message| Self::cost(&ruleset, message, model))
            .sum();

        Estimate {
            tokens: content + ruleset.reply_priming,
            fallback,
        }
    }
}

/// An estimator that charges the same number of tokens for every message.
///
/// Useful for deterministic budgets and as a test double.
#[derive(Debug, Clone, Copy)]
pub struct FixedEstimator {
    tokens_per_message: usize,
}

impl FixedEstimator {
    pub fn new(tokens_per_message: usize) -> Self {
        Self { tokens_per_message }
    }
}

impl TokenEstimator for FixedEstimator {
    fn estimate(&self, _message: &Message, _model: &str) -> Estimate {
        Estimate::new(self.tokens_per_message)
    }
}
