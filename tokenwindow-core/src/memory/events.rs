//! Non-fatal conditions reported by [`super::TokenWindowMemory::add`].

use crate::message::Message;

/// A condition worth reporting that did not fail the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryEvent {
    /// The configured model name was not recognized; the default ruleset was used.
    EstimationFallback { model: String },
    /// The newest pair alone exceeds the budget and was kept anyway.
    BudgetOverflowRetained {
        total_tokens: usize,
        max_tokens: usize,
    },
    /// The oldest pair was evicted.
    PairEvicted { tokens_freed: usize },
    /// A new system message replaced the exempt prompt.
    SystemPromptReplaced,
}

/// The result of a successful add.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddOutcome {
    /// The persisted window, exempt prompt first when present.
    pub window: Vec<Message>,
    /// Tokens of the window, excluding the exempt prompt.
    pub total_tokens: usize,
    pub evicted_pairs: usize,
    pub events: Vec<MemoryEvent>,
}

impl AddOutcome {
    pub fn overflowed(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, MemoryEvent::BudgetOverflowRetained { .. }))
    }

    pub fn used_fallback(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, MemoryEvent::EstimationFallback { .. }))
    }
}
