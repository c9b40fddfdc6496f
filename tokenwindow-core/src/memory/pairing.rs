//! Pair-wise FIFO eviction over a conversation window.
//!
//! Messages after the exempt system prompt are paired strictly by position:
//! indices 0,1 form the first pair, 2,3 the second, and so on. Eviction
//! removes whole pairs from the oldest end. The newest complete pair and
//! any trailing unanswered message are never evicted, even when they alone
//! exceed the budget.

use crate::message::Message;

use super::traits::TokenEstimator;

/// The outcome of pruning a window against a token budget.
#[derive(Debug, Clone, PartialEq)]
pub struct Pruned {
    /// The retained window, exempt prompt first when present.
    pub window: Vec<Message>,
    /// Tokens of the retained window, excluding the exempt prompt.
    pub total_tokens: usize,
    /// Tokens freed by each evicted pair, oldest first.
    pub evicted: Vec<usize>,
    /// The estimator fell back to its default ruleset at least once.
    pub fallback: bool,
}

impl Pruned {
    pub fn over_budget(&self, max_tokens: usize) -> bool {
        self.total_tokens > max_tokens
    }
}

/// A pair-evicting window policy for one model and budget.
///
/// # Example
/// ```ignore
/// use tokenwindow::memory::{FixedEstimator, PairWindow};
///
/// let policy = PairWindow::new(100, "gpt-4o");
/// let pruned = policy.prune(&FixedEstimator::new(40), messages);
/// ```
#[derive(Debug, Clone)]
pub struct PairWindow {
    max_tokens: usize,
    model: String,
    exempt_system_prompt: bool,
}

impl PairWindow {
    pub fn new(max_tokens: usize, model: impl Into<String>) -> Self {
        Self {
            max_tokens,
            model: model.into(),
            exempt_system_prompt: true,
        }
    }

    /// Whether a leading system message is kept out of the budget and never evicted.
    pub fn with_exempt_system_prompt(mut self, exempt: bool) -> Self {
        self.exempt_system_prompt = exempt;
        self
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn exempt_system_prompt(&self) -> bool {
        self.exempt_system_prompt
    }

    /// Number of leading messages that are exempt from accounting (0 or 1).
    pub fn exempt_len(&self, messages: &[Message]) -> usize {
        match messages.first() {
            Some(first) if self.exempt_system_prompt && first.is_system() => 1,
            _ => 0,
        }
    }

    /// Split a window into its exempt prompt and the prunable remainder.
    pub fn split<'a>(&self, messages: &'a [Message]) -> (Option<&'a Message>, &'a [Message]) {
        let exempt = self.exempt_len(messages);
        (messages[..exempt].first(), &messages[exempt..])
    }

    /// Evict oldest pairs until the window fits the budget or one complete pair remains.
    pub fn prune<E>(&self, estimator: &E, mut messages: Vec<Message>) -> Pruned
    where
        E: TokenEstimator + ?Sized,
    {
        let exempt = self.exempt_len(&messages);
        let mut start = exempt;

        let mut estimate = estimator.estimate_batch(&messages[start..], &self.model);
        let mut fallback = estimate.fallback;
        let mut evicted = Vec::new();

        while estimate.tokens > self.max_tokens && complete_pairs(messages.len() - start) > 1 {
            let before = estimate.tokens;
            start += 2;
            estimate = estimator.estimate_batch(&messages[start..], &self.model);
            fallback |= estimate.fallback;
            evicted.push(before.saturating_sub(estimate.tokens));
        }

        if start > exempt {
            messages.drain(exempt..start);
        }

        Pruned {
            window: messages,
            total_tokens: estimate.tokens,
            evicted,
            fallback,
        }
    }
}

fn complete_pairs(len: usize) -> usize {
    len / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::estimator::FixedEstimator;

    fn turns(count: usize) -> Vec<Message> {
        (0..count)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                }
            })
            .collect()
    }

    #[test]
    fn test_prune_empty_window() {
        let pruned = PairWindow::new(100, "gpt-4o").prune(&FixedEstimator::new(40), vec![]);
        assert!(pruned.window.is_empty());
        assert_eq!(pruned.total_tokens, 0);
        assert!(pruned.evicted.is_empty());
    }

    #[test]
    fn test_prune_within_budget_is_untouched() {
        let messages = turns(2);
        let policy = PairWindow::new(100, "gpt-4o");
        let pruned = policy.prune(&FixedEstimator::new(40), messages.clone());
        assert_eq!(pruned.window, messages);
        assert_eq!(pruned.total_tokens, 80);
    }

    #[test]
    fn test_prune_evicts_oldest_pair_first() {
        let messages = turns(4);
        let policy = PairWindow::new(100, "gpt-4o");
        let pruned = policy.prune(&FixedEstimator::new(40), messages.clone());
        assert_eq!(pruned.window, messages[2..].to_vec());
        assert_eq!(pruned.evicted, vec![80]);
        assert_eq!(pruned.total_tokens, 80);
    }

    #[test]
    fn test_prune_keeps_trailing_unanswered_message() {
        // Two pairs and a trailing question, 200 tokens against 100.
        let messages = turns(5);
        let policy = PairWindow::new(100, "gpt-4o");
        let pruned = policy.prune(&FixedEstimator::new(40), messages.clone());
        assert_eq!(pruned.window, messages[2..].to_vec());
        assert_eq!(pruned.total_tokens, 120);
        assert_eq!(pruned.evicted.len(), 1);
        assert!(pruned.over_budget(100));
    }

    #[test]
    fn test_prune_never_evicts_exempt_prompt() {
        let mut messages = vec![Message::system("You are terse.")];
        messages.extend(turns(6));
        let policy = PairWindow::new(80, "gpt-4o");
        let pruned = policy.prune(&FixedEstimator::new(40), messages.clone());

        assert_eq!(pruned.window[0], messages[0]);
        assert_eq!(&pruned.window[1..], &messages[5..]);
        assert_eq!(pruned.total_tokens, 80);
        assert_eq!(pruned.evicted, vec![80, 80]);
    }

    #[test]
    fn test_system_prompt_is_counted_when_not_exempt() {
        let mut messages = vec![Message::system("You are terse.")];
        messages.extend(turns(1));
        let policy = PairWindow::new(100, "gpt-4o").with_exempt_system_prompt(false);
        let (prompt, rest) = policy.split(&messages);
        assert!(prompt.is_none());
        assert_eq!(rest.len(), 2);
        assert_eq!(policy.prune(&FixedEstimator::new(40), messages).total_tokens, 80);
    }

    #[test]
    fn test_single_oversized_pair_is_retained() {
        let messages = turns(2);
        let policy = PairWindow::new(10, "gpt-4o");
        let pruned = policy.prune(&FixedEstimator::new(50), messages.clone());
        assert_eq!(pruned.window, messages);
        assert!(pruned.evicted.is_empty());
        assert!(pruned.over_budget(10));
    }
}
