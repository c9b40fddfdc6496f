//! Token-window chat memory.
//!
//! Every [`TokenWindowMemory::add`] reloads the conversation from the store,
//! appends the message to a local copy, evicts the oldest pairs until the
//! window fits the budget, and persists the result with a single atomic
//! replace. Nothing is written before that final replace, so a cancelled
//! add leaves the stored conversation untouched.

use std::future::Future;

use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::message::Message;

use super::estimator::HeuristicEstimator;
use super::events::{AddOutcome, MemoryEvent};
use super::pairing::PairWindow;
use super::traits::{MemoryStore, StoreError, TokenEstimator};

/// How a new message entered the local window.
enum Admission {
    Appended,
    PromptSet,
    PromptReplaced,
    PromptUnchanged,
}

/// Bounded short-term memory over a [`MemoryStore`].
///
/// Constructed once per process and shared; concurrent calls for different
/// conversations never touch each other's state.
///
/// # Example
/// ```ignore
/// use tokenwindow::{MemoryConfig, Message};
/// use tokenwindow::memory::{InMemoryStore, TokenWindowMemory};
///
/// let memory = TokenWindowMemory::new(MemoryConfig::new(4096, "gpt-4o"), InMemoryStore::new())?;
/// memory.add("alice", Message::user("Hi!")).await?;
/// let window = memory.get_all("alice").await?;
/// ```
#[derive(Debug)]
pub struct TokenWindowMemory<S, E = HeuristicEstimator> {
    config: MemoryConfig,
    policy: PairWindow,
    store: S,
    estimator: E,
}

impl<S: MemoryStore> TokenWindowMemory<S> {
    /// Create a memory using the built-in heuristic estimator.
    pub fn new(config: MemoryConfig, store: S) -> Result<Self, MemoryError> {
        Self::with_estimator(config, store, HeuristicEstimator)
    }
}

impl<S, E> TokenWindowMemory<S, E>
where
    S: MemoryStore,
    E: TokenEstimator,
{
    pub fn with_estimator(
        config: MemoryConfig,
        store: S,
        estimator: E,
    ) -> Result<Self, MemoryError> {
        config.validate()?;
        let policy = PairWindow::new(config.max_tokens, config.model_name.clone())
            .with_exempt_system_prompt(config.exempt_system_prompt);

        Ok(Self {
            config,
            policy,
            store,
            estimator,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    /// A handle bound to one conversation.
    pub fn conversation(&self, conversation_id: impl Into<String>) -> ConversationMemory<'_, S, E> {
        ConversationMemory {
            memory: self,
            conversation_id: conversation_id.into(),
        }
    }

    /// Add a message, evict old pairs if the budget is exceeded, and persist the window.
    ///
    /// Either the full pruned window is persisted or an error is returned and
    /// the add did not take effect.
    #[tracing::instrument(skip(self, message), fields(role = %message.role()))]
    pub async fn add(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<AddOutcome, MemoryError> {
        let model = self.config.model_name.as_str();
        let estimate = self.estimator.estimate(&message, model);
        let message = message.with_token_count(model, estimate.tokens);

        let mut conflicts = 0;
        loop {
            match self.try_add(conversation_id, &message).await {
                Ok(mut outcome) => {
                    if estimate.fallback && !outcome.used_fallback() {
                        outcome.events.insert(0, self.fallback_event());
                    }
                    return Ok(outcome);
                }
                Err(StoreError::VersionConflict { expected, found }) => {
                    conflicts += 1;
                    if conflicts > self.config.max_conflict_retries {
                        tracing::warn!(conflicts, "Giving up after repeated version conflicts");
                        return Err(MemoryError::ConflictRetriesExhausted {
                            conversation_id: conversation_id.to_string(),
                            attempts: conflicts,
                        });
                    }
                    tracing::debug!(?expected, ?found, conflicts, "Version conflict, retrying add");
                }
                Err(err) => return Err(MemoryError::store(conversation_id, err)),
            }
        }
    }

    /// Load the current window without modifying it.
    #[tracing::instrument(skip(self))]
    pub async fn get_all(&self, conversation_id: &str) -> Result<Vec<Message>, MemoryError> {
        self.bounded(self.store.load(conversation_id))
            .await
            .map_err(|err| MemoryError::store(conversation_id, err))
    }

    /// Remove every message of a conversation, including its system prompt.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, conversation_id: &str) -> Result<(), MemoryError> {
        self.bounded(self.store.delete(conversation_id))
            .await
            .map_err(|err| MemoryError::store(conversation_id, err))
    }

    async fn try_add(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> Result<AddOutcome, StoreError> {
        let loaded = self.bounded(self.store.load_versioned(conversation_id)).await?;
        tracing::debug!(
            messages = loaded.value.len(),
            version = ?loaded.version,
            "Loaded conversation"
        );

        let mut window = loaded.value;
        let admission = self.admit(&mut window, message.clone());

        if let Admission::PromptUnchanged = admission {
            let (_, rest) = self.policy.split(&window);
            let estimate = self.estimator.estimate_batch(rest, &self.config.model_name);
            let mut events = Vec::new();
            if estimate.fallback {
                events.push(self.fallback_event());
            }
            return Ok(AddOutcome {
                window,
                total_tokens: estimate.tokens,
                evicted_pairs: 0,
                events,
            });
        }

        let pruned = self.policy.prune(&self.estimator, window);
        let mut events = Vec::new();

        if pruned.fallback {
            events.push(self.fallback_event());
        }
        if let Admission::PromptReplaced = admission {
            events.push(MemoryEvent::SystemPromptReplaced);
        }
        events.extend(
            pruned
                .evicted
                .iter()
                .map(|&tokens_freed| MemoryEvent::PairEvicted { tokens_freed }),
        );

        if !pruned.evicted.is_empty() {
            tracing::info!(
                evicted_pairs = pruned.evicted.len(),
                tokens_freed = pruned.evicted.iter().sum::<usize>(),
                total_tokens = pruned.total_tokens,
                "Evicted oldest pairs to fit the token budget"
            );
        }

        if pruned.over_budget(self.config.max_tokens) {
            tracing::warn!(
                total_tokens = pruned.total_tokens,
                max_tokens = self.config.max_tokens,
                "Retained tail exceeds the token budget after eviction; keeping it anyway"
            );
            events.push(MemoryEvent::BudgetOverflowRetained {
                total_tokens: pruned.total_tokens,
                max_tokens: self.config.max_tokens,
            });
        }

        self.bounded(self.store.replace_if_version(
            conversation_id,
            pruned.window.clone(),
            loaded.version,
        ))
        .await?;
        tracing::debug!(messages = pruned.window.len(), "Persisted conversation");

        Ok(AddOutcome {
            window: pruned.window,
            total_tokens: pruned.total_tokens,
            evicted_pairs: pruned.evicted.len(),
            events,
        })
    }

    /// Place the message in the window. An exempt system message sets or
    /// replaces the leading prompt instead of joining the pair window.
    fn admit(&self, window: &mut Vec<Message>, message: Message) -> Admission {
        if !(self.config.exempt_system_prompt && message.is_system()) {
            window.push(message);
            return Admission::Appended;
        }

        let unchanged = window
            .first()
            .filter(|current| current.is_system())
            .map(|current| current.same_content(&message));

        match unchanged {
            Some(true) => Admission::PromptUnchanged,
            Some(false) => {
                window[0] = message;
                Admission::PromptReplaced
            }
            None => {
                window.insert(0, message);
                Admission::PromptSet
            }
        }
    }

    fn fallback_event(&self) -> MemoryEvent {
        tracing::warn!(
            model = %self.config.model_name,
            "Unrecognized model name; token counts use the default ruleset"
        );
        MemoryEvent::EstimationFallback {
            model: self.config.model_name.clone(),
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.store_timeout)),
        }
    }
}

/// A [`TokenWindowMemory`] bound to a single conversation id.
#[derive(Debug)]
pub struct ConversationMemory<'a, S, E = HeuristicEstimator> {
    memory: &'a TokenWindowMemory<S, E>,
    conversation_id: String,
}

impl<S, E> ConversationMemory<'_, S, E>
where
    S: MemoryStore,
    E: TokenEstimator,
{
    pub fn id(&self) -> &str {
        &self.conversation_id
    }

    pub async fn add(&self, message: Message) -> Result<AddOutcome, MemoryError> {
        self.memory.add(&self.conversation_id, message).await
    }

    pub async fn get_all(&self) -> Result<Vec<Message>, MemoryError> {
        self.memory.get_all(&self.conversation_id).await
    }

    pub async fn clear(&self) -> Result<(), MemoryError> {
        self.memory.clear(&self.conversation_id).await
    }
}
