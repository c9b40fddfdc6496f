use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokenwindow::memory::{
    AddOutcome, FixedEstimator, HeuristicEstimator, InMemoryStore, MemoryEvent, MemoryStore,
    PairWindow, StoreError, TokenEstimator, TokenWindowMemory, Versioned,
};
use tokenwindow::{MemoryConfig, MemoryError, Message};
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixed_memory(
    max_tokens: usize,
    tokens_per_message: usize,
) -> TokenWindowMemory<InMemoryStore, FixedEstimator> {
    TokenWindowMemory::with_estimator(
        MemoryConfig::new(max_tokens, "gpt-4o"),
        InMemoryStore::new(),
        FixedEstimator::new(tokens_per_message),
    )
    .unwrap()
}

fn contents(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(Message::content).collect()
}

fn turn(i: usize) -> Message {
    if i % 2 == 0 {
        Message::user(format!("u{i}"))
    } else {
        Message::assistant(format!("a{i}"))
    }
}

// ================================================================
// Store doubles
// ================================================================

/// Every call fails as if the backend were down.
struct DownStore;

impl MemoryStore for DownStore {
    fn load(&self, _: &str) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send {
        async { Err(StoreError::Unavailable("connection refused".into())) }
    }

    fn append(&self, _: &str, _: Message) -> impl Future<Output = Result<(), StoreError>> + Send {
        async { Err(StoreError::Unavailable("connection refused".into())) }
    }

    fn replace(
        &self,
        _: &str,
        _: Vec<Message>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async { Err(StoreError::Unavailable("connection refused".into())) }
    }
}

/// Delays every load by `delay`, then delegates.
#[derive(Clone)]
struct SlowStore {
    inner: InMemoryStore,
    delay: Duration,
}

impl MemoryStore for SlowStore {
    fn load(&self, id: &str) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send {
        async move {
            tokio::time::sleep(self.delay).await;
            self.inner.load(id).await
        }
    }

    fn append(
        &self,
        id: &str,
        message: Message,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.append(id, message)
    }

    fn replace(
        &self,
        id: &str,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.replace(id, messages)
    }

    fn load_versioned(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Versioned<Vec<Message>>, StoreError>> + Send {
        async move {
            tokio::time::sleep(self.delay).await;
            self.inner.load_versioned(id).await
        }
    }
}

/// Lets another writer sneak in before each of the first `conflicts` versioned replaces.
struct RacingStore {
    inner: InMemoryStore,
    conflicts: AtomicU32,
}

impl RacingStore {
    fn new(conflicts: u32) -> Self {
        Self {
            inner: InMemoryStore::new(),
            conflicts: AtomicU32::new(conflicts),
        }
    }
}

impl MemoryStore for RacingStore {
    fn load(&self, id: &str) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send {
        self.inner.load(id)
    }

    fn append(
        &self,
        id: &str,
        message: Message,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.append(id, message)
    }

    fn replace(
        &self,
        id: &str,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.replace(id, messages)
    }

    fn load_versioned(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Versioned<Vec<Message>>, StoreError>> + Send {
        self.inner.load_versioned(id)
    }

    fn replace_if_version(
        &self,
        id: &str,
        messages: Vec<Message>,
        expected: Option<u64>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            let race = self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if race {
                self.inner.append(id, Message::user("interloper")).await?;
            }
            self.inner.replace_if_version(id, messages, expected).await
        }
    }
}

// ================================================================
// Scenarios
// ================================================================

#[tokio::test]
async fn oldest_pair_is_evicted_first() {
    init_tracing();
    let memory = fixed_memory(100, 40);
    memory
        .add("c", Message::system("You are a workshop assistant."))
        .await
        .unwrap();

    let mut outcomes: Vec<AddOutcome> = Vec::new();
    for i in 0..5 {
        outcomes.push(memory.add("c", turn(i)).await.unwrap());
    }

    let last = outcomes.last().unwrap();
    assert_eq!(
        contents(&last.window),
        vec!["You are a workshop assistant.", "u2", "a3", "u4"]
    );
    assert_eq!(last.total_tokens, 120);
    assert_eq!(
        outcomes.iter().map(|o| o.evicted_pairs).sum::<usize>(),
        1,
        "exactly one pair should have been evicted over the whole run"
    );
    assert_eq!(outcomes[3].events, vec![MemoryEvent::PairEvicted { tokens_freed: 80 }]);
    // The last pair fits alone; the trailing question pushes the tail over.
    assert_eq!(
        last.events,
        vec![MemoryEvent::BudgetOverflowRetained {
            total_tokens: 120,
            max_tokens: 100
        }]
    );
    assert_eq!(memory.get_all("c").await.unwrap(), last.window);
}

#[tokio::test]
async fn oversized_first_turn_is_retained() {
    let memory = fixed_memory(10, 50);
    let outcome = memory.add("c", Message::user("a very long question")).await.unwrap();

    assert!(outcome.overflowed());
    assert_eq!(
        outcome.events,
        vec![MemoryEvent::BudgetOverflowRetained {
            total_tokens: 50,
            max_tokens: 10
        }]
    );
    assert_eq!(memory.get_all("c").await.unwrap().len(), 1);
}

#[tokio::test]
async fn conversations_are_isolated() {
    let memory = fixed_memory(1_000, 10);
    for i in 0..4 {
        memory.add("A", Message::user(format!("A{i}"))).await.unwrap();
        memory.add("B", Message::user(format!("B{i}"))).await.unwrap();
    }
    assert_ok!(memory.clear("B").await);

    assert_eq!(
        contents(&memory.get_all("A").await.unwrap()),
        vec!["A0", "A1", "A2", "A3"]
    );
    assert!(memory.get_all("B").await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_model_falls_back_once_per_add() {
    let estimate = HeuristicEstimator.estimate(&Message::user("hello"), "acme-llm-7");
    assert!(estimate.fallback);
    assert!(estimate.tokens > 0);

    let memory =
        TokenWindowMemory::new(MemoryConfig::new(50, "acme-llm-7"), InMemoryStore::new()).unwrap();
    for i in 0..6 {
        let outcome = memory.add("c", turn(i)).await.unwrap();
        let fallbacks = outcome
            .events
            .iter()
            .filter(|event| matches!(event, MemoryEvent::EstimationFallback { .. }))
            .count();
        assert_eq!(fallbacks, 1);
    }
}

// ================================================================
// Invariants
// ================================================================

#[tokio::test]
async fn window_invariants_hold_for_every_add() {
    let max_tokens = 120;
    let memory =
        TokenWindowMemory::new(MemoryConfig::new(max_tokens, "gpt-4o"), InMemoryStore::new())
            .unwrap();
    let policy = PairWindow::new(max_tokens, "gpt-4o");
    let prompt = Message::system("Answer in one sentence.");
    memory.add("c", prompt.clone()).await.unwrap();

    let mut history: Vec<Message> = Vec::new();
    let mut previous_pairs = 0;

    for i in 0..40 {
        let text = "x".repeat((i * 37 % 11 + 1) * 20);
        let message = if i % 2 == 0 {
            Message::user(text)
        } else {
            Message::assistant(text)
        };
        history.push(message.clone());
        let outcome = memory.add("c", message).await.unwrap();

        // The prompt is never evicted.
        assert!(outcome.window[0].same_content(&prompt));
        let (_, rest) = policy.split(&outcome.window);

        // Within budget, or only the newest pair (plus a trailing turn) remains.
        assert!(outcome.total_tokens <= max_tokens || rest.len() / 2 <= 1);
        assert_eq!(outcome.overflowed(), outcome.total_tokens > max_tokens);

        // Retained turns are a suffix of history that starts on a pair boundary.
        let offset = history.len() - rest.len();
        assert_eq!(offset % 2, 0);
        assert!(
            rest.iter()
                .zip(&history[offset..])
                .all(|(kept, original)| kept.same_content(original))
        );

        // Pair count grows by at most the pair this add completed.
        let pairs = rest.len() / 2;
        assert!(pairs <= previous_pairs + 1);
        previous_pairs = pairs;

        // Reads are idempotent and never prune.
        let first = memory.get_all("c").await.unwrap();
        let second = memory.get_all("c").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, outcome.window);
    }
}

#[tokio::test]
async fn trailing_unanswered_message_is_never_evicted_alone() {
    let memory = fixed_memory(50, 40);
    memory.add("c", turn(0)).await.unwrap();
    memory.add("c", turn(1)).await.unwrap();
    let outcome = memory.add("c", turn(2)).await.unwrap();

    assert_eq!(contents(&outcome.window), vec!["u0", "a1", "u2"]);
    assert_eq!(outcome.evicted_pairs, 0);
    assert!(outcome.overflowed());

    let answered = memory.add("c", turn(3)).await.unwrap();
    assert_eq!(contents(&answered.window), vec!["u2", "a3"]);
    assert_eq!(answered.evicted_pairs, 1);
}

// ================================================================
// Failures and concurrency
// ================================================================

#[tokio::test]
async fn store_failure_is_surfaced() {
    let memory = TokenWindowMemory::new(MemoryConfig::new(100, "gpt-4o"), DownStore).unwrap();

    let err = memory.add("c", Message::user("hi")).await.unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(
        err,
        MemoryError::StoreUnavailable {
            source: StoreError::Unavailable(_),
            ..
        }
    ));
    assert_err!(memory.get_all("c").await);
}

#[tokio::test(start_paused = true)]
async fn store_calls_are_bounded_by_timeout() {
    let store = SlowStore {
        inner: InMemoryStore::new(),
        delay: Duration::from_secs(60),
    };
    let config = MemoryConfig::new(100, "gpt-4o").with_store_timeout(Duration::from_millis(100));
    let memory = TokenWindowMemory::new(config, store.clone()).unwrap();

    let err = memory.add("c", Message::user("hi")).await.unwrap_err();
    assert!(matches!(
        err,
        MemoryError::StoreUnavailable {
            source: StoreError::Timeout(_),
            ..
        }
    ));
    assert!(store.inner.load("c").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_add_writes_nothing() {
    let store = SlowStore {
        inner: InMemoryStore::new(),
        delay: Duration::from_secs(1),
    };
    let memory = TokenWindowMemory::new(MemoryConfig::new(100, "gpt-4o"), store.clone()).unwrap();

    let cancelled =
        tokio::time::timeout(Duration::from_millis(10), memory.add("c", Message::user("hi"))).await;
    assert!(cancelled.is_err());
    assert_eq!(store.inner.version("c").unwrap(), None);
}

#[tokio::test]
async fn version_conflicts_are_retried() {
    let memory = TokenWindowMemory::with_estimator(
        MemoryConfig::new(1_000, "gpt-4o").with_max_conflict_retries(3),
        RacingStore::new(2),
        FixedEstimator::new(10),
    )
    .unwrap();

    let outcome = memory.add("c", Message::user("mine")).await.unwrap();
    assert_eq!(
        contents(&outcome.window),
        vec!["interloper", "interloper", "mine"]
    );
}

#[tokio::test]
async fn version_conflicts_give_up_after_bounded_retries() {
    let memory = TokenWindowMemory::with_estimator(
        MemoryConfig::new(1_000, "gpt-4o").with_max_conflict_retries(3),
        RacingStore::new(10),
        FixedEstimator::new(10),
    )
    .unwrap();

    let err = memory.add("c", Message::user("mine")).await.unwrap_err();
    assert!(matches!(
        err,
        MemoryError::ConflictRetriesExhausted { attempts: 4, .. }
    ));
    let stored = memory.store().load("c").await.unwrap();
    assert!(stored.iter().all(|m| m.content() == "interloper"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_conversations_do_not_interfere() {
    let memory = Arc::new(fixed_memory(10_000, 10));

    let handles: Vec<_> = (0..8)
        .map(|c| {
            let memory = Arc::clone(&memory);
            tokio::spawn(async move {
                let id = format!("conversation-{c}");
                for i in 0..10 {
                    memory
                        .add(&id, Message::user(format!("{id}/{i}")))
                        .await
                        .unwrap();
                }
                id
            })
        })
        .collect();

    for id in futures::future::join_all(handles).await {
        let id = id.unwrap();
        let window = memory.get_all(&id).await.unwrap();
        assert_eq!(window.len(), 10);
        assert!(window.iter().all(|m| m.content().starts_with(&id)));
    }
}
