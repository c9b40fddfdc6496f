//! Token-bounded short-term chat memory.
//!
//! This module keeps a conversation within a token budget by evicting the
//! oldest user/assistant pairs, while never evicting a leading system prompt
//! or the newest exchange. Token counting and persistence are pluggable
//! through [`TokenEstimator`] and [`MemoryStore`].

mod estimator;
mod events;
mod in_memory;
mod pairing;
mod traits;
mod window;

pub use estimator::{
    FixedEstimator, HeuristicEstimator, Ruleset, estimate_tokens, ruleset_for,
};
pub use events::{AddOutcome, MemoryEvent};
pub use in_memory::InMemoryStore;
pub use pairing::{PairWindow, Pruned};
pub use traits::{Estimate, MemoryStore, StoreError, TokenEstimator, Versioned};
pub use window::{ConversationMemory, TokenWindowMemory};
