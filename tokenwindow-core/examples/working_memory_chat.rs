//! Example of keeping a chat within a token budget on an Agent Memory Server.
//!
//! Set `AGENT_MEMORY_SERVER_URL` to use a running server; otherwise the
//! conversation is kept in process memory. `TOKENWINDOW_MAX_TOKENS` and
//! `TOKENWINDOW_MODEL` override the defaults below.

use tokenwindow::memory::{InMemoryStore, MemoryStore, TokenWindowMemory};
use tokenwindow::providers::agent_memory_server::WorkingMemoryStore;
use tokenwindow::{MemoryConfig, Message};
use tracing_subscriber::EnvFilter;

const TURNS: &[(&str, &str)] = &[
    (
        "What is the difference between &str and String in Rust?",
        "&str is a borrowed string slice; String is an owned, growable buffer.",
    ),
    (
        "When should a function take &str?",
        "When it only reads the text, so callers can pass either kind.",
    ),
    (
        "And when should it return String?",
        "When it builds new text the caller will own.",
    ),
];

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = MemoryConfig::from_env().unwrap_or_else(|_| MemoryConfig::new(60, "gpt-4o"));

    if std::env::var("AGENT_MEMORY_SERVER_URL").is_ok() {
        chat(TokenWindowMemory::new(config, WorkingMemoryStore::from_env()?)?).await
    } else {
        chat(TokenWindowMemory::new(config, InMemoryStore::new())?).await
    }
}

async fn chat<S: MemoryStore>(memory: TokenWindowMemory<S>) -> Result<(), anyhow::Error> {
    let session = memory.conversation("demo-user");
    session.clear().await?;
    session
        .add(Message::system("You are a helpful coding assistant. Be precise and concise."))
        .await?;

    for (question, answer) in TURNS {
        session.add(Message::user(*question)).await?;
        let outcome = session.add(Message::assistant(*answer)).await?;
        println!(
            "{} messages, ~{} tokens, {} pair(s) evicted",
            outcome.window.len(),
            outcome.total_tokens,
            outcome.evicted_pairs
        );
    }

    for message in session.get_all().await? {
        println!("[{}] {}", message.role(), message.content());
    }

    Ok(())
}
