//! Process-local conversation store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use crate::message::Message;

use super::traits::{MemoryStore, StoreError, Versioned};

#[derive(Debug, Default)]
struct Entry {
    messages: Vec<Message>,
    version: u64,
}

/// Versions come from one counter for the whole store, so a conversation
/// that is deleted and written again never reuses a version a reader saw.
#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    last_version: u64,
}

impl State {
    fn write_entry(&mut self, conversation_id: &str) -> &mut Entry {
        self.last_version += 1;
        let entry = self.entries.entry(conversation_id.to_string()).or_default();
        entry.version = self.last_version;
        entry
    }
}

/// A versioned in-memory [`MemoryStore`].
///
/// Cloning is cheap and clones share the same conversations. Every write
/// assigns the conversation a fresh version, so [`MemoryStore::replace_if_version`]
/// can detect a concurrent writer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of a conversation, `None` if it was never written.
    pub fn version(&self, conversation_id: &str) -> Result<Option<u64>, StoreError> {
        self.read(|state| state.entries.get(conversation_id).map(|entry| entry.version))
    }

    /// Ids of all conversations currently held.
    pub fn conversation_ids(&self) -> Result<Vec<String>, StoreError> {
        self.read(|state| state.entries.keys().cloned().collect())
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T, StoreError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))?;
        Ok(f(&guard))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut State) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))?;
        f(&mut guard)
    }

    fn load_now(&self, conversation_id: &str) -> Result<Versioned<Vec<Message>>, StoreError> {
        self.read(|state| match state.entries.get(conversation_id) {
            Some(entry) => Versioned {
                value: entry.messages.clone(),
                version: Some(entry.version),
            },
            None => Versioned {
                value: Vec::new(),
                version: None,
            },
        })
    }

    fn replace_now(
        &self,
        conversation_id: &str,
        messages: Vec<Message>,
        expected: Option<Option<u64>>,
    ) -> Result<(), StoreError> {
        self.write(|state| {
            let found = state.entries.get(conversation_id).map(|entry| entry.version);
            if let Some(expected) = expected {
                if expected != found {
                    return Err(StoreError::VersionConflict { expected, found });
                }
            }

            state.write_entry(conversation_id).messages = messages;
            Ok(())
        })
    }
}

impl MemoryStore for InMemoryStore {
    fn load(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send {
        async move { self.load_now(conversation_id).map(|loaded| loaded.value) }
    }

    fn append(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            self.write(|state| {
                state.write_entry(conversation_id).messages.push(message);
                Ok(())
            })
        }
    }

    fn replace(
        &self,
        conversation_id: &str,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move { self.replace_now(conversation_id, messages, None) }
    }

    fn delete(&self, conversation_id: &str) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            self.write(|state| {
                state.entries.remove(conversation_id);
                Ok(())
            })
        }
    }

    fn load_versioned(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Versioned<Vec<Message>>, StoreError>> + Send {
        async move { self.load_now(conversation_id) }
    }

    fn replace_if_version(
        &self,
        conversation_id: &str,
        messages: Vec<Message>,
        expected: Option<u64>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move { self.replace_now(conversation_id, messages, Some(expected)) }
    }
}
