//! Agent Memory Server working-memory client.
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::memory::{MemoryStore, StoreError};
use crate::message::{Message, Role};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ================================================================
// Wire types
// ================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role(),
            content: message.content().to_string(),
            created_at: message.timestamp(),
        }
    }
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let message = Message::new(wire.role, wire.content);
        match wire.created_at {
            Some(created_at) => message.with_timestamp(created_at),
            None => message,
        }
    }
}

#[derive(Debug, Serialize)]
struct WorkingMemoryRequest<'a> {
    session_id: &'a str,
    messages: Vec<WireMessage>,
    memories: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct WorkingMemoryResponse {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

// ================================================================
// Store
// ================================================================

/// A [`MemoryStore`] backed by an Agent Memory Server's working memory.
///
/// Each conversation id maps to a working-memory session. `replace` is a
/// single `PUT` of the full message list, which the server applies
/// atomically; `append` is a load followed by a replace.
#[derive(Debug, Clone)]
pub struct WorkingMemoryStore {
    http: reqwest::Client,
    base_url: Url,
    namespace: Option<String>,
    user_id: Option<String>,
}

impl WorkingMemoryStore {
    pub fn builder() -> WorkingMemoryStoreBuilder {
        WorkingMemoryStoreBuilder::default()
    }

    /// Create a store for the server at `base_url` with default settings.
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a store from `AGENT_MEMORY_SERVER_URL`, with optional
    /// `AGENT_MEMORY_NAMESPACE` and `AGENT_MEMORY_USER_ID`.
    pub fn from_env() -> Result<Self, StoreError> {
        let base_url = std::env::var("AGENT_MEMORY_SERVER_URL")
            .map_err(|_| StoreError::Unavailable("AGENT_MEMORY_SERVER_URL not set".into()))?;

        let mut builder = Self::builder().base_url(&base_url);
        if let Ok(namespace) = std::env::var("AGENT_MEMORY_NAMESPACE") {
            builder = builder.namespace(&namespace);
        }
        if let Ok(user_id) = std::env::var("AGENT_MEMORY_USER_ID") {
            builder = builder.user_id(&user_id);
        }
        builder.build()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn session_url(&self, conversation_id: &str) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Unavailable(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v1", "working-memory", conversation_id]);

        {
            let mut query = url.query_pairs_mut();
            if let Some(namespace) = &self.namespace {
                query.append_pair("namespace", namespace);
            }
            if let Some(user_id) = &self.user_id {
                query.append_pair("user_id", user_id);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    fn request_body<'a>(
        &'a self,
        conversation_id: &'a str,
        messages: &[Message],
    ) -> WorkingMemoryRequest<'a> {
        WorkingMemoryRequest {
            session_id: conversation_id,
            messages: messages.iter().map(WireMessage::from).collect(),
            memories: Vec::new(),
            namespace: self.namespace.as_deref(),
            user_id: self.user_id.as_deref(),
        }
    }

    async fn fetch(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let url = self.session_url(conversation_id)?;
        let response = self.http.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(conversation_id, "No working memory yet");
            return Ok(Vec::new());
        }
        let body = error_for_status(response).await?.bytes().await?;
        parse_messages(&body)
    }

    async fn put(&self, conversation_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let url = self.session_url(conversation_id)?;
        let response = self
            .http
            .put(url)
            .json(&self.request_body(conversation_id, messages))
            .send()
            .await?;
        error_for_status(response).await?;
        Ok(())
    }

    async fn remove(&self, conversation_id: &str) -> Result<(), StoreError> {
        let url = self.session_url(conversation_id)?;
        let response = self.http.delete(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        error_for_status(response).await?;
        Ok(())
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Unavailable(format!(
        "working memory server returned {status}: {body}"
    )))
}

fn parse_messages(body: &[u8]) -> Result<Vec<Message>, StoreError> {
    let response: WorkingMemoryResponse = serde_json::from_slice(body)?;
    Ok(response.messages.into_iter().map(Message::from).collect())
}

impl MemoryStore for WorkingMemoryStore {
    fn load(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send {
        self.fetch(conversation_id)
    }

    fn append(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            let mut messages = self.fetch(conversation_id).await?;
            messages.push(message);
            self.put(conversation_id, &messages).await
        }
    }

    fn replace(
        &self,
        conversation_id: &str,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move { self.put(conversation_id, &messages).await }
    }

    fn delete(&self, conversation_id: &str) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.remove(conversation_id)
    }
}

// ================================================================
// Builder
// ================================================================

#[derive(Debug, Clone)]
pub struct WorkingMemoryStoreBuilder {
    base_url: String,
    namespace: Option<String>,
    user_id: Option<String>,
    timeout: Duration,
    http: Option<reqwest::Client>,
}

impl Default for WorkingMemoryStoreBuilder {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            namespace: None,
            user_id: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            http: None,
        }
    }
}

impl WorkingMemoryStoreBuilder {
    pub fn base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Scope sessions to a namespace on the server.
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Owner identity attached to every session.
    pub fn user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Per-request timeout of the underlying HTTP client.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a preconfigured HTTP client. Overrides [`Self::timeout`].
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<WorkingMemoryStore, StoreError> {
        let base_url = Url::parse(&self.base_url).map_err(|err| {
            StoreError::Unavailable(format!("invalid base URL '{}': {err}", self.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Unavailable(format!(
                "invalid base URL '{}'",
                self.base_url
            )));
        }

        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder().timeout(self.timeout).build()?,
        };

        Ok(WorkingMemoryStore {
            http,
            base_url,
            namespace: self.namespace,
            user_id: self.user_id,
        })
    }
}
