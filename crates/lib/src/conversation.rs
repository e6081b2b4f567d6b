//! Conversation log: the messages exchanged on one surface, with source attribution.
//!
//! Append-only between clears. A persisted log is rewritten to its key on every change;
//! a transient one (the prompt surface's single exchange) lives in memory only.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::{ChatMessage, Chunk};
use crate::events::{self, EventSender, SurfaceEvent};
use crate::storage::{self, KvStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A retrieved chunk attached to an assistant message as provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub doc_id: String,
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_label: Option<String>,
    pub text: String,
}

impl From<Chunk> for Source {
    fn from(chunk: Chunk) -> Self {
        Self {
            file_name: chunk.file_name().map(str::to_string),
            page_label: chunk.page_label().map(str::to_string),
            text: chunk.excerpt().to_string(),
            doc_id: chunk.document.doc_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Present only on generated assistant messages; empty when sources were not requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources: None,
        }
    }

    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// The message as conversation input for the backend; sources are display-only.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role.as_str().to_string(),
            content: self.content.clone(),
        }
    }
}

struct Persistence {
    kv: Arc<dyn KvStore>,
    key: String,
}

pub struct ConversationStore {
    messages: RwLock<Vec<Message>>,
    persistence: Option<Persistence>,
    events: EventSender,
}

impl ConversationStore {
    /// A log that is never written anywhere.
    pub fn transient(events: EventSender) -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            persistence: None,
            events,
        }
    }

    /// Load the log stored under `key` (empty when absent) and persist every later change there.
    pub async fn load(
        kv: Arc<dyn KvStore>,
        key: impl Into<String>,
        events: EventSender,
    ) -> Result<Self, StorageError> {
        let key = key.into();
        let messages: Vec<Message> = storage::load(kv.as_ref(), &key).await?.unwrap_or_default();
        log::debug!("loaded {} messages from {}", messages.len(), key);
        Ok(Self {
            messages: RwLock::new(messages),
            persistence: Some(Persistence { kv, key }),
            events,
        })
    }

    /// Add a message at the end and persist the log.
    pub async fn append(&self, message: Message) -> Result<(), StorageError> {
        let mut messages = self.messages.write().await;
        messages.push(message.clone());
        let persisted = self.persist(&messages).await;
        drop(messages);
        events::emit(&self.events, SurfaceEvent::MessageAppended(message));
        persisted
    }

    /// Replace the log with an empty one.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let mut messages = self.messages.write().await;
        *messages = Vec::new();
        let persisted = self.persist(&messages).await;
        drop(messages);
        events::emit(&self.events, SurfaceEvent::Cleared);
        persisted
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    /// Role/content pairs to send as conversation input.
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.messages
            .read()
            .await
            .iter()
            .map(Message::to_chat_message)
            .collect()
    }

    async fn persist(&self, messages: &[Message]) -> Result<(), StorageError> {
        let Some(p) = &self.persistence else {
            return Ok(());
        };
        storage::save(p.kv.as_ref(), &p.key, messages)
            .await
            .inspect_err(|e| log::warn!("persisting {} failed: {}", p.key, e))
    }
}
