//! PrivateGPT wire types (snake_case JSON, OpenAI-shaped streaming chunks).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Restricts retrieval to the listed document ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFilter {
    pub docs_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_label: Option<String>,
    /// Sentence window text the chunk was cut from (set by the sentence-window ingest mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDocument {
    pub doc_id: String,
    #[serde(default)]
    pub doc_metadata: Option<DocMetadata>,
}

/// A retrieved excerpt of an ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub score: Option<f64>,
    pub document: ChunkDocument,
    #[serde(default)]
    pub text: String,
}

impl Chunk {
    pub fn file_name(&self) -> Option<&str> {
        self.metadata().and_then(|m| m.file_name.as_deref())
    }

    pub fn page_label(&self) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.page_label.as_deref())
            .filter(|p| !p.is_empty())
    }

    /// Excerpt shown to the user: the original sentence window when present, else the chunk text.
    pub fn excerpt(&self) -> &str {
        self.metadata()
            .and_then(|m| m.original_text.as_deref())
            .unwrap_or(&self.text)
    }

    fn metadata(&self) -> Option<&DocMetadata> {
        self.document.doc_metadata.as_ref()
    }
}

/// One ingested document (a file may be split into several).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedDoc {
    pub doc_id: String,
    #[serde(default)]
    pub doc_metadata: Option<DocMetadata>,
}

impl IngestedDoc {
    pub fn file_name(&self) -> Option<&str> {
        self.doc_metadata
            .as_ref()
            .and_then(|m| m.file_name.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// POST /v1/chat/completions body (without the `stream` flag).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub use_context: bool,
    pub include_sources: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_filter: Option<ContextFilter>,
}

/// POST /v1/completions body (without the `stream` flag).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub use_context: bool,
    pub include_sources: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_filter: Option<ContextFilter>,
}

/// POST /v1/chunks body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunksRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_filter: Option<ContextFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// One decoded item of a streamed generation.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Next text fragment, in arrival order.
    Delta(String),
    /// Sources retrieved for the response; later values replace earlier ones.
    Sources(Vec<Chunk>),
}
