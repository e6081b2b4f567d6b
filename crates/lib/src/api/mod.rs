//! PrivateGPT backend API: wire types, the `Backend` trait the core talks to, and the HTTP client.
//!
//! Generation endpoints stream; they hand back a channel of [`StreamEvent`]s fed by a
//! background task. Dropping the receiver aborts the underlying request.

mod pgpt;
mod types;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use pgpt::{parse_sse_frame, PgptClient, SseFrame};
pub use types::{
    ChatMessage, ChatRequest, Chunk, ChunkDocument, ChunksRequest, CompletionRequest,
    ContextFilter, DocMetadata, HealthStatus, IngestedDoc, StreamEvent,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("privategpt request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("privategpt api error: {0}")]
    Api(String),
}

/// Receiving side of a streamed generation. Closed channel = end of stream.
pub type EventReceiver = mpsc::Receiver<Result<StreamEvent, ApiError>>;

/// Operations the playground needs from a PrivateGPT instance.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Base address this handle is bound to.
    fn base_url(&self) -> &str;

    async fn health(&self) -> Result<HealthStatus, ApiError>;

    /// Retrieve the most related chunks for `text`, ranked best first.
    async fn chunks_retrieval(&self, request: ChunksRequest) -> Result<Vec<Chunk>, ApiError>;

    /// Streamed chat completion over a message list.
    async fn chat_stream(&self, request: ChatRequest) -> Result<EventReceiver, ApiError>;

    /// Streamed single-prompt completion.
    async fn completion_stream(&self, request: CompletionRequest)
        -> Result<EventReceiver, ApiError>;

    async fn list_ingested(&self) -> Result<Vec<IngestedDoc>, ApiError>;

    /// Upload and ingest one file; returns the documents it was split into.
    async fn ingest_file(&self, file_name: &str, bytes: Vec<u8>)
        -> Result<Vec<IngestedDoc>, ApiError>;

    async fn delete_ingested(&self, doc_id: &str) -> Result<(), ApiError>;
}
