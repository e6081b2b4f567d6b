//! In-memory backend for unit tests: every opened stream is handed to the test,
//! which feeds fragments and ends it by dropping the sender.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};

use crate::api::{
    ApiError, Backend, ChatRequest, Chunk, ChunkDocument, ChunksRequest, CompletionRequest,
    DocMetadata, EventReceiver, HealthStatus, IngestedDoc, StreamEvent,
};
use crate::events::SurfaceEvent;
use crate::registry::BackendHandle;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub(crate) enum OpenedRequest {
    Chat(ChatRequest),
    Completion(CompletionRequest),
}

pub(crate) struct OpenedStream {
    pub request: OpenedRequest,
    pub tx: mpsc::Sender<Result<StreamEvent, ApiError>>,
}

impl OpenedStream {
    pub async fn delta(&self, text: &str) {
        let _ = self.tx.send(Ok(StreamEvent::Delta(text.to_string()))).await;
    }

    pub async fn sources(&self, chunks: Vec<Chunk>) {
        let _ = self.tx.send(Ok(StreamEvent::Sources(chunks))).await;
    }

    pub async fn fail(&self, message: &str) {
        let _ = self.tx.send(Err(ApiError::Api(message.to_string()))).await;
    }
}

pub(crate) struct ScriptedBackend {
    base_url: String,
    opened_tx: mpsc::UnboundedSender<OpenedStream>,
    opened_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<OpenedStream>>,
    pub chunks: Mutex<Vec<Chunk>>,
    pub chunk_requests: Mutex<Vec<ChunksRequest>>,
    pub docs: Mutex<Vec<IngestedDoc>>,
    pub deleted: Mutex<Vec<String>>,
    pub health: Mutex<String>,
    chunk_gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedBackend {
    pub fn new(base_url: &str) -> Arc<Self> {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            base_url: base_url.to_string(),
            opened_tx,
            opened_rx: tokio::sync::Mutex::new(opened_rx),
            chunks: Mutex::new(Vec::new()),
            chunk_requests: Mutex::new(Vec::new()),
            docs: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            health: Mutex::new("ok".to_string()),
            chunk_gate: Mutex::new(None),
        })
    }

    pub fn handle(base_url: &str) -> BackendHandle {
        Self::new(base_url)
    }

    /// Wait for the next generation request to be opened.
    pub async fn next_stream(&self) -> OpenedStream {
        let mut rx = self.opened_rx.lock().await;
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("no stream opened in time")
            .expect("opened channel closed")
    }

    pub fn try_next_stream(&self) -> Option<OpenedStream> {
        self.opened_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Make chunk retrieval wait until [`Self::release_chunks`].
    pub fn hold_chunks(&self) {
        *self.chunk_gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub fn release_chunks(&self) {
        if let Some(gate) = self.chunk_gate.lock().unwrap().clone() {
            gate.notify_one();
        }
    }

    /// Wait until a chunk retrieval has been requested.
    pub async fn wait_for_chunk_request(&self) {
        tokio::time::timeout(WAIT, async {
            while self.chunk_requests.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no chunk request in time")
    }

    fn open(&self, request: OpenedRequest) -> EventReceiver {
        let (tx, rx) = mpsc::channel(16);
        let _ = self.opened_tx.send(OpenedStream { request, tx });
        rx
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        Ok(HealthStatus {
            status: self.health.lock().unwrap().clone(),
        })
    }

    async fn chunks_retrieval(&self, request: ChunksRequest) -> Result<Vec<Chunk>, ApiError> {
        self.chunk_requests.lock().unwrap().push(request);
        let gate = self.chunk_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.chunks.lock().unwrap().clone())
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<EventReceiver, ApiError> {
        Ok(self.open(OpenedRequest::Chat(request)))
    }

    async fn completion_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<EventReceiver, ApiError> {
        Ok(self.open(OpenedRequest::Completion(request)))
    }

    async fn list_ingested(&self) -> Result<Vec<IngestedDoc>, ApiError> {
        Ok(self.docs.lock().unwrap().clone())
    }

    async fn ingest_file(
        &self,
        file_name: &str,
        _bytes: Vec<u8>,
    ) -> Result<Vec<IngestedDoc>, ApiError> {
        let mut docs = self.docs.lock().unwrap();
        let doc = ingested(&format!("{}-{}", file_name, docs.len()), file_name);
        docs.push(doc.clone());
        Ok(vec![doc])
    }

    async fn delete_ingested(&self, doc_id: &str) -> Result<(), ApiError> {
        self.docs.lock().unwrap().retain(|d| d.doc_id != doc_id);
        self.deleted.lock().unwrap().push(doc_id.to_string());
        Ok(())
    }
}

pub(crate) fn chunk(doc_id: &str, file_name: &str, page_label: Option<&str>, text: &str) -> Chunk {
    Chunk {
        score: None,
        document: ChunkDocument {
            doc_id: doc_id.to_string(),
            doc_metadata: Some(DocMetadata {
                file_name: Some(file_name.to_string()),
                page_label: page_label.map(str::to_string),
                original_text: Some(text.to_string()),
            }),
        },
        text: text.to_string(),
    }
}

pub(crate) fn ingested(doc_id: &str, file_name: &str) -> IngestedDoc {
    IngestedDoc {
        doc_id: doc_id.to_string(),
        doc_metadata: Some(DocMetadata {
            file_name: Some(file_name.to_string()),
            ..Default::default()
        }),
    }
}

/// Wait until the running buffer reads `expected`.
pub(crate) async fn wait_for_buffer(rx: &mut broadcast::Receiver<SurfaceEvent>, expected: &str) {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(SurfaceEvent::BufferUpdated(text)) if text == expected => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("buffer never reached expected text")
}
