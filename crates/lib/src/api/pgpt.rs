//! PrivateGPT HTTP client (http://localhost:8001 by default).
//! Generation endpoints are consumed as server-sent events (`data: {json}` frames, `data: [DONE]` last).

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::types::{
    ChatRequest, Chunk, ChunksRequest, CompletionRequest, HealthStatus, IngestedDoc, StreamEvent,
};
use super::{ApiError, Backend, EventReceiver};

const DEFAULT_BASE_URL: &str = "http://localhost:8001";

/// Fragments buffered between the SSE reader task and the session.
const STREAM_CHANNEL_CAPACITY: usize = 64;

const TRUNCATED_STREAM: &str = "stream ended before [DONE]";

/// Client for the PrivateGPT HTTP API.
#[derive(Clone)]
pub struct PgptClient {
    base_url: String,
    client: reqwest::Client,
}

impl PgptClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a generation body with `stream: true` and hand the SSE body to a reader task.
    async fn open_stream<T: Serialize + Sync>(
        &self,
        path: &str,
        request: &T,
    ) -> Result<EventReceiver, ApiError> {
        let url = self.url(path);
        let body = Streaming {
            request,
            stream: true,
        };
        let res = self.client.post(&url).json(&body).send().await?;
        let res = ensure_success(res).await?;
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(pump_events(res, tx));
        Ok(rx)
    }
}

#[async_trait]
impl Backend for PgptClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /health
    async fn health(&self) -> Result<HealthStatus, ApiError> {
        let res = self.client.get(self.url("/health")).send().await?;
        let res = ensure_success(res).await?;
        Ok(res.json().await?)
    }

    /// POST /v1/chunks
    async fn chunks_retrieval(&self, request: ChunksRequest) -> Result<Vec<Chunk>, ApiError> {
        let res = self
            .client
            .post(self.url("/v1/chunks"))
            .json(&request)
            .send()
            .await?;
        let res = ensure_success(res).await?;
        let data: ListResponse<Chunk> = res.json().await?;
        Ok(data.data)
    }

    /// POST /v1/chat/completions with stream: true.
    async fn chat_stream(&self, request: ChatRequest) -> Result<EventReceiver, ApiError> {
        self.open_stream("/v1/chat/completions", &request).await
    }

    /// POST /v1/completions with stream: true.
    async fn completion_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<EventReceiver, ApiError> {
        self.open_stream("/v1/completions", &request).await
    }

    /// GET /v1/ingest/list
    async fn list_ingested(&self) -> Result<Vec<IngestedDoc>, ApiError> {
        let res = self.client.get(self.url("/v1/ingest/list")).send().await?;
        let res = ensure_success(res).await?;
        let data: ListResponse<IngestedDoc> = res.json().await?;
        Ok(data.data)
    }

    /// POST /v1/ingest/file (multipart, field `file`).
    async fn ingest_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Vec<IngestedDoc>, ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let res = self
            .client
            .post(self.url("/v1/ingest/file"))
            .multipart(form)
            .send()
            .await?;
        let res = ensure_success(res).await?;
        let data: ListResponse<IngestedDoc> = res.json().await?;
        Ok(data.data)
    }

    /// DELETE /v1/ingest/{doc_id}
    async fn delete_ingested(&self, doc_id: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("/v1/ingest/{}", doc_id));
        let res = self.client.delete(&url).send().await?;
        ensure_success(res).await?;
        Ok(())
    }
}

async fn ensure_success(res: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(ApiError::Api(format!("{} {}", status, body)))
}

/// Read the SSE body and forward decoded events until `[DONE]` or the receiver is dropped.
/// A body that ends before `[DONE]` is reported as an error so the partial response is dropped.
async fn pump_events(res: reqwest::Response, tx: mpsc::Sender<Result<StreamEvent, ApiError>>) {
    let mut stream = res.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(Err(ApiError::Request(e))).await;
                return;
            }
        };
        buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));
        while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
            let frame_bytes: Vec<u8> = buffer.drain(..pos).collect();
            buffer.drain(..2);
            let frame = String::from_utf8_lossy(&frame_bytes);
            if !forward(parse_sse_frame(&frame), &tx).await {
                return;
            }
        }
    }
    if !buffer.is_empty() {
        let frame = String::from_utf8_lossy(&buffer);
        if !forward(parse_sse_frame(&frame), &tx).await {
            return;
        }
    }
    log::warn!("privategpt stream ended before [DONE]");
    let _ = tx.send(Err(ApiError::Api(TRUNCATED_STREAM.to_string()))).await;
}

/// Returns false once the stream is over (done marker or receiver gone).
async fn forward(frame: SseFrame, tx: &mpsc::Sender<Result<StreamEvent, ApiError>>) -> bool {
    match frame {
        SseFrame::Done => false,
        SseFrame::Events(events) => {
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    log::debug!("stream receiver dropped, aborting response");
                    return false;
                }
            }
            true
        }
    }
}

/// A decoded server-sent-events frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Events(Vec<StreamEvent>),
    /// `data: [DONE]`
    Done,
}

/// Decode one SSE frame (lines between blank-line separators). Undecodable data lines are skipped.
pub fn parse_sse_frame(frame: &str) -> SseFrame {
    let mut events = Vec::new();
    for line in frame.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            return SseFrame::Done;
        }
        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                log::debug!("skipping undecodable stream frame: {}", e);
                continue;
            }
        };
        let Some(choice) = chunk.choices.and_then(|c| c.into_iter().next()) else {
            continue;
        };
        if let Some(content) = choice.delta.and_then(|d| d.content) {
            if !content.is_empty() {
                events.push(StreamEvent::Delta(content));
            }
        }
        if let Some(sources) = choice.sources {
            events.push(StreamEvent::Sources(sources));
        }
    }
    SseFrame::Events(events)
}

#[derive(Serialize)]
struct Streaming<'a, T: Serialize> {
    #[serde(flatten)]
    request: &'a T,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    #[serde(default)]
    sources: Option<Vec<Chunk>>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
