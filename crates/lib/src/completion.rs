//! Completion session: drives one streamed generation per surface and reconciles its outcome.
//!
//! `Idle -> Streaming -> {Finished | Cancelled | Failed} -> Idle`. Only the current session may
//! touch the buffer or commit a message; every state check happens under the session lock, so
//! once `stop` (or a newer `start`) returns, nothing from the old stream is applied.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ChatMessage, ChatRequest, Chunk, CompletionRequest, ContextFilter, StreamEvent};
use crate::conversation::{ConversationStore, Message, Source};
use crate::error::ClientError;
use crate::events::{self, EventSender, SurfaceEvent};
use crate::registry::BackendHandle;
use crate::search;

/// Which generation endpoint a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Message list with history (chat surface).
    Chat,
    /// Single prompt (prompt surface).
    Completion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Finished,
    Cancelled,
    Failed,
}

/// Everything needed to issue one generation request.
#[derive(Debug, Clone)]
pub struct CompletionInput {
    pub text: String,
    pub endpoint: Endpoint,
    pub use_context: bool,
    pub include_sources: bool,
    pub system_prompt: Option<String>,
    /// Document scope; `None` leaves retrieval unrestricted.
    pub context_filter: Option<ContextFilter>,
    /// Earlier turns, oldest first, not including `text`.
    pub history: Vec<ChatMessage>,
}

impl CompletionInput {
    fn system_prompt(&self) -> Option<&str> {
        self.system_prompt
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }

    fn chat_request(&self) -> ChatRequest {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if let Some(system) = self.system_prompt() {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(self.text.trim()));
        ChatRequest {
            messages,
            use_context: self.use_context,
            include_sources: self.include_sources,
            context_filter: self.context_filter.clone(),
        }
    }

    fn completion_request(&self) -> CompletionRequest {
        CompletionRequest {
            prompt: self.text.trim().to_string(),
            system_prompt: self.system_prompt().map(str::to_string),
            use_context: self.use_context,
            include_sources: self.include_sources,
            context_filter: self.context_filter.clone(),
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum Outcome {
    /// The committed assistant message.
    Finished(Message),
    /// Stopped by the user or superseded; nothing was committed.
    Cancelled,
    /// The request failed; partial output was discarded.
    Failed(ClientError),
}

/// Handle on a started session.
pub struct SessionTicket {
    id: u64,
    task: JoinHandle<Outcome>,
}

impl SessionTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the session to end.
    pub async fn outcome(self) -> Outcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(ClientError::Aborted(e.to_string())),
        }
    }
}

struct Active {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    active: Option<Active>,
    buffer: Option<String>,
}

impl Inner {
    fn is_current(&self, id: u64) -> bool {
        self.active.as_ref().is_some_and(|a| a.id == id)
    }
}

struct Shared {
    inner: Mutex<Inner>,
    store: Arc<ConversationStore>,
    events: EventSender,
}

pub struct CompletionSession {
    shared: Arc<Shared>,
}

impl CompletionSession {
    /// Session that commits finished responses to `store`.
    pub fn new(store: Arc<ConversationStore>, events: EventSender) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                store,
                events,
            }),
        }
    }

    /// Start streaming a response from `backend`, cancelling any session still running.
    /// Blank input sends nothing and returns `None`.
    pub async fn start(
        &self,
        backend: BackendHandle,
        input: CompletionInput,
    ) -> Option<SessionTicket> {
        if input.text.trim().is_empty() {
            log::debug!("nothing to send");
            return None;
        }
        let (id, cancel) = self.begin().await;
        log::debug!("session {}: streaming from {}", id, backend.base_url());
        let shared = self.shared.clone();
        let task = tokio::spawn(async move { shared.run(id, cancel, backend, input).await });
        Some(SessionTicket { id, task })
    }

    /// Run a search-only request as the current session and commit its rendered results.
    /// A `stop`, `clear` or newer request issued meanwhile discards the results.
    pub async fn search(
        &self,
        backend: BackendHandle,
        text: &str,
        filter: Option<ContextFilter>,
    ) -> Outcome {
        let (id, cancel) = self.begin().await;
        log::debug!("session {}: searching {}", id, backend.base_url());
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Cancelled,
            result = search::search(backend.as_ref(), text, filter) => result,
        };
        match result {
            Ok(message) => self.shared.commit(id, message).await,
            Err(e) => self.shared.fail(id, ClientError::Backend(e)).await,
        }
    }

    /// Make a fresh session current, superseding the running one.
    async fn begin(&self) -> (u64, CancellationToken) {
        let mut inner = self.shared.inner.lock().await;
        if let Some(previous) = inner.active.take() {
            log::info!("session {}: superseded by a new request", previous.id);
            previous.cancel.cancel();
            self.shared
                .emit(SurfaceEvent::StateChanged(SessionState::Cancelled));
            self.shared.emit(SurfaceEvent::StateChanged(SessionState::Idle));
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let cancel = CancellationToken::new();
        inner.active = Some(Active {
            id,
            cancel: cancel.clone(),
        });
        inner.buffer = Some(String::new());
        self.shared
            .emit(SurfaceEvent::StateChanged(SessionState::Streaming));
        (id, cancel)
    }

    /// Cancel the running session, if any. Returns whether one was running.
    pub async fn stop(&self) -> bool {
        let mut inner = self.shared.inner.lock().await;
        let Some(active) = inner.active.take() else {
            return false;
        };
        active.cancel.cancel();
        inner.buffer = None;
        log::info!("session {}: stopped", active.id);
        self.shared
            .emit(SurfaceEvent::StateChanged(SessionState::Cancelled));
        self.shared.emit(SurfaceEvent::StateChanged(SessionState::Idle));
        true
    }

    pub async fn state(&self) -> SessionState {
        if self.shared.inner.lock().await.active.is_some() {
            SessionState::Streaming
        } else {
            SessionState::Idle
        }
    }

    /// Text streamed so far by the running session.
    pub async fn buffer(&self) -> Option<String> {
        self.shared.inner.lock().await.buffer.clone()
    }
}

impl Shared {
    fn emit(&self, event: SurfaceEvent) {
        events::emit(&self.events, event);
    }

    async fn run(
        &self,
        id: u64,
        cancel: CancellationToken,
        backend: BackendHandle,
        input: CompletionInput,
    ) -> Outcome {
        let opened = async {
            match input.endpoint {
                Endpoint::Chat => backend.chat_stream(input.chat_request()).await,
                Endpoint::Completion => {
                    backend
                        .completion_stream(input.completion_request())
                        .await
                }
            }
        };
        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Cancelled,
            opened = opened => match opened {
                Ok(rx) => rx,
                Err(e) => return self.fail(id, ClientError::StreamFailure(e)).await,
            },
        };

        let mut chunks: Vec<Chunk> = Vec::new();
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                event = rx.recv() => event,
            };
            match event {
                Some(Ok(StreamEvent::Delta(text))) => {
                    if !self.apply(id, &text).await {
                        return Outcome::Cancelled;
                    }
                }
                Some(Ok(StreamEvent::Sources(latest))) => chunks = latest,
                Some(Err(e)) => return self.fail(id, ClientError::StreamFailure(e)).await,
                None => return self.finish(id, input.include_sources, chunks).await,
            }
        }
    }

    /// Append a fragment to the buffer and publish the running total.
    async fn apply(&self, id: u64, text: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.is_current(id) {
            return false;
        }
        let Some(buffer) = inner.buffer.as_mut() else {
            return false;
        };
        buffer.push_str(text);
        let total = buffer.clone();
        self.emit(SurfaceEvent::BufferUpdated(total));
        true
    }

    async fn finish(&self, id: u64, include_sources: bool, chunks: Vec<Chunk>) -> Outcome {
        let text = {
            let inner = self.inner.lock().await;
            if !inner.is_current(id) {
                return Outcome::Cancelled;
            }
            inner.buffer.clone().unwrap_or_default()
        };
        let sources: Vec<Source> = if include_sources {
            chunks.into_iter().map(Source::from).collect()
        } else {
            Vec::new()
        };
        self.commit(id, Message::assistant(text).with_sources(sources))
            .await
    }

    /// Append `message` if session `id` is still current, and go idle.
    async fn commit(&self, id: u64, message: Message) -> Outcome {
        let mut inner = self.inner.lock().await;
        if !inner.is_current(id) {
            return Outcome::Cancelled;
        }
        inner.active = None;
        inner.buffer = None;
        // Committed under the session lock so a concurrent stop cannot interleave.
        if let Err(e) = self.store.append(message.clone()).await {
            log::warn!("session {}: response not persisted: {}", id, e);
        }
        log::debug!("session {}: finished ({} bytes)", id, message.content.len());
        self.emit(SurfaceEvent::StateChanged(SessionState::Finished));
        self.emit(SurfaceEvent::StateChanged(SessionState::Idle));
        Outcome::Finished(message)
    }

    async fn fail(&self, id: u64, error: ClientError) -> Outcome {
        let mut inner = self.inner.lock().await;
        if !inner.is_current(id) {
            return Outcome::Cancelled;
        }
        inner.active = None;
        inner.buffer = None;
        log::warn!("session {}: request failed: {}", id, error);
        self.emit(SurfaceEvent::Failed(error.to_string()));
        self.emit(SurfaceEvent::StateChanged(SessionState::Failed));
        self.emit(SurfaceEvent::StateChanged(SessionState::Idle));
        Outcome::Failed(error)
    }
}
