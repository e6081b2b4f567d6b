//! Conversation surfaces (chat and prompt): settings, send/stop/clear, and the wiring of
//! mode policy, context scope, completion session, and conversation log.
//!
//! The chat surface keeps a persisted multi-turn log and sends history with each request.
//! The prompt surface keeps only the current exchange in memory and starts over on each send.

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::completion::{CompletionInput, CompletionSession, Endpoint, Outcome, SessionTicket};
use crate::conversation::{ConversationStore, Message};
use crate::error::ClientError;
use crate::events::{self, EventSender, SurfaceEvent};
use crate::files::FileCatalog;
use crate::mode::Mode;
use crate::registry::ClientRegistry;
use crate::scope::{build_scope, context_filter, IngestedFile, Selection};
use crate::storage::{self, keys, KvStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Chat,
    Prompt,
}

impl SurfaceKind {
    fn mode_key(self) -> &'static str {
        match self {
            SurfaceKind::Chat => keys::CHAT_MODE,
            SurfaceKind::Prompt => keys::PROMPT_MODE,
        }
    }

    fn endpoint(self) -> Endpoint {
        match self {
            SurfaceKind::Chat => Endpoint::Chat,
            SurfaceKind::Prompt => Endpoint::Completion,
        }
    }
}

/// User-chosen request settings, persisted per key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub mode: Mode,
    pub system_prompt: String,
    pub selection: Selection,
}

/// What a non-empty send started.
pub enum Sent {
    /// A generation is streaming; await the ticket for its outcome.
    Streaming(SessionTicket),
    /// Search-only mode: the rendered results, already appended.
    Searched(Message),
    /// Search-only mode: stopped or cleared before the results arrived; nothing was appended.
    Cancelled,
}

pub struct Surface {
    kind: SurfaceKind,
    registry: Arc<ClientRegistry>,
    kv: Arc<dyn KvStore>,
    store: Arc<ConversationStore>,
    session: CompletionSession,
    settings: RwLock<Settings>,
    events: EventSender,
}

impl Surface {
    /// Open a surface, restoring its settings (and, for chat, its log) from `kv`.
    pub async fn open(
        kind: SurfaceKind,
        registry: Arc<ClientRegistry>,
        kv: Arc<dyn KvStore>,
    ) -> Result<Self, StorageError> {
        let events = events::channel();
        let store = match kind {
            SurfaceKind::Chat => {
                ConversationStore::load(kv.clone(), keys::MESSAGES, events.clone()).await?
            }
            SurfaceKind::Prompt => ConversationStore::transient(events.clone()),
        };
        let store = Arc::new(store);
        let settings = Settings {
            mode: storage::load(kv.as_ref(), kind.mode_key())
                .await?
                .unwrap_or_default(),
            system_prompt: storage::load(kv.as_ref(), keys::SYSTEM_PROMPT)
                .await?
                .unwrap_or_default(),
            selection: storage::load(kv.as_ref(), keys::SELECTED_FILES)
                .await?
                .unwrap_or_default(),
        };
        log::debug!("{:?} surface opened in {} mode", kind, settings.mode);
        Ok(Self {
            kind,
            registry,
            kv,
            session: CompletionSession::new(store.clone(), events.clone()),
            store,
            settings: RwLock::new(settings),
            events,
        })
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }

    pub fn conversation(&self) -> &ConversationStore {
        &self.store
    }

    pub fn session(&self) -> &CompletionSession {
        &self.session
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<(), StorageError> {
        self.settings.write().await.mode = mode;
        storage::save(self.kv.as_ref(), self.kind.mode_key(), &mode).await
    }

    pub async fn set_system_prompt(&self, text: &str) -> Result<(), StorageError> {
        self.settings.write().await.system_prompt = text.to_string();
        storage::save(self.kv.as_ref(), keys::SYSTEM_PROMPT, text).await
    }

    /// Select or unselect a file for scoping. Returns whether it is now selected.
    pub async fn toggle_file(&self, file_name: &str) -> Result<bool, StorageError> {
        let mut settings = self.settings.write().await;
        let selected = settings.selection.toggle(file_name);
        storage::save(self.kv.as_ref(), keys::SELECTED_FILES, &settings.selection).await?;
        Ok(selected)
    }

    /// Drop selected names the catalog no longer lists.
    pub async fn prune_selection(&self, catalog: &[IngestedFile]) -> Result<(), StorageError> {
        let mut settings = self.settings.write().await;
        let stale = settings.selection.prune(catalog);
        if stale.is_empty() {
            return Ok(());
        }
        log::info!("unselecting files no longer ingested: {}", stale.join(", "));
        storage::save(self.kv.as_ref(), keys::SELECTED_FILES, &settings.selection).await
    }

    /// Delete a file from the backend and from the selection.
    pub async fn delete_file(
        &self,
        files: &FileCatalog,
        file_name: &str,
    ) -> Result<Vec<IngestedFile>, ClientError> {
        let remaining = files.delete_file(file_name).await?;
        {
            let mut settings = self.settings.write().await;
            settings.selection.remove(file_name);
            settings.selection.prune(&remaining);
            storage::save(self.kv.as_ref(), keys::SELECTED_FILES, &settings.selection).await?;
        }
        Ok(remaining)
    }

    /// Send user input under the current settings. Blank input returns `None` and changes nothing.
    pub async fn send(
        &self,
        text: &str,
        catalog: &[IngestedFile],
    ) -> Result<Option<Sent>, ClientError> {
        let content = text.trim();
        if content.is_empty() {
            return Ok(None);
        }
        let backend = self.registry.resolve(None).await?;
        let settings = self.settings().await;
        let policy = settings.mode.policy();
        let scope = build_scope(settings.selection.names(), catalog);
        let filter = context_filter(settings.mode, scope);

        self.session.stop().await;
        let history = match self.kind {
            SurfaceKind::Chat => self.store.history().await,
            SurfaceKind::Prompt => {
                self.store.clear().await?;
                Vec::new()
            }
        };
        self.store.append(Message::user(content)).await?;

        if policy.skip_generation {
            return match self.session.search(backend, content, filter).await {
                Outcome::Finished(message) => Ok(Some(Sent::Searched(message))),
                Outcome::Cancelled => Ok(Some(Sent::Cancelled)),
                Outcome::Failed(e) => Err(e),
            };
        }

        let system_prompt = Some(settings.system_prompt).filter(|s| !s.trim().is_empty());
        let input = CompletionInput {
            text: content.to_string(),
            endpoint: self.kind.endpoint(),
            use_context: policy.use_context,
            include_sources: policy.include_sources,
            system_prompt,
            context_filter: filter,
            history,
        };
        Ok(self.session.start(backend, input).await.map(Sent::Streaming))
    }

    /// Stop the streaming response, if any.
    pub async fn stop(&self) -> bool {
        self.session.stop().await
    }

    /// Drop the in-flight response and reset the log.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.session.stop().await;
        self.store.clear().await
    }
}
