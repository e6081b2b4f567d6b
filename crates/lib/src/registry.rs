//! Client registry: the one backend handle a process talks to.
//!
//! The address is user-supplied and may change at runtime, so the handle is swappable:
//! binding an address always builds a fresh handle and replaces the current one.
//! Holders of an earlier handle (e.g. a streaming session) keep using it.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::{Backend, PgptClient};
use crate::error::ClientError;

/// Shared connection to one PrivateGPT address.
pub type BackendHandle = Arc<dyn Backend>;

type Connector = Box<dyn Fn(&str) -> BackendHandle + Send + Sync>;

pub struct ClientRegistry {
    current: RwLock<Option<BackendHandle>>,
    connector: Connector,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    /// Registry that connects with [`PgptClient`].
    pub fn new() -> Self {
        Self::with_connector(|address| {
            Arc::new(PgptClient::new(Some(address.to_string()))) as BackendHandle
        })
    }

    /// Registry that builds handles with `connector` (used to plug in other backends).
    pub fn with_connector(
        connector: impl Fn(&str) -> BackendHandle + Send + Sync + 'static,
    ) -> Self {
        Self {
            current: RwLock::new(None),
            connector: Box::new(connector),
        }
    }

    /// Bind to `address` when given (always a new handle, even for the same address);
    /// otherwise return the current handle. Blank addresses count as absent.
    pub async fn resolve(&self, address: Option<&str>) -> Result<BackendHandle, ClientError> {
        match address.map(str::trim).filter(|a| !a.is_empty()) {
            Some(address) => {
                let handle = (self.connector)(address);
                *self.current.write().await = Some(handle.clone());
                log::info!("bound privategpt client to {}", handle.base_url());
                Ok(handle)
            }
            None => self
                .current
                .read()
                .await
                .clone()
                .ok_or(ClientError::UnconfiguredClient),
        }
    }

    /// Address of the current handle, if any.
    pub async fn address(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|h| h.base_url().to_string())
    }
}
