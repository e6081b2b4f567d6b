//! Errors surfaced to callers of the interaction core.
//!
//! Empty input and user cancellation are not errors: `send`/`start` return `None`
//! for the former, and a stopped session ends with [`crate::completion::Outcome::Cancelled`].

use crate::api::ApiError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No backend address has been bound yet; connect first.
    #[error("privategpt client not initialized with an address")]
    UnconfiguredClient,
    #[error("the privategpt instance at {0} is not healthy")]
    Unhealthy(String),
    /// Network or backend failure while a response was streaming.
    #[error("stream failed: {0}")]
    StreamFailure(#[source] ApiError),
    #[error(transparent)]
    Backend(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("session task ended abnormally: {0}")]
    Aborted(String),
}
