//! Ingested file catalog: list, upload, and delete files on the current backend.
//!
//! The fetching/uploading flags are advisory (for display); correctness never depends on them.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::ClientError;
use crate::registry::ClientRegistry;
use crate::scope::{group_documents, IngestedFile};

pub struct FileCatalog {
    registry: Arc<ClientRegistry>,
    files: RwLock<Vec<IngestedFile>>,
    fetching: AtomicBool,
    uploading: AtomicBool,
}

/// Resets an advisory flag when dropped.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Relaxed);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl FileCatalog {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self {
            registry,
            files: RwLock::new(Vec::new()),
            fetching: AtomicBool::new(false),
            uploading: AtomicBool::new(false),
        }
    }

    /// Last fetched listing.
    pub async fn files(&self) -> Vec<IngestedFile> {
        self.files.read().await.clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching.load(Ordering::Relaxed)
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::Relaxed)
    }

    /// Fetch the ingested documents and group them by file name.
    pub async fn refresh(&self) -> Result<Vec<IngestedFile>, ClientError> {
        let backend = self.registry.resolve(None).await?;
        let _fetching = FlagGuard::raise(&self.fetching);
        let docs = backend.list_ingested().await?;
        let files = group_documents(&docs);
        log::debug!("{} documents in {} files", docs.len(), files.len());
        *self.files.write().await = files.clone();
        Ok(files)
    }

    /// Read a local file, ingest it, and refresh the listing.
    pub async fn add_file(&self, path: &Path) -> Result<Vec<IngestedFile>, ClientError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ClientError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.add_bytes(&file_name, bytes).await
    }

    pub async fn add_bytes(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Vec<IngestedFile>, ClientError> {
        let backend = self.registry.resolve(None).await?;
        {
            let _uploading = FlagGuard::raise(&self.uploading);
            let docs = backend.ingest_file(file_name, bytes).await?;
            log::info!("ingested {} as {} documents", file_name, docs.len());
        }
        self.refresh().await
    }

    /// Delete every document ingested for `file_name` and refresh the listing.
    pub async fn delete_file(&self, file_name: &str) -> Result<Vec<IngestedFile>, ClientError> {
        let backend = self.registry.resolve(None).await?;
        let doc_ids: Vec<String> = self
            .files
            .read()
            .await
            .iter()
            .filter(|f| f.file_name == file_name)
            .flat_map(|f| f.doc_ids.iter().cloned())
            .collect();
        if doc_ids.is_empty() {
            log::debug!("delete: {} is not in the catalog", file_name);
        }
        for doc_id in &doc_ids {
            backend.delete_ingested(doc_id).await?;
        }
        log::info!("deleted {} ({} documents)", file_name, doc_ids.len());
        self.refresh().await
    }
}
