//! Context scope: which ingested documents a request may draw on.
//!
//! Users select files by name; one name can stand for several document ids because
//! ingestion splits files. The scope is the flattened list of those ids.

use serde::{Deserialize, Serialize};

use crate::api::{ContextFilter, IngestedDoc};
use crate::mode::Mode;

/// A file as the user sees it, with every document id ingestion produced for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedFile {
    pub file_name: String,
    pub doc_ids: Vec<String>,
}

/// Group ingested documents by file name, in first-seen order.
/// Documents without a file name are listed under their own id.
pub fn group_documents(docs: &[IngestedDoc]) -> Vec<IngestedFile> {
    let mut files: Vec<IngestedFile> = Vec::new();
    for doc in docs {
        let name = doc.file_name().unwrap_or(&doc.doc_id);
        match files.iter_mut().find(|f| f.file_name == name) {
            Some(f) => f.doc_ids.push(doc.doc_id.clone()),
            None => files.push(IngestedFile {
                file_name: name.to_string(),
                doc_ids: vec![doc.doc_id.clone()],
            }),
        }
    }
    files
}

/// File names chosen by the user, in selection order, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection(Vec<String>);

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.0.iter().any(|n| n == file_name)
    }

    /// Select the name if absent, unselect it otherwise. Returns whether it is now selected.
    pub fn toggle(&mut self, file_name: &str) -> bool {
        if self.remove(file_name) {
            false
        } else {
            self.0.push(file_name.to_string());
            true
        }
    }

    pub fn remove(&mut self, file_name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|n| n != file_name);
        self.0.len() != before
    }

    /// Drop names the catalog no longer lists. Returns the pruned names.
    pub fn prune(&mut self, catalog: &[IngestedFile]) -> Vec<String> {
        let (kept, stale): (Vec<String>, Vec<String>) = std::mem::take(&mut self.0)
            .into_iter()
            .partition(|n| catalog.iter().any(|f| &f.file_name == n));
        self.0 = kept;
        stale
    }
}

impl<S: Into<String>> FromIterator<S> for Selection {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut selection = Selection::new();
        for name in iter {
            let name = name.into();
            if !selection.contains(&name) {
                selection.0.push(name);
            }
        }
        selection
    }
}

/// Project selected file names onto document ids, in selection order.
/// Names missing from the catalog contribute nothing.
pub fn build_scope(selection: &[String], catalog: &[IngestedFile]) -> Vec<String> {
    selection
        .iter()
        .flat_map(|name| {
            catalog
                .iter()
                .filter(move |f| &f.file_name == name)
                .flat_map(|f| f.doc_ids.iter().cloned())
        })
        .collect()
}

/// Context filter sent with a request. An empty scope means "no restriction" and sends no
/// filter at all; modes that do not look at files never send one.
pub fn context_filter(mode: Mode, scope: Vec<String>) -> Option<ContextFilter> {
    if !mode.scopes_to_selection() || scope.is_empty() {
        return None;
    }
    Some(ContextFilter { docs_ids: scope })
}
