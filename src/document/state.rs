//! Document state management for the grammar LSP.

use std::sync::Arc;

use dashmap::DashMap;
use tower_lsp::lsp_types::Url;

use crate::check::{CancelToken, Canceller};

/// Snapshot of a single open document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentState {
    /// Full text as last sent by the client.
    pub text: String,
    /// Document version from the client.
    pub version: i32,
}

#[derive(Debug)]
struct Entry {
    state: Arc<DocumentState>,
    /// Cancels the analysis pass currently running against this document.
    canceller: Canceller,
}

/// Thread-safe storage for open documents.
///
/// Updates replace the stored text wholesale. Every update also cancels the
/// analysis pass started for the previous text of the same URI.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: DashMap<Url, Entry>,
}

impl DocumentStore {
    /// Create a new empty document store.
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
        }
    }

    /// Open or update a document.
    ///
    /// Returns the stored snapshot and a token for the analysis pass that
    /// should run against it.
    pub fn open(&self, uri: Url, text: String, version: i32) -> (Arc<DocumentState>, CancelToken) {
        let state = Arc::new(DocumentState { text, version });
        let (canceller, token) = CancelToken::pair();
        let entry = Entry {
            state: Arc::clone(&state),
            canceller,
        };
        if let Some(previous) = self.documents.insert(uri, entry) {
            previous.canceller.cancel();
        }
        (state, token)
    }

    /// Start a fresh analysis pass over the stored text of `uri`.
    ///
    /// Returns `None` if the document is not open.
    pub fn reanalyze(&self, uri: &Url) -> Option<(Arc<DocumentState>, CancelToken)> {
        let mut entry = self.documents.get_mut(uri)?;
        let (canceller, token) = CancelToken::pair();
        let previous = std::mem::replace(&mut entry.canceller, canceller);
        previous.cancel();
        Some((Arc::clone(&entry.state), token))
    }

    /// Close a document, cancelling any analysis still running against it.
    pub fn close(&self, uri: &Url) {
        if let Some((_, entry)) = self.documents.remove(uri) {
            entry.canceller.cancel();
        }
    }

    /// Get a document's state.
    pub fn get(&self, uri: &Url) -> Option<Arc<DocumentState>> {
        self.documents.get(uri).map(|entry| Arc::clone(&entry.state))
    }

    /// Number of open documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
