//! Grammar checking language server for prose and markdown.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService};

mod check;
mod document;
mod lsp;
pub mod rpc;
pub(crate) mod settings;

pub use check::{
    fingerprint, CacheError, CancelToken, Canceller, Cancelled, CheckError, CheckResult,
    DiagnosticBatch, FingerprintCache, Incident, OpenAiOracle, Oracle, Pipeline, RateGate,
};
pub use document::{segment, DocumentState, DocumentStore, SegmentState, Segmenter, Sentence};
pub use lsp::{format_diagnostic, to_diagnostic};
pub use settings::{discover_settings, find_settings_file, load_settings, Settings};

pub struct Backend {
    client: Client,
    documents: DocumentStore,
    /// The pipeline, or why it could not be built.
    pipeline: OnceLock<std::result::Result<Arc<Pipeline>, String>>,
    /// Held for the duration of an analysis pass; passes run one at a time.
    worker: Mutex<()>,
}

impl Backend {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            documents: DocumentStore::new(),
            pipeline: OnceLock::new(),
            worker: Mutex::new(()),
        }
    }

    pub(crate) fn with_pipeline(client: Client, pipeline: Arc<Pipeline>) -> Self {
        let backend = Self::new(client);
        let _ = backend.pipeline.set(Ok(pipeline));
        backend
    }

    /// Store the new text and publish diagnostics for it.
    async fn on_document_change(&self, uri: Url, text: String, version: i32) {
        let (state, cancel) = self.documents.open(uri.clone(), text, version);
        self.analyze_and_publish(&uri, &state, cancel).await;
    }

    /// Run the pipeline over a document snapshot and publish the result.
    ///
    /// A pass cancelled by a newer update publishes nothing.
    async fn analyze_and_publish(&self, uri: &Url, state: &DocumentState, cancel: CancelToken) {
        let pipeline = match self.pipeline.get() {
            Some(Ok(pipeline)) => pipeline,
            Some(Err(_)) => {
                tracing::warn!(%uri, "grammar pipeline unavailable; skipping analysis");
                return;
            }
            None => {
                tracing::warn!(%uri, "document received before initialize; skipping analysis");
                return;
            }
        };

        let _worker = self.worker.lock().await;
        let batch = match pipeline.analyze(uri, &state.text, &cancel).await {
            // A pass served entirely from cache never waits at the gate, so
            // it can finish after being superseded.
            Ok(batch) if !cancel.is_cancelled() => batch,
            _ => {
                tracing::debug!(%uri, version = state.version, "analysis superseded; discarding");
                return;
            }
        };

        let skipped = batch
            .incidents
            .iter()
            .filter(|incident| incident.skipped_sentence())
            .count();
        tracing::info!(
            %uri,
            version = state.version,
            diagnostics = batch.diagnostics.len(),
            skipped,
            "publishing diagnostics"
        );
        self.client
            .publish_diagnostics(batch.uri, batch.diagnostics, Some(state.version))
            .await;
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        if self.pipeline.get().is_none() {
            // Extract workspace root from params
            let workspace_root = params
                .workspace_folders
                .as_ref()
                .and_then(|folders| folders.first())
                .and_then(|f| f.uri.to_file_path().ok())
                .or_else(|| {
                    #[allow(deprecated)]
                    params.root_uri.as_ref()?.to_file_path().ok()
                })
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_else(|| PathBuf::from("."));

            let (settings, settings_dir) = settings::discover_settings(&workspace_root);
            let pipeline = Pipeline::from_settings(&settings, &settings_dir)
                .map(Arc::new)
                .map_err(|error| {
                    let reason = format!("{error:#}");
                    tracing::error!(error = %reason, "failed to start grammar pipeline");
                    reason
                });
            let _ = self.pipeline.set(pipeline);
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::FULL),
                        save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                        ..Default::default()
                    },
                )),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "jalsa".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            ..Default::default()
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "jalsa grammar server initialized")
            .await;

        if let Some(Err(reason)) = self.pipeline.get() {
            self.client
                .show_message(
                    MessageType::ERROR,
                    format!("jalsa: grammar checking is disabled: {reason}"),
                )
                .await;
        }
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        self.on_document_change(
            params.text_document.uri,
            params.text_document.text,
            params.text_document.version,
        )
        .await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        // We use FULL sync, so the last change carries the full text
        if let Some(change) = params.content_changes.into_iter().last() {
            self.on_document_change(
                params.text_document.uri,
                change.text,
                params.text_document.version,
            )
            .await;
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        match self.documents.reanalyze(&uri) {
            Some((state, cancel)) => self.analyze_and_publish(&uri, &state, cancel).await,
            None => tracing::debug!(%uri, "save for a document that is not open"),
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        self.documents.close(&params.text_document.uri);
        // Clear diagnostics
        self.client
            .publish_diagnostics(params.text_document.uri, vec![], None)
            .await;
    }
}

/// Create a service that builds its pipeline from settings on initialize.
pub fn create_service() -> (LspService<Backend>, tower_lsp::ClientSocket) {
    LspService::new(Backend::new)
}

/// Create a service around an already-built pipeline.
pub fn create_service_with_pipeline(
    pipeline: Arc<Pipeline>,
) -> (LspService<Backend>, tower_lsp::ClientSocket) {
    LspService::new(move |client| Backend::with_pipeline(client, pipeline))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use tower_lsp::Server;

    use super::*;
    use crate::rpc::{FrameReader, FrameWriter};

    #[test]
    fn service_can_be_created() {
        let (_service, _socket) = create_service();
    }

    #[tokio::test]
    async fn startup_failure_is_shown_to_client() {
        let (service, socket) = LspService::new(|client| {
            let backend = Backend::new(client);
            let _ = backend.pipeline.set(Err("cache unavailable".to_string()));
            backend
        });

        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_end);
        let (client_read, client_write) = tokio::io::split(client_end);
        let server = tokio::spawn(Server::new(server_read, server_write, socket).serve(service));

        let mut writer = FrameWriter::new(client_write);
        let mut reader = FrameReader::new(client_read);
        writer
            .write_frame(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": { "processId": null, "capabilities": {} }
            }))
            .await
            .unwrap();
        // tower-lsp stalls on messages pipelined before the initialize
        // response, so wait for it before sending `initialized`.
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), reader.read_frame())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if frame["id"] == 1 {
                break;
            }
        }
        writer
            .write_frame(&json!({ "jsonrpc": "2.0", "method": "initialized", "params": {} }))
            .await
            .unwrap();

        let shown: Value = loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), reader.read_frame())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if frame["method"] == "window/showMessage" {
                break frame["params"].clone();
            }
        };
        assert_eq!(shown["type"], 1);
        assert_eq!(
            shown["message"],
            "jalsa: grammar checking is disabled: cache unavailable"
        );

        server.abort();
    }
}
