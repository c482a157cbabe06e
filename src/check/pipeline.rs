//! The diagnostic pipeline: sentences in, positioned diagnostics out.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_lsp::lsp_types::{Diagnostic, Range, Url};

use super::{
    CacheError, CancelToken, Cancelled, CheckError, CheckResult, FingerprintCache, OpenAiOracle,
    Oracle, RateGate,
};
use crate::document::{segment, Sentence};
use crate::lsp::to_diagnostic;
use crate::settings::Settings;

/// Diagnostics for one analysis pass over one document.
#[derive(Debug)]
pub struct DiagnosticBatch {
    pub uri: Url,
    /// Diagnostics in source order.
    pub diagnostics: Vec<Diagnostic>,
    /// Failures contained during the pass.
    pub incidents: Vec<Incident>,
}

/// A failure the pipeline contained instead of aborting the pass.
#[derive(Debug)]
pub enum Incident {
    /// The cache could not be read; the sentence was checked as a miss.
    CacheRead { sentence: String, error: CacheError },
    /// A fresh verdict could not be written to the cache.
    CacheWrite { sentence: String, error: CacheError },
    /// The oracle failed; the sentence produced no diagnostic.
    CheckFailed {
        range: Range,
        sentence: String,
        error: CheckError,
    },
}

impl Incident {
    /// Whether the sentence was left unchecked.
    pub fn skipped_sentence(&self) -> bool {
        matches!(self, Incident::CheckFailed { .. })
    }
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incident::CacheRead { sentence, error } => {
                write!(f, "cache read failed for {sentence:?}: {error}")
            }
            Incident::CacheWrite { sentence, error } => {
                write!(f, "cache write failed for {sentence:?}: {error}")
            }
            Incident::CheckFailed {
                range,
                sentence,
                error,
            } => write!(
                f,
                "check skipped for {sentence:?} at {}:{}: {error}",
                range.start.line, range.start.character
            ),
        }
    }
}

/// Segments documents and checks every sentence.
///
/// Sentences are processed one at a time. Only cache misses reach the oracle,
/// and each of those first passes the rate gate.
pub struct Pipeline {
    cache: FingerprintCache,
    gate: RateGate,
    oracle: Arc<dyn Oracle>,
}

impl Pipeline {
    pub fn new(cache: FingerprintCache, gate: RateGate, oracle: Arc<dyn Oracle>) -> Self {
        Self {
            cache,
            gate,
            oracle,
        }
    }

    /// Build a pipeline backed by OpenAI and an on-disk cache.
    ///
    /// Relative cache paths resolve against `settings_dir`. If the cache file
    /// cannot be opened, an in-memory cache is used instead.
    pub fn from_settings(settings: &Settings, settings_dir: &Path) -> Result<Self> {
        let oracle = OpenAiOracle::new(
            settings.oracle.endpoint.clone(),
            settings.oracle.model.clone(),
            settings.oracle.resolved_api_key(),
            Duration::from_secs(settings.oracle.timeout_secs),
        )?;
        if !oracle.has_api_key() {
            tracing::warn!("no OpenAI API key configured; sentences will not be checked");
        }

        let cache_path = settings.cache.resolved_path(settings_dir);
        let cache = match FingerprintCache::open(&cache_path) {
            Ok(cache) => {
                tracing::info!(path = %cache_path.display(), "grammar cache opened");
                cache
            }
            Err(error) => {
                tracing::warn!(
                    path = %cache_path.display(),
                    error = %format!("{error:#}"),
                    "failed to open grammar cache; falling back to memory"
                );
                FingerprintCache::open_in_memory()?
            }
        };

        let gate = RateGate::new(
            settings.rate.burst,
            Duration::from_secs(settings.rate.refill_interval_secs),
        );

        Ok(Self::new(cache, gate, Arc::new(oracle)))
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    /// Analyze the full text of a document.
    ///
    /// Failed checks are skipped and reported as incidents. Cancellation
    /// discards everything collected so far.
    pub async fn analyze(
        &self,
        uri: &Url,
        text: &str,
        cancel: &CancelToken,
    ) -> Result<DiagnosticBatch, Cancelled> {
        let sentences = segment(text);
        let mut diagnostics = Vec::new();
        let mut incidents = Vec::new();

        for sentence in &sentences {
            let Some(result) = self.check_sentence(sentence, cancel, &mut incidents).await? else {
                continue;
            };
            if result.has_error {
                diagnostics.push(to_diagnostic(sentence, &result));
            }
        }

        tracing::debug!(
            %uri,
            sentences = sentences.len(),
            diagnostics = diagnostics.len(),
            incidents = incidents.len(),
            "analysis finished"
        );

        Ok(DiagnosticBatch {
            uri: uri.clone(),
            diagnostics,
            incidents,
        })
    }

    /// Resolve a verdict for one sentence: cache first, then the oracle.
    ///
    /// Returns `Ok(None)` when the sentence had to be skipped.
    async fn check_sentence(
        &self,
        sentence: &Sentence,
        cancel: &CancelToken,
        incidents: &mut Vec<Incident>,
    ) -> Result<Option<CheckResult>, Cancelled> {
        match self.cache.lookup(&sentence.text) {
            Ok(Some(result)) => return Ok(Some(result)),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(sentence = %sentence.text, %error, "grammar cache read failed");
                incidents.push(Incident::CacheRead {
                    sentence: sentence.text.clone(),
                    error,
                });
            }
        }

        self.gate.admit(cancel).await?;

        let result = match self.oracle.check(&sentence.text).await {
            Ok(result) => result.normalized(),
            Err(error) => {
                tracing::warn!(sentence = %sentence.text, %error, "grammar check failed");
                incidents.push(Incident::CheckFailed {
                    range: sentence.range,
                    sentence: sentence.text.clone(),
                    error,
                });
                return Ok(None);
            }
        };

        if let Err(error) = self.cache.store(&sentence.text, &result) {
            tracing::warn!(sentence = %sentence.text, %error, "grammar cache write failed");
            incidents.push(Incident::CacheWrite {
                sentence: sentence.text.clone(),
                error,
            });
        }

        Ok(Some(result))
    }
}
