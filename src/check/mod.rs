//! Grammar checking.
//!
//! This module provides:
//! - `Oracle`, the seam to the external grammar checker, and `OpenAiOracle`
//! - `FingerprintCache` for content-addressed check results
//! - `RateGate` for throttling oracle calls, with cooperative cancellation
//! - `Pipeline`, which turns a document into a batch of diagnostics

mod cache;
mod gate;
mod openai;
mod pipeline;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::{fingerprint, CacheError, FingerprintCache};
pub use gate::{CancelToken, Canceller, Cancelled, RateGate};
pub use openai::{OpenAiOracle, DEFAULT_ENDPOINT, DEFAULT_MODEL};
pub use pipeline::{DiagnosticBatch, Incident, Pipeline};

/// Verdict for a single sentence.
///
/// Describes sentence content only. It carries no position, so one verdict
/// serves every occurrence of the same text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub has_error: bool,
    #[serde(default)]
    pub correction: String,
    #[serde(default)]
    pub explanation: String,
}

impl CheckResult {
    /// A verdict for a grammatically correct sentence.
    pub fn correct() -> Self {
        Self::default()
    }

    /// A verdict reporting an error.
    pub fn error(correction: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            has_error: true,
            correction: correction.into(),
            explanation: explanation.into(),
        }
    }

    /// Clear correction and explanation when no error was reported.
    pub fn normalized(self) -> Self {
        if self.has_error {
            self
        } else {
            Self::correct()
        }
    }
}

/// Failure to obtain a verdict from the oracle.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle response had no message content")]
    MissingContent,

    #[error("oracle response is not a valid check result: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// External grammar checker.
///
/// Implementations may be slow or fail; the pipeline contains both.
#[tower_lsp::async_trait]
pub trait Oracle: Send + Sync {
    async fn check(&self, sentence: &str) -> Result<CheckResult, CheckError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_keys() {
        let result = CheckResult::error("She went home.", "Past tense.");
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(
            json,
            r#"{"hasError":true,"correction":"She went home.","explanation":"Past tense."}"#
        );
    }

    #[test]
    fn missing_text_fields_default_to_empty() {
        let result: CheckResult = serde_json::from_str(r#"{"hasError":false}"#).unwrap();
        assert_eq!(result, CheckResult::correct());
    }

    #[test]
    fn normalized_clears_text_of_correct_verdict() {
        let result = CheckResult {
            has_error: false,
            correction: "noise".to_string(),
            explanation: "more noise".to_string(),
        };
        assert_eq!(result.normalized(), CheckResult::correct());

        let error = CheckResult::error("fix", "why");
        assert_eq!(error.clone().normalized(), error);
    }
}
