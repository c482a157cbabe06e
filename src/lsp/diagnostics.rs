//! Diagnostics conversion from grammar check results to LSP diagnostics.

use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString};

use crate::check::CheckResult;
use crate::document::Sentence;

pub const DIAGNOSTIC_SOURCE: &str = "jalsa";
pub const DIAGNOSTIC_CODE: &str = "grammar";

const FALLBACK_MESSAGE: &str = "Possible grammatical error";

/// Convert a failing check for `sentence` into an LSP diagnostic.
///
/// The range always comes from the sentence, never from the check result.
pub fn to_diagnostic(sentence: &Sentence, result: &CheckResult) -> Diagnostic {
    Diagnostic {
        range: sentence.range,
        severity: Some(DiagnosticSeverity::ERROR),
        code: Some(NumberOrString::String(DIAGNOSTIC_CODE.to_string())),
        code_description: None,
        source: Some(DIAGNOSTIC_SOURCE.to_string()),
        message: message_for(result),
        related_information: None,
        tags: None,
        data: None,
    }
}

/// Explanation, then the suggested correction.
fn message_for(result: &CheckResult) -> String {
    let parts: Vec<&str> = [result.explanation.trim(), result.correction.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        FALLBACK_MESSAGE.to_string()
    } else {
        parts.join("\n\n")
    }
}

/// Render a diagnostic as a single `path:line:col: severity: message` line.
///
/// Lines and columns are one-based, as compilers print them.
pub fn format_diagnostic(path: &str, diagnostic: &Diagnostic) -> String {
    let severity = match diagnostic.severity {
        Some(DiagnosticSeverity::WARNING) => "warning",
        Some(DiagnosticSeverity::INFORMATION) => "info",
        Some(DiagnosticSeverity::HINT) => "hint",
        _ => "error",
    };
    let message = diagnostic
        .message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "{}:{}:{}: {}: {}",
        path,
        diagnostic.range.start.line + 1,
        diagnostic.range.start.character + 1,
        severity,
        message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::{Position, Range};

    fn sentence() -> Sentence {
        Sentence {
            text: "She go to the store".to_string(),
            range: Range::new(Position::new(2, 4), Position::new(3, 7)),
        }
    }

    #[test]
    fn creates_error_diagnostic_at_sentence_range() {
        let result = CheckResult::error("She went to the store.", "Use the past tense.");
        let diagnostic = to_diagnostic(&sentence(), &result);

        assert_eq!(diagnostic.range, sentence().range);
        assert_eq!(diagnostic.severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(diagnostic.source, Some("jalsa".to_string()));
        assert_eq!(
            diagnostic.code,
            Some(NumberOrString::String("grammar".to_string()))
        );
        assert_eq!(
            diagnostic.message,
            "Use the past tense.\n\nShe went to the store."
        );
    }

    #[test]
    fn message_omits_empty_parts() {
        let only_correction = CheckResult::error("Fixed.", "");
        assert_eq!(to_diagnostic(&sentence(), &only_correction).message, "Fixed.");

        let nothing = CheckResult::error("", "  ");
        assert_eq!(
            to_diagnostic(&sentence(), &nothing).message,
            "Possible grammatical error"
        );
    }

    #[test]
    fn formats_one_based_single_line() {
        let result = CheckResult::error("She went.", "Past tense.");
        let diagnostic = to_diagnostic(&sentence(), &result);

        assert_eq!(
            format_diagnostic("notes.md", &diagnostic),
            "notes.md:3:5: error: Past tense. She went."
        );
    }
}
