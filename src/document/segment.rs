//! Sentence segmentation for prose and markdown documents.
//!
//! The segmenter makes a single forward pass over the lines of a document.
//! Front matter, fenced code blocks, reference link definitions and HTML
//! comment openers are skipped; the remaining prose is split at
//! sentence-ending punctuation. A sentence that wraps onto following lines is
//! held as a pending fragment, joined with a single space, and emitted with a
//! range that covers every line it came from.
//!
//! Positions are LSP positions: zero-based lines, columns in UTF-16 code units.

use std::sync::OnceLock;

use regex::Regex;
use tower_lsp::lsp_types::{Position, Range};

const FRONT_MATTER_DELIMITERS: [&str; 2] = ["+++", "---"];
const FENCE_MARKERS: [&str; 2] = ["```", "~~~"];
const LIST_MARKER: &str = "- ";

/// A sentence of prose together with the source range it was taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    /// Normalized text. Line breaks inside the sentence become one space.
    pub text: String,
    /// Source range, spanning interior line breaks for wrapped sentences.
    pub range: Range,
}

/// Which kind of region the segmenter is currently inside.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SegmentState {
    /// Ordinary prose.
    #[default]
    Normal,
    /// Metadata block opened by a delimiter on the first line.
    FrontMatter,
    /// Code fence, or a region opened by a delimiter after the first line.
    Fenced,
}

impl SegmentState {
    /// Whether lines in this state are excluded from analysis.
    pub fn is_skipping(self) -> bool {
        self != SegmentState::Normal
    }

    /// Compute the next state if `line` is a structural marker.
    ///
    /// Returns `None` for lines that are not delimiters or fences. All skip
    /// regions share a single toggle: any marker line closes whichever region
    /// is open.
    pub fn transition(self, line_number: u32, line: &str) -> Option<SegmentState> {
        let is_delimiter = FRONT_MATTER_DELIMITERS.contains(&line);
        let is_fence = FENCE_MARKERS.iter().any(|marker| line.starts_with(marker));

        if !is_delimiter && !is_fence {
            return None;
        }

        Some(match self {
            SegmentState::Normal if is_delimiter && line_number == 0 => SegmentState::FrontMatter,
            SegmentState::Normal => SegmentState::Fenced,
            SegmentState::FrontMatter | SegmentState::Fenced => SegmentState::Normal,
        })
    }
}

/// Split `text` into sentences in source order.
///
/// Never fails: malformed markdown only degrades the output.
pub fn segment(text: &str) -> Vec<Sentence> {
    let mut segmenter = Segmenter::default();
    for (line_number, line) in text.split('\n').enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        segmenter.feed(line_number as u32, line);
    }
    segmenter.finish()
}

/// Incremental line-by-line segmenter.
///
/// Lines must be fed in order, starting at line 0.
#[derive(Debug, Default)]
pub struct Segmenter {
    state: SegmentState,
    pending: Option<Sentence>,
    sentences: Vec<Sentence>,
}

impl Segmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current skip-region state.
    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// The unterminated sentence waiting for a following line, if any.
    pub fn pending(&self) -> Option<&Sentence> {
        self.pending.as_ref()
    }

    /// Process one line (without its line terminator).
    pub fn feed(&mut self, line_number: u32, line: &str) {
        if let Some(next) = self.state.transition(line_number, line) {
            self.state = next;
            return;
        }

        if self.state.is_skipping() || is_ignored_line(line) {
            return;
        }

        if line.trim().is_empty() {
            self.flush();
            return;
        }

        let split = split_line(line);
        let last = split.fragments.len().saturating_sub(1);

        for (i, fragment) in split.fragments.into_iter().enumerate() {
            let range = Range::new(
                Position::new(line_number, fragment.start),
                Position::new(line_number, fragment.end),
            );

            if let Some(mut pending) = self.pending.take() {
                pending.text.push(' ');
                pending.text.push_str(fragment.text);
                pending.range.end = range.end;
                self.sentences.push(pending);
                continue;
            }

            let sentence = Sentence {
                text: fragment.text.to_string(),
                range,
            };

            if i == 0 && fragment.text.starts_with(LIST_MARKER) {
                self.sentences.push(sentence);
            } else if i == last && !split.terminated {
                self.pending = Some(sentence);
            } else {
                self.sentences.push(sentence);
            }
        }
    }

    /// Emit the pending fragment, if any, as a complete sentence.
    pub fn flush(&mut self) {
        if let Some(pending) = self.pending.take() {
            if !pending.text.is_empty() {
                self.sentences.push(pending);
            }
        }
    }

    /// Flush and return every sentence produced so far.
    pub fn finish(mut self) -> Vec<Sentence> {
        self.flush();
        self.sentences
    }
}

/// Reference link definitions and HTML comment openers carry no prose.
fn is_ignored_line(line: &str) -> bool {
    line.contains("]: http") || line.starts_with("<!-")
}

#[derive(Debug)]
struct Fragment<'a> {
    text: &'a str,
    start: u32,
    end: u32,
}

#[derive(Debug)]
struct SplitLine<'a> {
    fragments: Vec<Fragment<'a>>,
    /// The line ends in sentence punctuation.
    terminated: bool,
}

fn sentence_boundary() -> &'static Regex {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    BOUNDARY.get_or_init(|| Regex::new(r"[.?!](\s+|$)").expect("sentence boundary regex is valid"))
}

/// Split a line at sentence boundaries.
///
/// A boundary inside the line consumes the punctuation and the whitespace
/// after it. A boundary at the end of the line keeps the punctuation with the
/// fragment and marks the line as terminated. Blank fragments are dropped but
/// still advance the column.
fn split_line(line: &str) -> SplitLine<'_> {
    let mut fragments = Vec::new();
    let mut terminated = false;
    let mut byte_cursor = 0;
    let mut column = 0;

    for boundary in sentence_boundary().find_iter(line) {
        let at_end = boundary.end() == line.len();
        // The punctuation mark is a single ASCII byte.
        let text_end = if at_end {
            boundary.start() + 1
        } else {
            boundary.start()
        };
        push_fragment(&mut fragments, &line[byte_cursor..text_end], column);

        column += utf16_len(&line[byte_cursor..boundary.end()]);
        byte_cursor = boundary.end();
        terminated = at_end;
    }

    if byte_cursor < line.len() {
        push_fragment(&mut fragments, &line[byte_cursor..], column);
        terminated = false;
    }

    SplitLine {
        fragments,
        terminated,
    }
}

fn push_fragment<'a>(fragments: &mut Vec<Fragment<'a>>, text: &'a str, start: u32) {
    if text.trim().is_empty() {
        return;
    }
    fragments.push(Fragment {
        text,
        start,
        end: start + utf16_len(text),
    });
}

/// Length of `text` in UTF-16 code units.
pub(crate) fn utf16_len(text: &str) -> u32 {
    text.encode_utf16().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(text: &str, start: (u32, u32), end: (u32, u32)) -> Sentence {
        Sentence {
            text: text.to_string(),
            range: Range::new(
                Position::new(start.0, start.1),
                Position::new(end.0, end.1),
            ),
        }
    }

    #[test]
    fn splits_single_line() {
        assert_eq!(
            segment("Hello, world! This is a test."),
            vec![
                sentence("Hello, world", (0, 0), (0, 12)),
                sentence("This is a test.", (0, 14), (0, 29)),
            ]
        );
    }

    #[test]
    fn joins_sentence_across_lines() {
        assert_eq!(
            segment("Hello, world! This is a\ntest. This is another test."),
            vec![
                sentence("Hello, world", (0, 0), (0, 12)),
                sentence("This is a test", (0, 14), (1, 4)),
                sentence("This is another test.", (1, 6), (1, 27)),
            ]
        );
    }

    #[test]
    fn list_items_terminate_immediately() {
        assert_eq!(
            segment("- Hello world. This is\n  a sentence\n- This is a test"),
            vec![
                sentence("- Hello world", (0, 0), (0, 13)),
                sentence("This is   a sentence", (0, 15), (1, 12)),
                sentence("- This is a test", (2, 0), (2, 16)),
            ]
        );
    }

    #[test]
    fn blank_lines_separate_paragraphs() {
        assert_eq!(
            segment("Hello world\n  \nThis is a sentence\n\n- This is a test"),
            vec![
                sentence("Hello world", (0, 0), (0, 11)),
                sentence("This is a sentence", (2, 0), (2, 18)),
                sentence("- This is a test", (4, 0), (4, 16)),
            ]
        );
    }

    #[test]
    fn abbreviation_without_space_is_not_a_boundary() {
        let text = "I have read the source code of\nNode.js Redis Client. I want to jot down some notes.";
        assert_eq!(
            segment(text),
            vec![
                sentence(
                    "I have read the source code of Node.js Redis Client",
                    (0, 0),
                    (1, 20)
                ),
                sentence("I want to jot down some notes.", (1, 22), (1, 52)),
            ]
        );
    }

    #[test]
    fn skips_front_matter() {
        let text = "---\ntitle: Notes. More notes.\n---\nBody text.";
        assert_eq!(segment(text), vec![sentence("Body text.", (3, 0), (3, 10))]);
    }

    #[test]
    fn skips_toml_front_matter() {
        let text = "+++\ntitle = \"x\"\n+++\n\nBody.";
        assert_eq!(segment(text), vec![sentence("Body.", (4, 0), (4, 5))]);
    }

    #[test]
    fn skips_fenced_code() {
        let text = "Intro.\n```rust\nlet x = 1. Not prose.\n```\n~~~\nmore code\n~~~\nOutro.";
        assert_eq!(
            segment(text),
            vec![
                sentence("Intro.", (0, 0), (0, 6)),
                sentence("Outro.", (7, 0), (7, 6)),
            ]
        );
    }

    #[test]
    fn late_delimiter_opens_skip_region() {
        let text = "Before.\n---\nhidden text.\n---\nAfter.";
        assert_eq!(
            segment(text),
            vec![
                sentence("Before.", (0, 0), (0, 7)),
                sentence("After.", (4, 0), (4, 6)),
            ]
        );
    }

    #[test]
    fn unterminated_fence_skips_rest_of_document() {
        let text = "Prose here.\n```\ncode. more code.\n";
        assert_eq!(segment(text), vec![sentence("Prose here.", (0, 0), (0, 11))]);
    }

    #[test]
    fn ignores_link_definitions_and_comments() {
        let text = "Read this.\n[docs]: https://example.com\n<!-- hidden. -->\nDone.";
        assert_eq!(
            segment(text),
            vec![
                sentence("Read this.", (0, 0), (0, 10)),
                sentence("Done.", (3, 0), (3, 5)),
            ]
        );
    }

    #[test]
    fn skipped_lines_do_not_flush_pending() {
        let text = "A sentence that\n<!-- note -->\ncontinues here.";
        assert_eq!(
            segment(text),
            vec![sentence("A sentence that continues here.", (0, 0), (2, 15))]
        );
    }

    #[test]
    fn flushes_pending_at_end_of_input() {
        assert_eq!(
            segment("No punctuation here"),
            vec![sentence("No punctuation here", (0, 0), (0, 19))]
        );
    }

    #[test]
    fn question_and_exclamation_marks() {
        assert_eq!(
            segment("Really? Yes!"),
            vec![
                sentence("Really", (0, 0), (0, 6)),
                sentence("Yes!", (0, 8), (0, 12)),
            ]
        );
    }

    #[test]
    fn wide_separator_advances_column() {
        assert_eq!(
            segment("One.   Two."),
            vec![
                sentence("One", (0, 0), (0, 3)),
                sentence("Two.", (0, 7), (0, 11)),
            ]
        );
    }

    #[test]
    fn trailing_whitespace_after_punctuation_terminates_line() {
        assert_eq!(
            segment("Done.  \nNext."),
            vec![
                sentence("Done.", (0, 0), (0, 5)),
                sentence("Next.", (1, 0), (1, 5)),
            ]
        );
    }

    #[test]
    fn columns_count_utf16_units() {
        assert_eq!(
            segment("Caf\u{e9} \u{1F600} ok. Next one."),
            vec![
                sentence("Caf\u{e9} \u{1F600} ok", (0, 0), (0, 10)),
                sentence("Next one.", (0, 12), (0, 21)),
            ]
        );
    }

    #[test]
    fn crlf_line_endings() {
        assert_eq!(
            segment("---\r\ntitle: x\r\n---\r\nFirst line\r\nsecond line."),
            vec![sentence("First line second line.", (3, 0), (4, 12))]
        );
    }

    #[test]
    fn empty_document_has_no_sentences() {
        assert!(segment("").is_empty());
        assert!(segment("\n\n   \n").is_empty());
    }

    #[test]
    fn state_machine_transitions() {
        assert_eq!(
            SegmentState::Normal.transition(0, "---"),
            Some(SegmentState::FrontMatter)
        );
        assert_eq!(
            SegmentState::Normal.transition(3, "+++"),
            Some(SegmentState::Fenced)
        );
        assert_eq!(
            SegmentState::Normal.transition(0, "```toml"),
            Some(SegmentState::Fenced)
        );
        assert_eq!(
            SegmentState::FrontMatter.transition(2, "---"),
            Some(SegmentState::Normal)
        );
        assert_eq!(
            SegmentState::Fenced.transition(9, "~~~"),
            Some(SegmentState::Normal)
        );
        assert_eq!(SegmentState::Normal.transition(0, "-- "), None);
        assert_eq!(SegmentState::Fenced.transition(4, "plain"), None);
    }

    #[test]
    fn segmenter_exposes_pending_fragment() {
        let mut segmenter = Segmenter::new();
        segmenter.feed(0, "An unfinished");
        assert_eq!(segmenter.state(), SegmentState::Normal);
        assert_eq!(
            segmenter.pending(),
            Some(&sentence("An unfinished", (0, 0), (0, 13)))
        );

        segmenter.feed(1, "```");
        assert!(segmenter.state().is_skipping());

        let sentences = segmenter.finish();
        assert_eq!(sentences, vec![sentence("An unfinished", (0, 0), (0, 13))]);
    }
}
