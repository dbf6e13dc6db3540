//! Text location resolution engine.
//!
//! Takes an LLM-produced snippet and a source document and determines the
//! exact character span the snippet refers to, tolerating quote-style
//! mismatches, whitespace drift, case differences, truncation, and light
//! paraphrase. Strategies are tried in a fixed order and the first hit
//! wins; every resolution reports which strategy produced it and a bounded
//! confidence so consumers can decide how much to trust the span.
//!
//! "Not found" is an ordinary outcome, returned as `None`, never an error.

pub mod fuzzy;
pub mod line;
pub mod normalize;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fuzzy::{FuzzyBudget, Variant};

pub use crate::line::{CharacterLocation, DocumentStats, LineBasedLocation, LineBasedLocator};

/// Snippets longer than this may fall back to a prefix search.
const PARTIAL_THRESHOLD: usize = 50;

/// Characters kept when truncating a long snippet to its prefix.
const PARTIAL_LENGTH: usize = 50;

/// Byte radius inspected around a candidate span when a context hint has
/// to pick between several.
const CONTEXT_RADIUS: usize = 60;

/// Which rung of the matching ladder produced a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Exact,
    Ufuzzy,
    UfuzzyQuotes,
    UfuzzyCase,
    UfuzzyPartial,
    QuotesNormalized,
    Partial,
}

impl Strategy {
    /// Trust signal attached to every location. Callers read it, they do
    /// not recompute it.
    pub fn confidence(self) -> f32 {
        match self {
            Strategy::Exact => 1.0,
            Strategy::QuotesNormalized => 0.95,
            Strategy::Ufuzzy => 0.85,
            Strategy::UfuzzyQuotes => 0.8,
            Strategy::UfuzzyCase => 0.75,
            Strategy::UfuzzyPartial => 0.7,
            Strategy::Partial => 0.7,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::Exact => "exact",
            Strategy::Ufuzzy => "ufuzzy",
            Strategy::UfuzzyQuotes => "ufuzzy-quotes",
            Strategy::UfuzzyCase => "ufuzzy-case",
            Strategy::UfuzzyPartial => "ufuzzy-partial",
            Strategy::QuotesNormalized => "quotes-normalized",
            Strategy::Partial => "partial",
        };
        f.write_str(name)
    }
}

/// Resolved span for a snippet, in byte offsets into the original document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextLocation {
    pub start_offset: usize,
    pub end_offset: usize,
    /// Exact substring of the original document at the span. Always sliced
    /// from the unmodified document, never from a normalized copy.
    pub quoted_text: String,
    /// 1-based line containing the start of the span.
    pub line_number: usize,
    pub line_text: String,
    pub strategy: Strategy,
    pub confidence: f32,
}

/// Per-call configuration for [`find_text_location`].
#[derive(Debug, Clone, Default)]
pub struct LocateOptions {
    /// Enable the quote/dash/space normalization passes.
    pub normalize_quotes: bool,
    /// Enable the prefix fallback for long snippets.
    pub partial_match: bool,
    /// Auxiliary text used to pick between multiple equally good matches.
    pub context: Option<String>,
    /// Skip the approximate matcher, leaving only the deterministic rungs.
    /// Matches deployments where the fuzzy primitive is unavailable.
    pub disable_fuzzy: bool,
}

/// Locate `search_text` (or a close variant of it) inside `document_text`.
///
/// Strategies are tried in strict order and the first success wins:
/// exact substring, tolerant search over normalization variants, the
/// deterministic quote-normalized window scan, and a prefix fallback for
/// long snippets. Returns `None` when every strategy fails or either
/// input is empty.
pub fn find_text_location(
    search_text: &str,
    document_text: &str,
    options: &LocateOptions,
) -> Option<TextLocation> {
    if search_text.is_empty() || document_text.is_empty() {
        return None;
    }

    // 1. exact substring, first occurrence
    if let Some(start) = document_text.find(search_text) {
        debug!(start, "exact substring hit");
        return Some(build_location(
            document_text,
            start,
            start + search_text.len(),
            Strategy::Exact,
        ));
    }

    // 2. tolerant search over ordered variants
    if !options.disable_fuzzy {
        let budget = FuzzyBudget::default();
        let context = options.context.as_deref();

        let ranges = fuzzy::find_fuzzy_ranges(document_text, search_text, Variant::Verbatim, budget);
        if let Some((start, end)) = pick_range(&ranges, document_text, context) {
            debug!(start, end, strategy = %Strategy::Ufuzzy, "fuzzy variant hit");
            return Some(build_location(document_text, start, end, Strategy::Ufuzzy));
        }

        if options.normalize_quotes {
            let ranges =
                fuzzy::find_fuzzy_ranges(document_text, search_text, Variant::Punctuation, budget);
            if let Some((start, end)) = pick_range(&ranges, document_text, context) {
                debug!(start, end, strategy = %Strategy::UfuzzyQuotes, "fuzzy variant hit");
                return Some(build_location(document_text, start, end, Strategy::UfuzzyQuotes));
            }
        }

        let ranges = fuzzy::find_fuzzy_ranges(document_text, search_text, Variant::FoldCase, budget);
        if let Some((start, end)) = pick_range(&ranges, document_text, context) {
            debug!(start, end, strategy = %Strategy::UfuzzyCase, "fuzzy variant hit");
            return Some(build_location(document_text, start, end, Strategy::UfuzzyCase));
        }

        if options.partial_match && search_text.chars().count() > PARTIAL_THRESHOLD {
            let prefix = char_prefix(search_text, PARTIAL_LENGTH);
            if let Some(start) = document_text.find(prefix) {
                debug!(start, "prefix of a long snippet hit exactly");
                return Some(build_location(
                    document_text,
                    start,
                    start + prefix.len(),
                    Strategy::Partial,
                ));
            }
            let ranges = fuzzy::find_fuzzy_ranges(document_text, prefix, Variant::Verbatim, budget);
            if let Some((start, end)) = pick_range(&ranges, document_text, context) {
                debug!(start, end, strategy = %Strategy::UfuzzyPartial, "fuzzy variant hit");
                return Some(build_location(document_text, start, end, Strategy::UfuzzyPartial));
            }
        }
    }

    // 3. character-by-character quote-normalized window scan. Exact-length
    // quote substitutions that slip past the tolerant matcher's alignment
    // probe are caught here deterministically.
    if options.normalize_quotes {
        if let Some((start, end)) = find_quote_normalized(document_text, search_text) {
            debug!(start, end, "quote-normalized window scan hit");
            return Some(build_location(document_text, start, end, Strategy::QuotesNormalized));
        }
    }

    // deterministic prefix fallback when the tolerant matcher is disabled
    if options.disable_fuzzy
        && options.partial_match
        && search_text.chars().count() > PARTIAL_THRESHOLD
    {
        let prefix = char_prefix(search_text, PARTIAL_LENGTH);
        if let Some(start) = document_text.find(prefix) {
            debug!(start, "prefix of a long snippet hit exactly");
            return Some(build_location(
                document_text,
                start,
                start + prefix.len(),
                Strategy::Partial,
            ));
        }
    }

    warn!(
        snippet = char_prefix(search_text, 80),
        "no strategy resolved the snippet"
    );
    None
}

/// Slide a window of the needle's character length across the document and
/// compare after quote-only canonicalization. The window is sliced from
/// the original document, so the reported span always has the document's
/// own length even when quote characters differ in byte width.
fn find_quote_normalized(document: &str, needle: &str) -> Option<(usize, usize)> {
    let needle_norm = normalize::normalize_quotes_only(needle);
    let needle_chars = needle.chars().count();
    if needle_chars == 0 {
        return None;
    }
    let first_needle = needle_norm.chars().next()?;
    let boundaries: Vec<usize> = document
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(document.len()))
        .collect();
    let doc_chars: Vec<char> = document.chars().collect();
    let total = doc_chars.len();
    if total < needle_chars {
        return None;
    }
    for pos in 0..=total - needle_chars {
        if normalize::canonical_quote(doc_chars[pos]) != first_needle {
            continue;
        }
        let slice = &document[boundaries[pos]..boundaries[pos + needle_chars]];
        if normalize::normalize_quotes_only(slice) == needle_norm {
            return Some((boundaries[pos], boundaries[pos + needle_chars]));
        }
    }
    None
}

fn pick_range(
    ranges: &[(usize, usize)],
    document: &str,
    context: Option<&str>,
) -> Option<(usize, usize)> {
    match ranges {
        [] => None,
        [only] => Some(*only),
        many => {
            let Some(hint) = context else {
                return Some(many[0]);
            };
            let mut best = many[0];
            let mut best_overlap = 0;
            for &(start, end) in many {
                let overlap = normalize::token_overlap(
                    hint,
                    normalize::surrounding(document, start, end, CONTEXT_RADIUS),
                );
                if overlap > best_overlap {
                    best_overlap = overlap;
                    best = (start, end);
                }
            }
            Some(best)
        }
    }
}

fn build_location(document: &str, start: usize, end: usize, strategy: Strategy) -> TextLocation {
    let quoted_text = document[start..end].to_string();
    let line_start = document[..start].rfind('\n').map(|idx| idx + 1).unwrap_or(0);
    let line_end = document[start..]
        .find('\n')
        .map(|idx| start + idx)
        .unwrap_or(document.len());
    TextLocation {
        start_offset: start,
        end_offset: end,
        quoted_text,
        line_number: document[..start].bytes().filter(|&b| b == b'\n').count() + 1,
        line_text: document[line_start..line_end].to_string(),
        strategy,
        confidence: strategy.confidence(),
    }
}

fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "The quick brown fox jumps over the lazy dog near the river bank today.";

    fn locate(search: &str) -> Option<TextLocation> {
        find_text_location(search, DOC, &LocateOptions::default())
    }

    #[test]
    fn empty_inputs_return_none() {
        assert!(find_text_location("", DOC, &LocateOptions::default()).is_none());
        assert!(find_text_location("fox", "", &LocateOptions::default()).is_none());
        assert!(find_text_location("", "", &LocateOptions::default()).is_none());
    }

    #[test]
    fn exact_match_reports_first_occurrence() {
        let doc = "one fish two fish";
        let location = find_text_location("fish", doc, &LocateOptions::default()).unwrap();
        assert_eq!(location.start_offset, 4);
        assert_eq!(location.strategy, Strategy::Exact);
        assert_eq!(location.confidence, 1.0);
    }

    #[test]
    fn exact_match_ignores_other_options() {
        let options = LocateOptions {
            normalize_quotes: true,
            partial_match: true,
            context: Some("two".into()),
            disable_fuzzy: false,
        };
        let doc = "one fish two fish";
        let location = find_text_location("fish", doc, &options).unwrap();
        assert_eq!(location.start_offset, 4);
        assert_eq!(location.strategy, Strategy::Exact);
    }

    #[test]
    fn fuzzy_rung_tolerates_a_typo() {
        let location = locate("quick brawn fox jumps").unwrap();
        assert_eq!(location.strategy, Strategy::Ufuzzy);
        assert_eq!(location.quoted_text, "quick brown fox jumps");
        assert_eq!(&DOC[location.start_offset..location.end_offset], location.quoted_text);
    }

    #[test]
    fn line_metadata_is_derived_from_the_start() {
        let doc = "first line\nsecond line with a fox inside\nthird";
        let location = find_text_location("fox", doc, &LocateOptions::default()).unwrap();
        assert_eq!(location.line_number, 2);
        assert_eq!(location.line_text, "second line with a fox inside");
    }

    #[test]
    fn quote_scan_matches_in_place_of_smart_quotes() {
        let doc = "She said \u{2018}hello there\u{2019} and left.";
        let range = find_quote_normalized(doc, "'hello there'").unwrap();
        assert_eq!(&doc[range.0..range.1], "\u{2018}hello there\u{2019}");
    }

    #[test]
    fn quote_scan_strategy_fires_without_fuzzy() {
        let doc = "She said \u{2018}hello there\u{2019} and left.";
        let options = LocateOptions {
            normalize_quotes: true,
            disable_fuzzy: true,
            ..LocateOptions::default()
        };
        let location = find_text_location("'hello there'", doc, &options).unwrap();
        assert_eq!(location.strategy, Strategy::QuotesNormalized);
        assert_eq!(location.confidence, 0.95);
        assert_eq!(location.quoted_text, "\u{2018}hello there\u{2019}");
    }

    #[test]
    fn context_hint_picks_between_fuzzy_matches() {
        let doc = "Alpha section mentions the delivery date. \
                   Filler sentence goes here to separate the two sections cleanly. \
                   Beta section mentions the delivery date too, near budget talks.";
        let options = LocateOptions {
            context: Some("budget".into()),
            ..LocateOptions::default()
        };
        let location = find_text_location("mentions the delifery date", doc, &options).unwrap();
        assert!(location.start_offset > 42);
        assert_eq!(&doc[location.start_offset..location.end_offset], location.quoted_text);
    }

    #[test]
    fn absent_snippet_returns_none() {
        let options = LocateOptions {
            normalize_quotes: true,
            partial_match: true,
            ..LocateOptions::default()
        };
        assert!(find_text_location("nonexistent unique string xyz123", DOC, &options).is_none());
    }

    #[test]
    fn char_prefix_respects_boundaries() {
        assert_eq!(char_prefix("caf\u{E9} au lait", 4), "caf\u{E9}");
        assert_eq!(char_prefix("ab", 10), "ab");
    }
}
