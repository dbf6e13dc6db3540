//! Shared text normalization primitives.
//!
//! Matching strategies compare text in normalized space but must report
//! offsets into the original document. Only the quote-only pass keeps a
//! one-to-one character correspondence with its input; every other helper
//! either returns a plain string for comparison-only use or carries an
//! explicit byte-offset map back to the source text.

use std::collections::HashSet;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

/// Unicode punctuation canonicalized before tolerant comparison.
const PUNCTUATION_TABLE: &[(&str, &str)] = &[
    ("\u{2018}", "'"),   // left single quotation mark
    ("\u{2019}", "'"),   // right single quotation mark
    ("\u{201B}", "'"),   // single high-reversed-9 quotation mark
    ("\u{2032}", "'"),   // prime
    ("\u{201C}", "\""),  // left double quotation mark
    ("\u{201D}", "\""),  // right double quotation mark
    ("\u{201F}", "\""),  // double high-reversed-9 quotation mark
    ("\u{2033}", "\""),  // double prime
    ("\u{2012}", "-"),   // figure dash
    ("\u{2013}", "-"),   // en dash
    ("\u{2014}", "-"),   // em dash
    ("\u{2015}", "-"),   // horizontal bar
    ("\u{2212}", "-"),   // minus sign
    ("\u{00A0}", " "),   // no-break space
    ("\u{2007}", " "),   // figure space
    ("\u{202F}", " "),   // narrow no-break space
    ("\u{2026}", "..."), // horizontal ellipsis
];

static PUNCTUATION_REPLACER: Lazy<AhoCorasick> = Lazy::new(|| {
    let patterns: Vec<&str> = PUNCTUATION_TABLE.iter().map(|(pattern, _)| *pattern).collect();
    AhoCorasickBuilder::new().build(patterns)
});

static PUNCTUATION_REPLACEMENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    PUNCTUATION_TABLE
        .iter()
        .map(|(_, replacement)| *replacement)
        .collect()
});

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("static regex"));

/// Canonicalize smart quotes, dashes, exotic spaces, and the ellipsis
/// character. The result can change byte and character counts; positions in
/// it must never be reused against the source text.
pub fn normalize_unicode_punctuation(text: &str) -> String {
    PUNCTUATION_REPLACER.replace_all(text, &PUNCTUATION_REPLACEMENTS)
}

/// Quote/apostrophe canonicalization only. One char in, one char out, so a
/// window sliced from the original document can be compared against a
/// needle after normalizing both sides.
pub fn normalize_quotes_only(text: &str) -> String {
    text.chars().map(canonical_quote).collect()
}

pub(crate) fn canonical_quote(ch: char) -> char {
    match ch {
        '\u{2018}' | '\u{2019}' | '\u{201B}' | '\u{2032}' => '\'',
        '\u{201C}' | '\u{201D}' | '\u{201F}' | '\u{2033}' => '"',
        _ => ch,
    }
}

fn canonical_punctuation(ch: char) -> Option<&'static str> {
    PUNCTUATION_TABLE
        .iter()
        .find(|(pattern, _)| pattern.chars().next() == Some(ch))
        .map(|(_, replacement)| *replacement)
}

/// Collapse whitespace runs to single spaces and trim. Comparison-only.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text.trim(), " ").into_owned()
}

/// Strip everything except letters and digits, lowercased. Comparison-only;
/// positions in the result bear no direct relation to the source.
pub fn alphanumeric_only(text: &str) -> String {
    NON_ALPHANUMERIC.replace_all(text, "").to_lowercase()
}

/// Rules for [`normalize_mapped`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeMap {
    pub fold_case: bool,
    pub punctuation: bool,
    pub collapse_whitespace: bool,
}

/// Normalized text plus a byte-offset map back into the source string.
#[derive(Debug)]
pub struct MappedText {
    pub text: String,
    offsets: Vec<usize>,
}

impl MappedText {
    /// Source byte offset for a byte position in the normalized text.
    /// Positions at or past the end map to the end of the source.
    pub fn source_offset(&self, normalized_offset: usize) -> usize {
        let last = self.offsets.len().saturating_sub(1);
        self.offsets[normalized_offset.min(last)]
    }
}

/// Apply normalization rules while recording, for every output byte, the
/// source byte it was derived from. This is what lets a match found in
/// normalized space be reported as a span in the original line.
pub fn normalize_mapped(source: &str, rules: &NormalizeMap) -> MappedText {
    let mut text = String::with_capacity(source.len());
    let mut offsets = Vec::with_capacity(source.len() + 1);
    let mut pending_space = false;
    for (byte_idx, ch) in source.char_indices() {
        if rules.collapse_whitespace && ch.is_whitespace() {
            pending_space = !text.is_empty();
            continue;
        }
        if pending_space {
            push_mapped(&mut text, &mut offsets, byte_idx, ' ');
            pending_space = false;
        }
        if rules.punctuation {
            if let Some(replacement) = canonical_punctuation(ch) {
                for replacement_ch in replacement.chars() {
                    push_mapped(&mut text, &mut offsets, byte_idx, replacement_ch);
                }
                continue;
            }
        }
        if rules.fold_case {
            for lowered in ch.to_lowercase() {
                push_mapped(&mut text, &mut offsets, byte_idx, lowered);
            }
        } else {
            push_mapped(&mut text, &mut offsets, byte_idx, ch);
        }
    }
    offsets.push(source.len());
    MappedText { text, offsets }
}

fn push_mapped(text: &mut String, offsets: &mut Vec<usize>, source_offset: usize, ch: char) {
    for _ in 0..ch.len_utf8() {
        offsets.push(source_offset);
    }
    text.push(ch);
}

/// Count distinct word tokens shared between a context hint and a stretch
/// of surrounding text, case-insensitively. Used to pick between otherwise
/// equally valid occurrences of a snippet.
pub fn token_overlap(context: &str, surrounding: &str) -> usize {
    let context_words: HashSet<String> = context
        .unicode_words()
        .map(|word| word.to_lowercase())
        .collect();
    if context_words.is_empty() {
        return 0;
    }
    surrounding
        .unicode_words()
        .map(|word| word.to_lowercase())
        .filter(|word| context_words.contains(word))
        .collect::<HashSet<String>>()
        .len()
}

/// Slice the text around a span, expanding by roughly `radius` bytes on
/// each side and snapping to character boundaries.
pub(crate) fn surrounding(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let mut from = start.saturating_sub(radius);
    while from > 0 && !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + radius).min(text.len());
    while to < text.len() && !text.is_char_boundary(to) {
        to += 1;
    }
    &text[from..to]
}
