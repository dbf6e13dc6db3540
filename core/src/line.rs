//! Line-indexed document locator.
//!
//! LLM prompts reference lines ("Line 12, starting with `The qu`") rather
//! than byte offsets, because models echo short character anchors far more
//! reliably than exact offsets. [`LineBasedLocator`] precomputes a line
//! table for one document and converts between byte spans and
//! line-anchored locations, recovering from off-by-a-few line drift and
//! noisy anchor text.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::normalize::{self, NormalizeMap};

/// Anchor snippets carry at most this many characters per boundary.
const ANCHOR_LENGTH: usize = 6;

/// Characters of audit context captured before a resolved span.
const PREFIX_LENGTH: usize = 30;

/// Minimum span taken when start and end anchors collapse onto each other.
const MIN_SPAN_FALLBACK: usize = 50;

/// Span clamp applied when computed offsets run past the document.
const SALVAGE_SPAN: usize = 100;

/// Nearby lines tried when an anchor is missing from its claimed line.
const LINE_SEARCH_ORDER: [isize; 4] = [1, -1, 2, -2];

/// Byte radius inspected around an occurrence when a context hint has to
/// pick between several.
const CONTEXT_RADIUS: usize = 20;

/// Line-anchored coordinates for communicating spans with an LLM.
/// Line indices are 0-based; the anchors are the first characters of the
/// match on the start line and its last characters on the end line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineBasedLocation {
    pub start_line_index: usize,
    pub end_line_index: usize,
    pub start_characters: String,
    pub end_characters: String,
}

/// Byte span recovered from a [`LineBasedLocation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterLocation {
    pub start_offset: usize,
    pub end_offset: usize,
    pub quoted_text: String,
    /// Up to thirty characters immediately before the span, kept for
    /// human- and LLM-facing audit context.
    pub prefix: Option<String>,
}

/// Descriptive statistics for a loaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total_lines: usize,
    pub total_characters: usize,
    pub average_line_length: f32,
    pub longest_line: usize,
}

/// Line table for one document, built once at construction and immutable
/// afterwards. A new document requires a new locator.
pub struct LineBasedLocator {
    text: String,
    lines: Vec<String>,
    line_start_offsets: Vec<usize>,
}

impl LineBasedLocator {
    pub fn new(document_text: &str) -> Self {
        let lines: Vec<String> = document_text.split('\n').map(str::to_string).collect();
        let mut line_start_offsets = Vec::with_capacity(lines.len());
        let mut offset = 0;
        for line in &lines {
            line_start_offsets.push(offset);
            offset += line.len() + 1; // the removed newline
        }
        Self {
            text: document_text.to_string(),
            lines,
            line_start_offsets,
        }
    }

    /// Render the document as `Line N: text`, one entry per line. This is
    /// the form handed to LLM prompts that are expected to answer with
    /// line-anchored locations.
    pub fn numbered_lines(&self) -> String {
        self.lines
            .iter()
            .enumerate()
            .map(|(idx, line)| format!("Line {}: {}", idx + 1, line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// 1-based line number containing a byte offset.
    pub fn line_number(&self, offset: usize) -> usize {
        self.line_index(offset) + 1
    }

    /// 1-based line accessor.
    pub fn line(&self, line_number: usize) -> Option<&str> {
        if line_number == 0 {
            return None;
        }
        self.lines.get(line_number - 1).map(String::as_str)
    }

    pub fn stats(&self) -> DocumentStats {
        let line_lengths: Vec<usize> = self.lines.iter().map(|line| line.chars().count()).collect();
        let total_lines = self.lines.len();
        let line_char_total: usize = line_lengths.iter().sum();
        DocumentStats {
            total_lines,
            total_characters: self.text.chars().count(),
            average_line_length: if total_lines == 0 {
                0.0
            } else {
                line_char_total as f32 / total_lines as f32
            },
            longest_line: line_lengths.into_iter().max().unwrap_or(0),
        }
    }

    /// Convert a byte span into line-anchored coordinates.
    pub fn offset_to_line_location(
        &self,
        start_offset: usize,
        end_offset: usize,
    ) -> Option<LineBasedLocation> {
        if start_offset >= end_offset || end_offset > self.text.len() {
            warn!(start_offset, end_offset, "span out of range for line conversion");
            return None;
        }
        if !self.text.is_char_boundary(start_offset) || !self.text.is_char_boundary(end_offset) {
            return None;
        }
        let start_line_index = self.line_index(start_offset);
        let end_line_index = self.line_index(end_offset - 1);

        let start_line_end =
            self.line_start_offsets[start_line_index] + self.lines[start_line_index].len();
        let start_slice = &self.text[start_offset..end_offset.min(start_line_end)];
        let end_line_start = self.line_start_offsets[end_line_index];
        let end_slice = &self.text[start_offset.max(end_line_start)..end_offset];

        Some(LineBasedLocation {
            start_line_index,
            end_line_index,
            start_characters: head_chars(start_slice, ANCHOR_LENGTH).to_string(),
            end_characters: tail_chars(end_slice, ANCHOR_LENGTH).to_string(),
        })
    }

    /// Resolve line-anchored coordinates back to a byte span.
    ///
    /// Anchors are searched on their claimed lines first, then on nearby
    /// lines to absorb LLM line-counting drift. Returns `None` when either
    /// anchor cannot be found at all; structurally invalid spans are
    /// clamped to a short window rather than dropped when the start is
    /// still usable.
    pub fn line_location_to_offset(&self, location: &LineBasedLocation) -> Option<CharacterLocation> {
        let start_line_index = location.start_line_index;
        let end_line_index = location.end_line_index;
        if start_line_index > end_line_index || end_line_index >= self.lines.len() {
            warn!(
                start_line_index,
                end_line_index,
                line_count = self.lines.len(),
                "line location indices out of range"
            );
            return None;
        }

        let (actual_start_line, start_position) = self.locate_start(
            start_line_index,
            &location.start_characters,
            &location.end_characters,
        )?;
        let (actual_end_line, end_position) =
            self.locate_end(actual_start_line, end_line_index, &location.end_characters)?;

        let start_offset = self.line_start_offsets[actual_start_line] + start_position;
        let anchored_end = self.line_start_offsets[actual_end_line]
            + end_position
            + location.end_characters.len();
        let mut end_offset = if actual_end_line == actual_start_line && anchored_end <= start_offset
        {
            // anchors collapsed onto each other; take a reasonable stretch
            // of the line instead
            let line_remaining = self.lines[actual_start_line]
                .len()
                .saturating_sub(start_position);
            start_offset + MIN_SPAN_FALLBACK.max(line_remaining)
        } else {
            anchored_end
        };

        if start_offset >= self.text.len() {
            warn!(start_offset, "resolved start lies past the document end");
            return None;
        }
        if end_offset > self.text.len() || end_offset <= start_offset {
            warn!(start_offset, end_offset, "computed span invalid, clamping");
            end_offset = start_offset + SALVAGE_SPAN.min(self.text.len() - start_offset);
        }
        let end_offset = snap_right(&self.text, end_offset);

        let quoted_text = self.text[start_offset..end_offset].to_string();
        let prefix = if start_offset > 0 {
            Some(tail_chars(&self.text[..start_offset], PREFIX_LENGTH).to_string())
        } else {
            None
        };
        debug!(
            start_offset,
            end_offset,
            start_line = actual_start_line,
            end_line = actual_end_line,
            "line location resolved"
        );
        Some(CharacterLocation {
            start_offset,
            end_offset,
            quoted_text,
            prefix,
        })
    }

    fn line_index(&self, offset: usize) -> usize {
        self.line_start_offsets
            .partition_point(|&start| start <= offset)
            .saturating_sub(1)
    }

    fn locate_start(
        &self,
        line_index: usize,
        snippet: &str,
        context: &str,
    ) -> Option<(usize, usize)> {
        if let Some(position) = self.find_snippet_in_line(line_index, snippet, Some(context)) {
            return Some((line_index, position));
        }
        for delta in LINE_SEARCH_ORDER {
            let Some(candidate) = line_index.checked_add_signed(delta) else {
                continue;
            };
            if candidate >= self.lines.len() {
                continue;
            }
            if let Some(position) = self.find_snippet_in_line(candidate, snippet, Some(context)) {
                debug!(claimed = line_index, actual = candidate, "start anchor found on nearby line");
                return Some((candidate, position));
            }
        }
        None
    }

    /// End recovery never searches before the resolved start line, and at
    /// most two lines past the claimed end.
    fn locate_end(
        &self,
        start_line: usize,
        end_line_index: usize,
        snippet: &str,
    ) -> Option<(usize, usize)> {
        let upper = (end_line_index + 2).min(self.lines.len().saturating_sub(1));
        if end_line_index >= start_line {
            if let Some(position) = self.find_snippet_in_line(end_line_index, snippet, None) {
                return Some((end_line_index, position));
            }
        }
        for delta in LINE_SEARCH_ORDER {
            let Some(candidate) = end_line_index.checked_add_signed(delta) else {
                continue;
            };
            if candidate < start_line || candidate > upper {
                continue;
            }
            if let Some(position) = self.find_snippet_in_line(candidate, snippet, None) {
                debug!(claimed = end_line_index, actual = candidate, "end anchor found on nearby line");
                return Some((candidate, position));
            }
        }
        None
    }

    /// Locate `snippet` inside one line, trying progressively looser
    /// comparisons. Returns a byte position within the line.
    fn find_snippet_in_line(
        &self,
        line_index: usize,
        snippet: &str,
        context: Option<&str>,
    ) -> Option<usize> {
        let line = self.lines.get(line_index)?.as_str();

        // 1. literal, preferring the occurrence that agrees with the context
        if let Some(position) = find_literal(line, snippet, context) {
            return Some(position);
        }

        // 2. case-insensitive
        let fold = NormalizeMap {
            fold_case: true,
            ..NormalizeMap::default()
        };
        if let Some(position) = find_mapped(line, snippet, &fold, context) {
            return Some(position);
        }

        // 3. trimmed, both cases
        let trimmed = snippet.trim();
        if !trimmed.is_empty() && trimmed != snippet {
            if let Some(position) = find_literal(line, trimmed, context) {
                return Some(position);
            }
            if let Some(position) = find_mapped(line, trimmed, &fold, context) {
                return Some(position);
            }
        }

        // 4. unicode punctuation canonicalized, both cases
        for fold_case in [false, true] {
            let rules = NormalizeMap {
                fold_case,
                punctuation: true,
                collapse_whitespace: false,
            };
            if let Some(position) = find_mapped(line, snippet, &rules, context) {
                return Some(position);
            }
        }

        // 5. whitespace collapsed, both cases
        for fold_case in [false, true] {
            let rules = NormalizeMap {
                fold_case,
                punctuation: false,
                collapse_whitespace: true,
            };
            if let Some(position) = find_mapped(line, snippet, &rules, context) {
                return Some(position);
            }
        }

        // 6. alphanumeric-only reduction; position is a ratio estimate and
        // the least trustworthy rung before partials
        if let Some(position) = find_alphanumeric(line, snippet) {
            return Some(position);
        }

        // 7. shrinking partial windows of the snippet
        find_partial_window(line, snippet)
    }
}

fn find_literal(line: &str, snippet: &str, context: Option<&str>) -> Option<usize> {
    let occurrences: Vec<(usize, usize)> = line
        .match_indices(snippet)
        .map(|(idx, hit)| (idx, idx + hit.len()))
        .collect();
    pick_occurrence(line, &occurrences, context)
}

fn find_mapped(
    line: &str,
    snippet: &str,
    rules: &NormalizeMap,
    context: Option<&str>,
) -> Option<usize> {
    let mapped = normalize::normalize_mapped(line, rules);
    let needle = normalize::normalize_mapped(snippet, rules).text;
    if needle.is_empty() {
        return None;
    }
    let occurrences: Vec<(usize, usize)> = mapped
        .text
        .match_indices(&needle)
        .map(|(idx, hit)| {
            (
                mapped.source_offset(idx),
                mapped.source_offset(idx + hit.len()),
            )
        })
        .collect();
    pick_occurrence(line, &occurrences, context)
}

fn pick_occurrence(
    line: &str,
    occurrences: &[(usize, usize)],
    context: Option<&str>,
) -> Option<usize> {
    match occurrences {
        [] => None,
        [(start, _)] => Some(*start),
        many => {
            let Some(hint) = context else {
                return Some(many[0].0);
            };
            let mut best = many[0].0;
            let mut best_overlap = 0;
            for &(start, end) in many {
                let overlap = normalize::token_overlap(
                    hint,
                    normalize::surrounding(line, start, end, CONTEXT_RADIUS),
                );
                if overlap > best_overlap {
                    best_overlap = overlap;
                    best = start;
                }
            }
            Some(best)
        }
    }
}

fn find_alphanumeric(line: &str, snippet: &str) -> Option<usize> {
    let line_reduced = normalize::alphanumeric_only(line);
    let snippet_reduced = normalize::alphanumeric_only(snippet);
    if line_reduced.is_empty() || snippet_reduced.is_empty() {
        return None;
    }
    let idx = line_reduced.find(&snippet_reduced)?;
    let ratio = idx as f32 / line_reduced.len() as f32;
    let estimate = (line.len() as f32 * ratio) as usize;
    Some(snap_left(line, estimate.min(line.len().saturating_sub(1))))
}

fn find_partial_window(line: &str, snippet: &str) -> Option<usize> {
    let boundaries: Vec<usize> = snippet
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(snippet.len()))
        .collect();
    let total = boundaries.len() - 1;
    let longest = total.min(10);
    if longest < 3 {
        return None;
    }
    for window in (3..=longest).rev() {
        for start in 0..=total - window {
            let piece = &snippet[boundaries[start]..boundaries[start + window]];
            if let Some(idx) = line.find(piece) {
                return Some(idx);
            }
        }
    }
    None
}

fn head_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn tail_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

fn snap_left(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn snap_right(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "The first line talks about cats.\n\
                       A second line mentions dogs and more dogs.\n\
                       Third line covers birds.\n\
                       The fourth line closes the document.";

    fn locator() -> LineBasedLocator {
        LineBasedLocator::new(DOC)
    }

    #[test]
    fn line_table_matches_line_lengths() {
        let locator = LineBasedLocator::new("ab\ncde\n\nfg");
        assert_eq!(locator.lines(), &["ab", "cde", "", "fg"]);
        let offsets = [0, 3, 7, 8];
        for (idx, expected) in offsets.iter().enumerate() {
            assert_eq!(locator.line_start_offsets[idx], *expected);
        }
    }

    #[test]
    fn numbered_lines_are_one_based() {
        let locator = LineBasedLocator::new("alpha\nbeta");
        assert_eq!(locator.numbered_lines(), "Line 1: alpha\nLine 2: beta");
    }

    #[test]
    fn line_lookups_are_one_based() {
        let locator = locator();
        assert_eq!(locator.line_number(0), 1);
        assert_eq!(locator.line_number(40), 2);
        assert_eq!(locator.line(3), Some("Third line covers birds."));
        assert_eq!(locator.line(0), None);
        assert_eq!(locator.line(99), None);
    }

    #[test]
    fn stats_reflect_the_table() {
        let locator = LineBasedLocator::new("ab\ncdef");
        let stats = locator.stats();
        assert_eq!(stats.total_lines, 2);
        assert_eq!(stats.total_characters, 7);
        assert_eq!(stats.longest_line, 4);
        assert!((stats.average_line_length - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn round_trips_a_single_line_span() {
        let locator = locator();
        let start = DOC.find("talks about").unwrap();
        let end = start + "talks about cats".len();
        let location = locator.offset_to_line_location(start, end).unwrap();
        assert_eq!(location.start_line_index, 0);
        assert_eq!(location.end_line_index, 0);
        assert_eq!(location.start_characters, "talks ");
        assert_eq!(location.end_characters, "t cats");

        let resolved = locator.line_location_to_offset(&location).unwrap();
        assert_eq!(resolved.start_offset, start);
        assert_eq!(resolved.end_offset, end);
        assert_eq!(resolved.quoted_text, "talks about cats");
        assert!(resolved.prefix.is_some());
    }

    #[test]
    fn round_trips_a_multi_line_span() {
        let locator = locator();
        let start = DOC.find("mentions dogs").unwrap();
        let end = DOC.find("covers birds").unwrap() + "covers birds".len();
        let location = locator.offset_to_line_location(start, end).unwrap();
        assert_eq!(location.start_line_index, 1);
        assert_eq!(location.end_line_index, 2);

        let resolved = locator.line_location_to_offset(&location).unwrap();
        assert_eq!(resolved.start_offset, start);
        assert_eq!(resolved.end_offset, end);
        assert_eq!(&DOC[resolved.start_offset..resolved.end_offset], resolved.quoted_text);
    }

    #[test]
    fn recovers_from_line_drift() {
        let locator = locator();
        let start = DOC.find("covers birds").unwrap();
        let end = start + "covers birds".len();
        let mut location = locator.offset_to_line_location(start, end).unwrap();
        location.start_line_index = 0;
        location.end_line_index = 0;
        let resolved = locator.line_location_to_offset(&location).unwrap();
        assert_eq!(resolved.start_offset, start);
        assert_eq!(resolved.end_offset, end);
    }

    #[test]
    fn rejects_invalid_indices() {
        let locator = locator();
        let location = LineBasedLocation {
            start_line_index: 3,
            end_line_index: 1,
            start_characters: "The".into(),
            end_characters: "line".into(),
        };
        assert!(locator.line_location_to_offset(&location).is_none());
        let location = LineBasedLocation {
            start_line_index: 0,
            end_line_index: 99,
            start_characters: "The".into(),
            end_characters: "line".into(),
        };
        assert!(locator.line_location_to_offset(&location).is_none());
    }

    #[test]
    fn missing_anchors_return_none() {
        let locator = locator();
        let location = LineBasedLocation {
            start_line_index: 0,
            end_line_index: 0,
            start_characters: "zzzzzz".into(),
            end_characters: "qqqqqq".into(),
        };
        assert!(locator.line_location_to_offset(&location).is_none());
    }

    #[test]
    fn collapsed_anchors_fall_back_to_a_span() {
        let locator = locator();
        // end anchor sits before the start anchor on the same line
        let location = LineBasedLocation {
            start_line_index: 3,
            end_line_index: 3,
            start_characters: "closes".into(),
            end_characters: "fourth".into(),
        };
        let resolved = locator.line_location_to_offset(&location).unwrap();
        let start = DOC.find("closes").unwrap();
        assert_eq!(resolved.start_offset, start);
        assert!(resolved.end_offset > resolved.start_offset);
        assert!(resolved.end_offset <= DOC.len());
        assert_eq!(&DOC[resolved.start_offset..resolved.end_offset], resolved.quoted_text);
    }

    #[test]
    fn finds_snippet_case_insensitively() {
        let locator = LineBasedLocator::new("The Quick Brown Fox");
        assert_eq!(
            locator.find_snippet_in_line(0, "quick brown", None),
            Some(4)
        );
    }

    #[test]
    fn finds_snippet_through_unicode_quotes() {
        let locator = LineBasedLocator::new("He wrote \u{201C}stop\u{201D} on the wall");
        let position = locator.find_snippet_in_line(0, "\"stop\"", None).unwrap();
        assert_eq!(position, 9);
    }

    #[test]
    fn finds_snippet_with_collapsed_whitespace() {
        let locator = LineBasedLocator::new("spaced   out    words here");
        let position = locator
            .find_snippet_in_line(0, "spaced out words", None)
            .unwrap();
        assert_eq!(position, 0);
    }

    #[test]
    fn alphanumeric_rung_estimates_a_position() {
        let locator = LineBasedLocator::new("a-b-c-d quick march");
        let position = locator.find_snippet_in_line(0, "a,b,c", None).unwrap();
        assert_eq!(position, 0);
    }

    #[test]
    fn partial_windows_find_a_fragment() {
        let locator = LineBasedLocator::new("The quick brown fox");
        let position = locator.find_snippet_in_line(0, "zzzquick", None).unwrap();
        assert_eq!(position, 4);
    }

    #[test]
    fn context_prefers_the_matching_occurrence() {
        let locator =
            LineBasedLocator::new("First \u{201C}quote\u{201D} about cats, second \u{201C}quote\u{201D} about paradigms.");
        let line = locator.lines()[0].clone();
        let with_hint = locator
            .find_snippet_in_line(0, "\"quote\"", Some("paradigms"))
            .unwrap();
        let without_hint = locator.find_snippet_in_line(0, "\"quote\"", None).unwrap();
        assert!(with_hint > without_hint);
        assert_eq!(&line[with_hint..with_hint + "\u{201C}quote\u{201D}".len()], "\u{201C}quote\u{201D}");
    }
}
