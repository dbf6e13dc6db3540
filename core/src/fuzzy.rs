//! Bounded approximate-substring search.
//!
//! A sliding-window search scored with Damerau-Levenshtein distance.
//! Windows are always sliced from the original haystack; transforms apply
//! to the comparison copies only, so reported ranges are valid byte offsets
//! into the haystack exactly as the caller provided it.

use strsim::damerau_levenshtein;
use tracing::trace;

use crate::normalize;

/// Comparison-space transform applied to both window and needle before
/// scoring. The window itself is never returned in transformed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Verbatim,
    Punctuation,
    FoldCase,
}

impl Variant {
    fn apply(self, text: &str) -> String {
        match self {
            Variant::Verbatim => text.to_string(),
            Variant::Punctuation => normalize::normalize_unicode_punctuation(text),
            Variant::FoldCase => text.to_lowercase(),
        }
    }
}

/// Tolerance for one approximate search: a single-character error of any
/// kind (substitution, transposition, insertion, deletion) per needle
/// token, plus a bounded run of extra characters between tokens.
#[derive(Debug, Clone, Copy)]
pub struct FuzzyBudget {
    pub edits_per_token: usize,
    pub max_token_gap: usize,
}

impl Default for FuzzyBudget {
    fn default() -> Self {
        Self {
            edits_per_token: 1,
            max_token_gap: 2,
        }
    }
}

impl FuzzyBudget {
    /// Total edits tolerated for a needle. Capped against the needle length
    /// so short needles stay strict.
    fn allowed_edits(&self, needle: &str) -> usize {
        let chars = needle.chars().count();
        let tokens = needle.split_whitespace().count().max(1);
        (tokens * self.edits_per_token + self.max_token_gap).min(chars / 4)
    }

    fn window_span(&self, needle_chars: usize) -> (usize, usize) {
        let shortest = needle_chars.saturating_sub(self.edits_per_token).max(1);
        let longest = needle_chars + self.edits_per_token + self.max_token_gap;
        (shortest, longest)
    }
}

/// Find approximate occurrences of `needle` in `haystack`.
///
/// Ranges are byte offsets into `haystack` as passed, ordered by position,
/// with overlapping candidates collapsed to the lowest-distance window. An
/// empty result means nothing fit the budget; it is never an error.
pub fn find_fuzzy_ranges(
    haystack: &str,
    needle: &str,
    variant: Variant,
    budget: FuzzyBudget,
) -> Vec<(usize, usize)> {
    if haystack.is_empty() || needle.trim().is_empty() {
        return Vec::new();
    }
    let needle_cmp = variant.apply(needle);
    let needle_chars: Vec<char> = needle.chars().collect();
    let allowed = budget.allowed_edits(&needle_cmp);
    let (mut shortest, mut longest) = budget.window_span(needle_cmp.chars().count());
    if variant == Variant::Punctuation {
        // ellipsis canonicalization changes char counts; give punctuation
        // windows one ellipsis of slack each way
        shortest = shortest.saturating_sub(2).max(1);
        longest += 2;
    }

    let boundaries: Vec<usize> = haystack
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(haystack.len()))
        .collect();
    let hay_chars: Vec<char> = haystack.chars().collect();
    let total = hay_chars.len();
    if total < shortest {
        return Vec::new();
    }

    // window sizes tried nearest the needle length first, so ties resolve
    // to the span closest to what was asked for
    let needle_len = needle_cmp.chars().count();
    let mut sizes: Vec<usize> = (shortest..=longest).collect();
    sizes.sort_by_key(|&size| (size.abs_diff(needle_len), size));

    let mut candidates: Vec<(usize, usize, usize)> = Vec::new();
    for pos in 0..total {
        if total - pos < shortest {
            break;
        }
        if !head_aligned(&hay_chars, pos, &needle_chars) {
            continue;
        }
        let mut best: Option<(usize, usize)> = None;
        for &window in &sizes {
            if window > total - pos {
                continue;
            }
            let slice = &haystack[boundaries[pos]..boundaries[pos + window]];
            let distance = damerau_levenshtein(&variant.apply(slice), &needle_cmp);
            if distance <= allowed && best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, window));
            }
        }
        if let Some((distance, window)) = best {
            trace!(distance, window, position = boundaries[pos], "fuzzy window accepted");
            candidates.push((boundaries[pos], boundaries[pos + window], distance));
        }
    }

    let mut ranges: Vec<(usize, usize, usize)> = Vec::new();
    for candidate in candidates {
        match ranges.last_mut() {
            Some(last) if candidate.0 < last.1 => {
                if candidate.2 < last.2 {
                    *last = candidate;
                }
            }
            _ => ranges.push(candidate),
        }
    }
    ranges.into_iter().map(|(start, end, _)| (start, end)).collect()
}

/// A viable match must stay aligned within one edit at its head; this keeps
/// the scan from running the full distance computation at every offset.
/// Head characters are case-folded and quote-canonicalized before comparing.
fn head_aligned(hay: &[char], pos: usize, needle: &[char]) -> bool {
    let first_needle = head_char(needle[0]);
    if head_char(hay[pos]) == first_needle {
        return true;
    }
    let second_hay = hay.get(pos + 1).map(|&ch| head_char(ch));
    let second_needle = needle.get(1).map(|&ch| head_char(ch));
    second_hay == Some(first_needle) || second_needle == Some(head_char(hay[pos]))
}

fn head_char(ch: char) -> char {
    let folded = ch.to_lowercase().next().unwrap_or(ch);
    normalize::canonical_quote(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_range(haystack: &str, needle: &str, variant: Variant) -> Option<(usize, usize)> {
        find_fuzzy_ranges(haystack, needle, variant, FuzzyBudget::default())
            .into_iter()
            .next()
    }

    #[test]
    fn finds_verbatim_substring() {
        let haystack = "The quick brown fox jumps over the lazy dog.";
        let range = first_range(haystack, "brown fox", Variant::Verbatim).unwrap();
        assert_eq!(&haystack[range.0..range.1], "brown fox");
    }

    #[test]
    fn tolerates_a_substitution() {
        let haystack = "The quick brawn fox jumps over the lazy dog.";
        let range = first_range(haystack, "quick brown fox", Variant::Verbatim).unwrap();
        assert_eq!(&haystack[range.0..range.1], "quick brawn fox");
    }

    #[test]
    fn tolerates_a_transposition() {
        let haystack = "The quick brwon fox jumps over the lazy dog.";
        let range = first_range(haystack, "quick brown fox", Variant::Verbatim).unwrap();
        assert_eq!(&haystack[range.0..range.1], "quick brwon fox");
    }

    #[test]
    fn rejects_over_budget_needles() {
        let haystack = "The quick brown fox jumps over the lazy dog.";
        assert!(find_fuzzy_ranges(
            haystack,
            "zzqqxxyyzz",
            Variant::Verbatim,
            FuzzyBudget::default()
        )
        .is_empty());
    }

    #[test]
    fn fold_case_variant_ignores_case() {
        let haystack = "SHOUTING IN THE HALLWAY again";
        let range = first_range(haystack, "shouting in the hallway", Variant::FoldCase).unwrap();
        assert_eq!(&haystack[range.0..range.1], "SHOUTING IN THE HALLWAY");
    }

    #[test]
    fn punctuation_variant_spans_ellipsis_shrink() {
        let haystack = "wait\u{2026} what now";
        let range = first_range(haystack, "wait... what", Variant::Punctuation).unwrap();
        assert_eq!(&haystack[range.0..range.1], "wait\u{2026} what");
    }

    #[test]
    fn overlapping_candidates_collapse_to_best() {
        let haystack = "she wrote \u{201C}Hi there,\u{201D} and left";
        let range = first_range(haystack, "\"Hi there,\"", Variant::Verbatim).unwrap();
        assert_eq!(&haystack[range.0..range.1], "\u{201C}Hi there,\u{201D}");
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        assert!(find_fuzzy_ranges("", "abc", Variant::Verbatim, FuzzyBudget::default()).is_empty());
        assert!(find_fuzzy_ranges("abc", "  ", Variant::Verbatim, FuzzyBudget::default()).is_empty());
    }
}
