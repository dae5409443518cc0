//! Turns the model's quoted substrings into validated, non-overlapping spans.
//!
//! Resolution is strictly sequential: each accepted span is added to a running
//! accumulator, and every later finding (including findings from the next
//! category) is checked against it. The first-listed finding wins a contested
//! region. Nothing here returns an error; findings that cannot be placed are
//! dropped and logged.

use crate::text::{char_len, char_offset, find_whitespace_tolerant, truncate_str};
use crate::types::{spans_overlap, AnalysisResult, RawAnalysisOutput, RawFinding, ResolvedSpan};
use serde::Serialize;

const DROP_PREVIEW_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The quote was empty after trimming.
    BlankSubstring,
    /// No exact or whitespace-tolerant occurrence exists.
    NotFound,
    /// The candidate failed the `start < end <= len` check.
    OutOfBounds,
    /// Every candidate occurrence collides with an already accepted span.
    Overlap,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::BlankSubstring => "blank_substring",
            DropReason::NotFound => "not_found",
            DropReason::OutOfBounds => "out_of_bounds",
            DropReason::Overlap => "overlap",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedFinding {
    pub finding_index: usize,
    pub reason: DropReason,
    pub preview: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanResolution {
    pub spans: Vec<ResolvedSpan>,
    pub dropped: Vec<DroppedFinding>,
}

/// Resolve `findings` against `original_text`, refusing any span that overlaps
/// one in `already_used`. The result is sorted by `start`.
pub fn resolve_spans(
    findings: &[RawFinding],
    original_text: &str,
    already_used: &[ResolvedSpan],
) -> Vec<ResolvedSpan> {
    resolve_spans_detailed(findings, original_text, already_used).spans
}

/// Same as [`resolve_spans`], also reporting which findings were dropped and why.
pub fn resolve_spans_detailed(
    findings: &[RawFinding],
    original_text: &str,
    already_used: &[ResolvedSpan],
) -> SpanResolution {
    let text_len = char_len(original_text);
    let mut claimed: Vec<(usize, usize)> =
        already_used.iter().map(|s| (s.start, s.end)).collect();
    let mut resolution = SpanResolution::default();

    for (finding_index, finding) in findings.iter().enumerate() {
        let needle = finding.substring.trim();
        match place_finding(original_text, needle, text_len, &claimed) {
            Ok((start, end)) => {
                claimed.push((start, end));
                resolution.spans.push(ResolvedSpan {
                    start,
                    end,
                    reason: finding.reason.clone(),
                    suggestion: finding.suggestion.clone(),
                });
            }
            Err(reason) => {
                let preview = truncate_str(needle, DROP_PREVIEW_CHARS).to_string();
                tracing::warn!(
                    event = "finding.dropped",
                    finding_index,
                    drop_reason = reason.as_str(),
                    finding_reason = %finding.reason,
                    preview = %preview,
                    "dropped unplaceable finding"
                );
                resolution.dropped.push(DroppedFinding {
                    finding_index,
                    reason,
                    preview,
                });
            }
        }
    }

    resolution.spans.sort_by_key(|span| span.start);
    resolution
}

/// Resolve both categories in the required order: bias first with an empty
/// seed, then grammar seeded with the bias spans so bias wins shared text.
pub fn resolve_analysis(raw: &RawAnalysisOutput, original_text: &str) -> AnalysisResult {
    resolve_analysis_detailed(raw, original_text).0
}

pub fn resolve_analysis_detailed(
    raw: &RawAnalysisOutput,
    original_text: &str,
) -> (AnalysisResult, Vec<DroppedFinding>, Vec<DroppedFinding>) {
    let bias = {
        let _span = tracing::debug_span!("resolve_spans", category = "bias").entered();
        resolve_spans_detailed(&raw.bias_findings, original_text, &[])
    };
    let grammar = {
        let _span = tracing::debug_span!("resolve_spans", category = "grammar").entered();
        resolve_spans_detailed(&raw.grammar_findings, original_text, &bias.spans)
    };
    let result = AnalysisResult {
        bias_spans: bias.spans,
        grammar_spans: grammar.spans,
        rewritten_text: raw.rewritten_text.clone(),
    };
    (result, bias.dropped, grammar.dropped)
}

fn place_finding(
    text: &str,
    needle: &str,
    text_len: usize,
    claimed: &[(usize, usize)],
) -> Result<(usize, usize), DropReason> {
    if needle.is_empty() {
        return Err(DropReason::BlankSubstring);
    }

    let (start, end) = match find_exact_unclaimed(text, needle, claimed) {
        ExactSearch::Unclaimed(span) => span,
        ExactSearch::AllClaimed => return Err(DropReason::Overlap),
        // The tolerant path takes the first normalized occurrence only; it does
        // not re-scan past a claimed one.
        ExactSearch::Absent => {
            find_whitespace_tolerant(text, needle).ok_or(DropReason::NotFound)?
        }
    };

    if start >= end || end > text_len {
        return Err(DropReason::OutOfBounds);
    }
    if overlaps_any(start, end, claimed) {
        return Err(DropReason::Overlap);
    }
    Ok((start, end))
}

enum ExactSearch {
    Unclaimed((usize, usize)),
    AllClaimed,
    Absent,
}

/// Scan exact occurrences left to right, skipping any that collide with a
/// claimed span. Occurrences may themselves overlap ("aa" in "aaa").
fn find_exact_unclaimed(text: &str, needle: &str, claimed: &[(usize, usize)]) -> ExactSearch {
    let needle_len = char_len(needle);
    let mut seen = false;
    let mut from = 0usize;

    while let Some(rel) = text.get(from..).and_then(|rest| rest.find(needle)) {
        seen = true;
        let byte_start = from + rel;
        let start = char_offset(text, byte_start);
        let end = start + needle_len;
        if !overlaps_any(start, end, claimed) {
            return ExactSearch::Unclaimed((start, end));
        }
        let step = text[byte_start..].chars().next().map_or(1, char::len_utf8);
        from = byte_start + step;
    }

    if seen {
        ExactSearch::AllClaimed
    } else {
        ExactSearch::Absent
    }
}

fn overlaps_any(start: usize, end: usize, claimed: &[(usize, usize)]) -> bool {
    claimed
        .iter()
        .any(|&(s, e)| spans_overlap(start, end, s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(substring: &str) -> RawFinding {
        RawFinding::new(substring, format!("flagged {substring}"))
    }

    fn used(start: usize, end: usize) -> ResolvedSpan {
        ResolvedSpan {
            start,
            end,
            reason: "seed".to_string(),
            suggestion: None,
        }
    }

    #[test]
    fn test_exact_match_round_trips() {
        let text = "Don't you agree the reckless council wasted money?";
        let spans = resolve_spans(&[finding("reckless council")], text, &[]);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].slice(text), Some("reckless council"));
        assert_eq!(spans[0].reason, "flagged reckless council");
    }

    #[test]
    fn test_whitespace_variant_covers_original_run() {
        let spans = resolve_spans(&[finding("hello world")], "hello    world", &[]);
        assert_eq!((spans[0].start, spans[0].end), (0, 14));
    }

    #[test]
    fn test_unlocatable_finding_is_dropped() {
        let resolution = resolve_spans_detailed(&[finding("nowhere")], "hello world", &[]);
        assert!(resolution.spans.is_empty());
        assert_eq!(resolution.dropped[0].reason, DropReason::NotFound);
    }

    #[test]
    fn test_blank_substring_is_dropped() {
        let resolution = resolve_spans_detailed(&[finding("  \n ")], "hello world", &[]);
        assert!(resolution.spans.is_empty());
        assert_eq!(resolution.dropped[0].reason, DropReason::BlankSubstring);
    }

    #[test]
    fn test_quote_is_trimmed_before_search() {
        let text = "hello world";
        let spans = resolve_spans(&[finding("  world ")], text, &[]);
        assert_eq!((spans[0].start, spans[0].end), (6, 11));
    }

    #[test]
    fn test_exact_search_skips_claimed_occurrence() {
        let text = "bad idea, bad plan";
        let spans = resolve_spans(&[finding("bad"), finding("bad")], text, &[]);
        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].start, spans[0].end), (0, 3));
        assert_eq!((spans[1].start, spans[1].end), (10, 13));
    }

    #[test]
    fn test_exact_search_drops_when_every_occurrence_is_claimed() {
        let text = "bad idea, bad plan";
        let resolution =
            resolve_spans_detailed(&[finding("bad")], text, &[used(0, 3), used(10, 13)]);
        assert!(resolution.spans.is_empty());
        assert_eq!(resolution.dropped[0].reason, DropReason::Overlap);
    }

    #[test]
    fn test_exact_rescan_considers_overlapping_occurrences() {
        let spans = resolve_spans(&[finding("aa")], "aaa", &[used(0, 1)]);
        assert_eq!((spans[0].start, spans[0].end), (1, 3));
    }

    #[test]
    fn test_tolerant_path_does_not_rescan() {
        // Only the first normalized occurrence is tried; it is claimed.
        let text = "so  bad then so\tbad";
        let resolution = resolve_spans_detailed(&[finding("so bad")], text, &[used(0, 6)]);
        assert!(resolution.spans.is_empty());
        assert_eq!(resolution.dropped[0].reason, DropReason::Overlap);
    }

    #[test]
    fn test_later_finding_overlapping_earlier_one_is_dropped() {
        let text = "the corrupt failing mayor";
        let spans = resolve_spans(
            &[finding("corrupt failing"), finding("failing mayor")],
            text,
            &[],
        );
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].slice(text), Some("corrupt failing"));
    }

    #[test]
    fn test_output_is_sorted_by_start() {
        let text = "alpha beta gamma";
        let spans = resolve_spans(&[finding("gamma"), finding("alpha"), finding("beta")], text, &[]);
        let starts: Vec<usize> = spans.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0, 6, 11]);
    }

    #[test]
    fn test_bias_wins_over_grammar_on_shared_text() {
        let raw = RawAnalysisOutput {
            bias_findings: vec![finding("world")],
            grammar_findings: vec![finding("world")],
            rewritten_text: "hello there".to_string(),
        };
        let result = resolve_analysis(&raw, "hello world");
        assert_eq!(result.bias_spans.len(), 1);
        assert_eq!((result.bias_spans[0].start, result.bias_spans[0].end), (6, 11));
        assert!(result.grammar_spans.is_empty());
        assert_eq!(result.rewritten_text, "hello there");
    }

    #[test]
    fn test_suggestion_carries_through() {
        let f = RawFinding::new("wasted", "loaded verb").with_suggestion("spent");
        let spans = resolve_spans(&[f], "they wasted it", &[]);
        assert_eq!(spans[0].suggestion.as_deref(), Some("spent"));
    }

    #[test]
    fn test_multibyte_text_uses_char_offsets() {
        let text = "¿Está de acuerdo con el pésimo alcalde?";
        let spans = resolve_spans(&[finding("pésimo")], text, &[]);
        assert_eq!((spans[0].start, spans[0].end), (24, 30));
        assert_eq!(spans[0].slice(text), Some("pésimo"));
    }
}
