use serde::{Deserialize, Serialize};

/// A single bias or grammar issue as reported by the model.
///
/// `substring` is the model's claimed verbatim quote from the poll text. It has
/// no position information; [`crate::spans::resolve_spans`] locates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFinding {
    pub substring: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl RawFinding {
    pub fn new(substring: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            substring: substring.into(),
            reason: reason.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = normalize_suggestion(Some(suggestion.into()));
        self
    }
}

/// Blank suggestions carry no information, so they are treated as absent.
pub(crate) fn normalize_suggestion(suggestion: Option<String>) -> Option<String> {
    suggestion.filter(|s| !s.trim().is_empty())
}

/// A located finding: a half-open `[start, end)` range of `char` offsets into
/// the original, unmodified poll text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSpan {
    pub start: usize,
    pub end: usize,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ResolvedSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Half-open overlap: touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &ResolvedSpan) -> bool {
        spans_overlap(self.start, self.end, other.start, other.end)
    }

    /// The covered text, sliced by character offsets.
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        let start = crate::text::byte_offset(text, self.start)?;
        let end = crate::text::byte_offset(text, self.end)?;
        text.get(start..end)
    }
}

pub fn spans_overlap(start_a: usize, end_a: usize, start_b: usize, end_b: usize) -> bool {
    start_a < end_b && end_a > start_b
}

/// Shape-validated model output whose findings are not yet located.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnalysisOutput {
    pub bias_findings: Vec<RawFinding>,
    pub grammar_findings: Vec<RawFinding>,
    pub rewritten_text: String,
}

/// Caller-facing analysis result.
///
/// Spans in `bias_spans` and `grammar_spans` never overlap each other (across
/// both lists) and each list is sorted by `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub bias_spans: Vec<ResolvedSpan>,
    pub grammar_spans: Vec<ResolvedSpan>,
    pub rewritten_text: String,
}

impl AnalysisResult {
    pub fn all_spans(&self) -> impl Iterator<Item = &ResolvedSpan> {
        self.bias_spans.iter().chain(self.grammar_spans.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: usize, end: usize) -> ResolvedSpan {
        ResolvedSpan {
            start,
            end,
            reason: "r".to_string(),
            suggestion: None,
        }
    }

    #[test]
    fn test_touching_spans_do_not_overlap() {
        assert!(!span(0, 5).overlaps(&span(5, 9)));
        assert!(span(0, 6).overlaps(&span(5, 9)));
        assert!(span(2, 3).overlaps(&span(0, 9)));
    }

    #[test]
    fn test_blank_suggestion_is_dropped() {
        let finding = RawFinding::new("x", "y").with_suggestion("   ");
        assert_eq!(finding.suggestion, None);
        let finding = RawFinding::new("x", "y").with_suggestion("use z");
        assert_eq!(finding.suggestion.as_deref(), Some("use z"));
    }

    #[test]
    fn test_slice_uses_char_offsets() {
        let text = "café au lait";
        assert_eq!(span(5, 7).slice(text), Some("au"));
        assert_eq!(span(0, 4).slice(text), Some("café"));
        assert_eq!(span(10, 40).slice(text), None);
    }

    #[test]
    fn test_result_serializes_without_absent_suggestions() {
        let result = AnalysisResult {
            bias_spans: vec![span(0, 1)],
            grammar_spans: Vec::new(),
            rewritten_text: "ok".to_string(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value["bias_spans"][0].get("suggestion").is_none());
        assert_eq!(value["rewritten_text"], "ok");
    }
}
