use pollcheck_core::text::{char_len, normalize_whitespace};
use pollcheck_core::{resolve_analysis, resolve_spans, RawAnalysisOutput, RawFinding, ResolvedSpan};
use proptest::prelude::*;

fn finding(substring: &str) -> RawFinding {
    RawFinding::new(substring, "r")
}

fn assert_invariants(text: &str, spans: &[&ResolvedSpan]) {
    let len = char_len(text);
    for span in spans {
        assert!(span.start < span.end, "empty span {:?}", span);
        assert!(span.end <= len, "span {:?} past end {}", span, len);
    }
    for (i, a) in spans.iter().enumerate() {
        for b in spans.iter().skip(i + 1) {
            assert!(!a.overlaps(b), "{:?} overlaps {:?} in {:?}", a, b, text);
        }
    }
}

fn is_sorted(spans: &[ResolvedSpan]) -> bool {
    spans.windows(2).all(|w| w[0].start <= w[1].start)
}

/// Pick a char-aligned slice of `text`, optionally re-spacing its whitespace
/// the way a model tends to.
fn quote_from(text: &str, a: usize, b: usize, respace: bool) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let lo = lo % chars.len();
    let hi = (hi % chars.len()).max(lo) + 1;
    let quote: String = chars[lo..hi.min(chars.len())].iter().collect();
    if respace {
        normalize_whitespace(&quote)
    } else {
        quote
    }
}

#[test]
fn test_precedence_scenario() {
    let raw = RawAnalysisOutput {
        bias_findings: vec![finding("world")],
        grammar_findings: vec![finding("world")],
        rewritten_text: "hello".to_string(),
    };
    let result = resolve_analysis(&raw, "hello world");
    assert_eq!(result.bias_spans.len(), 1);
    assert_eq!(result.bias_spans[0].start, 6);
    assert_eq!(result.bias_spans[0].end, 11);
    assert!(result.grammar_spans.is_empty());
}

#[test]
fn test_grammar_can_claim_a_later_copy_of_biased_text() {
    let raw = RawAnalysisOutput {
        bias_findings: vec![finding("bad")],
        grammar_findings: vec![finding("bad")],
        rewritten_text: "x".to_string(),
    };
    let result = resolve_analysis(&raw, "bad policy, bad vote");
    assert_eq!(result.bias_spans[0].start, 0);
    assert_eq!(result.grammar_spans[0].start, 12);
}

#[test]
fn test_multiline_poll_with_model_reflowed_quote() {
    let text = "Do you support the\n   disastrous new\ttax plan,\nor not?";
    let spans = resolve_spans(&[finding("disastrous new tax plan")], text, &[]);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].slice(text), Some("disastrous new\ttax plan"));
}

proptest! {
    #[test]
    fn test_normalization_is_idempotent(s in "[a-c \t\n\u{00A0}]{0,40}") {
        let once = normalize_whitespace(&s);
        prop_assert_eq!(normalize_whitespace(&once), once);
    }

    #[test]
    fn test_exact_quotes_round_trip(
        text in "[a-d ]{1,40}",
        a in 0usize..40,
        b in 0usize..40,
    ) {
        let quote = quote_from(&text, a, b, false);
        prop_assume!(!quote.trim().is_empty() && quote.trim() == quote);
        let spans = resolve_spans(&[finding(&quote)], &text, &[]);
        prop_assert_eq!(spans.len(), 1);
        prop_assert_eq!(spans[0].slice(&text), Some(quote.as_str()));
    }

    #[test]
    fn test_resolved_analysis_upholds_invariants(
        text in "[a-cé \t\n]{0,60}",
        picks in proptest::collection::vec((0usize..60, 0usize..60, any::<bool>(), any::<bool>()), 0..10),
        noise in proptest::collection::vec("[a-z ]{0,6}", 0..3),
    ) {
        let mut bias = Vec::new();
        let mut grammar = Vec::new();
        for (a, b, respace, is_bias) in picks {
            let quote = quote_from(&text, a, b, respace);
            if is_bias { bias.push(finding(&quote)) } else { grammar.push(finding(&quote)) }
        }
        grammar.extend(noise.iter().map(|n| finding(n)));
        let raw = RawAnalysisOutput {
            bias_findings: bias,
            grammar_findings: grammar,
            rewritten_text: "rewrite".to_string(),
        };

        let result = resolve_analysis(&raw, &text);
        let all: Vec<&ResolvedSpan> = result.all_spans().collect();
        assert_invariants(&text, &all);
        prop_assert!(is_sorted(&result.bias_spans));
        prop_assert!(is_sorted(&result.grammar_spans));
        prop_assert!(result.bias_spans.len() <= raw.bias_findings.len());
        prop_assert!(result.grammar_spans.len() <= raw.grammar_findings.len());
    }

    #[test]
    fn test_seeded_spans_are_never_reclaimed(
        text in "[ab ]{1,30}",
        seed_start in 0usize..30,
        seed_len in 1usize..6,
        quotes in proptest::collection::vec("[ab ]{1,4}", 0..8),
    ) {
        let len = char_len(&text);
        prop_assume!(seed_start < len);
        let seed = ResolvedSpan {
            start: seed_start,
            end: (seed_start + seed_len).min(len),
            reason: "seed".to_string(),
            suggestion: None,
        };
        let findings: Vec<RawFinding> = quotes.iter().map(|q| finding(q)).collect();
        let spans = resolve_spans(&findings, &text, std::slice::from_ref(&seed));
        for span in &spans {
            prop_assert!(!span.overlaps(&seed));
        }
    }
}
