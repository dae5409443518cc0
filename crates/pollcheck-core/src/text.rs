//! Character-offset helpers and whitespace-tolerant matching.
//!
//! All offsets exposed by this crate count `char`s, not bytes. Rust strings
//! index by byte, so conversions live here and nowhere else.

/// Collapse every run of whitespace (spaces, tabs, newlines, any Unicode
/// whitespace) into a single ASCII space and trim both ends.
///
/// Idempotent: `normalize_whitespace(&normalize_whitespace(s)) == normalize_whitespace(s)`.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Byte index of the `char_idx`-th character. `char_idx == char count` maps to
/// `text.len()`; anything past that is `None`.
pub fn byte_offset(text: &str, char_idx: usize) -> Option<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .nth(char_idx)
}

/// Character index of a byte position that lies on a char boundary.
pub fn char_offset(text: &str, byte_idx: usize) -> usize {
    text[..byte_idx.min(text.len())].chars().count()
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Truncate a string for display (Unicode-safe)
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Locate `needle` in `text` while ignoring differences in whitespace.
///
/// Returns `[start, end)` char offsets into the *original* `text`. The match is
/// found in normalized space, mapped back by walking the original characters,
/// and then re-verified against the original so a bad back-mapping can never
/// produce a span that covers the wrong text.
pub fn find_whitespace_tolerant(text: &str, needle: &str) -> Option<(usize, usize)> {
    let normalized_needle = normalize_whitespace(needle);
    if normalized_needle.is_empty() {
        return None;
    }
    let normalized_text = normalize_whitespace(text);
    let byte_pos = normalized_text.find(&normalized_needle)?;
    let normalized_start = char_offset(&normalized_text, byte_pos);

    let original: Vec<char> = text.chars().collect();
    let start = original_offset_for(&original, normalized_start)?;
    let consumed = verify_from(&original, start, &normalized_needle)?;
    Some((start, start + consumed))
}

/// Map a position in the normalized form back to the original characters.
///
/// Leading whitespace is skipped (normalization trims it); afterwards each
/// non-whitespace character advances one normalized position and each run of
/// whitespace advances exactly one.
fn original_offset_for(original: &[char], normalized_pos: usize) -> Option<usize> {
    let mut idx = original.iter().position(|c| !c.is_whitespace())?;
    let mut pos = 0usize;
    while idx < original.len() {
        if pos == normalized_pos {
            return Some(idx);
        }
        if original[idx].is_whitespace() {
            while idx < original.len() && original[idx].is_whitespace() {
                idx += 1;
            }
        } else {
            idx += 1;
        }
        pos += 1;
    }
    None
}

/// Walk the original text from `start` against a normalized needle. A space in
/// the needle consumes all whitespace at that point. Returns the number of
/// original characters consumed.
fn verify_from(original: &[char], start: usize, normalized_needle: &str) -> Option<usize> {
    let mut idx = start;
    for ch in normalized_needle.chars() {
        if ch == ' ' {
            while idx < original.len() && original[idx].is_whitespace() {
                idx += 1;
            }
            continue;
        }
        if original.get(idx) != Some(&ch) {
            return None;
        }
        idx += 1;
    }
    (idx > start).then_some(idx - start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_runs_and_trims() {
        assert_eq!(normalize_whitespace("  a \t\n b  c "), "a b c");
        assert_eq!(normalize_whitespace(""), "");
        assert_eq!(normalize_whitespace(" \n\t "), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for s in ["", "  x", "a\u{00A0}\u{2003}b", "line one\r\nline two\t", "done"] {
            let once = normalize_whitespace(s);
            assert_eq!(normalize_whitespace(&once), once, "input {:?}", s);
        }
    }

    #[test]
    fn test_byte_offset_handles_multibyte_and_end() {
        let text = "naïve";
        assert_eq!(byte_offset(text, 0), Some(0));
        assert_eq!(byte_offset(text, 3), Some(4));
        assert_eq!(byte_offset(text, 5), Some(text.len()));
        assert_eq!(byte_offset(text, 6), None);
    }

    #[test]
    fn test_truncate_str_is_char_safe() {
        assert_eq!(truncate_str("héllo", 2), "hé");
        assert_eq!(truncate_str("hi", 10), "hi");
    }

    #[test]
    fn test_tolerant_match_spans_collapsed_whitespace() {
        assert_eq!(
            find_whitespace_tolerant("hello    world", "hello world"),
            Some((0, 14))
        );
    }

    #[test]
    fn test_tolerant_match_maps_past_leading_whitespace_and_newlines() {
        let text = "  Do you\n\n agree that   taxes are bad?";
        let (start, end) = find_whitespace_tolerant(text, "agree that taxes").unwrap();
        let slice: String = text.chars().skip(start).take(end - start).collect();
        assert_eq!(slice, "agree that   taxes");
    }

    #[test]
    fn test_tolerant_match_accepts_extra_whitespace_in_needle() {
        let text = "Is the mayor\tdoing a good job?";
        let (start, end) = find_whitespace_tolerant(text, " the   mayor doing ").unwrap();
        assert_eq!((start, end), (3, 18));
    }

    #[test]
    fn test_tolerant_match_counts_chars_not_bytes() {
        let text = "Ça  va très   bien";
        let (start, end) = find_whitespace_tolerant(text, "très bien").unwrap();
        assert_eq!((start, end), (7, 18));
    }

    #[test]
    fn test_tolerant_match_misses_absent_text() {
        assert_eq!(find_whitespace_tolerant("hello world", "goodbye"), None);
        assert_eq!(find_whitespace_tolerant("hello world", "   "), None);
        assert_eq!(find_whitespace_tolerant("   ", "a"), None);
    }
}
