use pollcheck_core::ChatMessage;

/// Key under which a managed template for poll analysis is looked up.
pub const POLL_ANALYSIS_PROMPT_KEY: &str = "poll-text-analysis";

const QUOTING_RULES: &str = r#"QUOTING:
- `substring` must be copied character-for-character from the poll text.
- Quote the shortest span that shows the issue. Never paraphrase or fix it inside `substring`.
- Do not report character offsets; they are computed from your quotes."#;

pub const POLL_ANALYSIS_SYSTEM: &str = r#"You review poll questions for a survey tool. Find wording that could bias respondents and plain grammar or spelling mistakes, then write a neutral version of the whole poll.

Return ONLY a JSON object with exactly this shape:
{
  "bias_findings": [
    {"substring": "exact quote", "reason": "why it biases respondents", "suggestion": "neutral wording"}
  ],
  "grammar_findings": [
    {"substring": "exact quote", "reason": "what is wrong", "suggestion": "corrected text or null"}
  ],
  "rewritten_text": "the full poll, neutral and grammatical"
}

RULES:
- Bias covers loaded or emotional words, leading questions, false premises, unbalanced answer options and assumptions about the respondent.
- Every bias finding MUST include `substring`, `reason` and `suggestion`.
- Grammar findings need `substring` and `reason`; `suggestion` may be null.
- A bias finding and a grammar finding must never describe the same issue. If wording is both biased and ungrammatical, report it once as bias.
- List findings in the order they appear in the poll.
- Use empty arrays when there is nothing to report.
- `rewritten_text` keeps the poll's intent, language and answer options."#;

pub fn poll_analysis_system() -> String {
    format!("{}\n\n{}", POLL_ANALYSIS_SYSTEM, QUOTING_RULES)
}

pub fn poll_analysis_user(poll_text: &str) -> String {
    format!("POLL TEXT:\n{}", poll_text)
}

/// The built-in message list used when no managed template is available.
pub fn build_fallback_messages(poll_text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(poll_analysis_system()),
        ChatMessage::user(poll_analysis_user(poll_text)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollcheck_core::Role;

    #[test]
    fn test_fallback_messages_carry_poll_text_verbatim() {
        let text = "Do you  agree\nwith the reckless plan?";
        let messages = build_fallback_messages(text);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[1].content.ends_with(text));
    }

    #[test]
    fn test_system_prompt_names_every_output_field() {
        let system = poll_analysis_system();
        for field in ["bias_findings", "grammar_findings", "rewritten_text", "suggestion"] {
            assert!(system.contains(field), "missing {field}");
        }
        assert!(system.contains("must never describe the same issue"));
    }
}
