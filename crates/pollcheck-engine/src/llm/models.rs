use serde::Deserialize;

/// Backing models for poll analysis, in preference order.
///
/// OpenRouter tries the next entry when the previous one is unavailable or
/// rejects the request, so the list only needs models that honor strict
/// `json_schema` response formats.
pub const DEFAULT_ANALYSIS_MODELS: [&str; 3] = [
    "openai/gpt-4o-mini",
    "google/gemini-2.0-flash-001",
    "anthropic/claude-3.5-haiku",
];

/// OpenRouter caps the `models` fallback array.
pub const MAX_FALLBACK_MODELS: usize = 3;

pub fn default_models() -> Vec<String> {
    DEFAULT_ANALYSIS_MODELS
        .iter()
        .map(|m| m.to_string())
        .collect()
}

/// Clean a configured model list: trim, drop blanks and duplicates, cap the length.
/// Falls back to the defaults when nothing usable is left.
pub fn normalize_models(models: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for model in models {
        let trimmed = model.trim();
        if trimmed.is_empty() || out.iter().any(|m| m == trimmed) {
            continue;
        }
        out.push(trimmed.to_string());
        if out.len() == MAX_FALLBACK_MODELS {
            break;
        }
    }
    if out.is_empty() {
        default_models()
    } else {
        out
    }
}

/// API usage information from the LLM provider.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Tokens billed for the call. Some providers leave `total_tokens` at zero.
    pub fn billed_tokens(&self) -> u32 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.prompt_tokens.saturating_add(self.completion_tokens)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_models_dedupes_and_caps() {
        let models = vec![
            " a/one ".to_string(),
            "a/one".to_string(),
            "".to_string(),
            "b/two".to_string(),
            "c/three".to_string(),
            "d/four".to_string(),
        ];
        assert_eq!(normalize_models(&models), vec!["a/one", "b/two", "c/three"]);
    }

    #[test]
    fn test_normalize_models_falls_back_to_defaults() {
        assert_eq!(normalize_models(&["  ".to_string()]), default_models());
        assert_eq!(normalize_models(&[]), default_models());
    }

    #[test]
    fn test_usage_billed_tokens_sums_when_total_missing() {
        let usage: Usage =
            serde_json::from_str(r#"{"prompt_tokens": 120, "completion_tokens": 30}"#).unwrap();
        assert_eq!(usage.billed_tokens(), 150);

        let usage: Usage = serde_json::from_str(
            r#"{"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 9}"#,
        )
        .unwrap();
        assert_eq!(usage.billed_tokens(), 9);
    }
}
