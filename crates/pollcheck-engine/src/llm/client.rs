use super::models::{normalize_models, Usage};
use anyhow::{anyhow, Result};
use pollcheck_adapters::config::Config;
use pollcheck_core::text::truncate_str;
use pollcheck_core::{
    BoxFuture, ChatMessage, CompletionRequest, CompletionResponse, StructuredCompletion,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// OpenRouter API root (BYOK mode)
pub const DEFAULT_API_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Transport retry configuration
pub(crate) const MAX_RETRIES: u32 = 3;
pub(crate) const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
pub(crate) const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 60;

const RESPONSE_HEALING_PLUGIN_ID: &str = "response-healing";

/// Sanitize API response content for error messages to prevent credential leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-", // OpenRouter key prefix
    ];

    let truncated = truncate_str(content, MAX_ERROR_CONTENT_LEN);

    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(response details redacted - may contain sensitive data)".to_string();
        }
    }

    truncated.to_string()
}

fn push_unique_candidate(candidates: &mut Vec<String>, candidate: impl Into<String>) {
    let candidate = candidate.into();
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return;
    }
    if !candidates.iter().any(|existing| existing == trimmed) {
        candidates.push(trimmed.to_string());
    }
}

fn strip_markdown_fences(content: &str) -> Option<String> {
    let trimmed = content.trim();
    let without_open = trimmed.strip_prefix("```")?;
    let after_header = match without_open.find('\n') {
        Some(newline_idx) => &without_open[newline_idx + 1..],
        None => without_open,
    };
    let end_idx = after_header.rfind("```")?;
    Some(after_header[..end_idx].trim().to_string())
}

/// `{ {...} }` -> `{...}`; some models double-wrap their object.
fn unwrap_outer_wrapper(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.len() < 3 || !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    let inner = &trimmed[1..trimmed.len() - 1];
    if inner.trim_start().starts_with('{') {
        Some(inner.trim().to_string())
    } else {
        None
    }
}

fn extract_balanced_object_from(content: &str, start: usize) -> Option<String> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(content[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_object_candidates(content: &str, max_candidates: usize) -> Vec<String> {
    let mut out = Vec::new();
    for (idx, ch) in content.char_indices() {
        if out.len() >= max_candidates {
            break;
        }
        if ch == '{' {
            if let Some(candidate) = extract_balanced_object_from(content, idx) {
                push_unique_candidate(&mut out, candidate);
            }
        }
    }
    out
}

/// Parse a JSON object out of model content, salvaging fenced or wrapped output.
///
/// Only objects are accepted. A failure here means the model produced unusable
/// output, so the error message starts with "Failed to parse structured response".
pub fn parse_structured_content(content: &str) -> Result<serde_json::Value> {
    let mut candidates = Vec::new();
    push_unique_candidate(&mut candidates, content);
    if let Some(stripped) = strip_markdown_fences(content) {
        push_unique_candidate(&mut candidates, stripped);
    }

    let mut idx = 0usize;
    while idx < candidates.len() {
        let current = candidates[idx].clone();
        for extracted in extract_object_candidates(&current, 4) {
            push_unique_candidate(&mut candidates, extracted);
        }
        if let Some(unwrapped) = unwrap_outer_wrapper(&current) {
            push_unique_candidate(&mut candidates, unwrapped);
        }
        idx += 1;
    }

    let mut last_err: Option<String> = None;
    for candidate in candidates {
        match serde_json::from_str::<serde_json::Value>(&candidate) {
            Ok(value) if value.is_object() => return Ok(value),
            Ok(_) => last_err = Some("expected a JSON object".to_string()),
            Err(err) => last_err = Some(err.to_string()),
        }
    }

    Err(anyhow!(
        "Failed to parse structured response: {}\nContent: {}",
        last_err.unwrap_or_else(|| "empty content".to_string()),
        sanitize_api_response(content)
    ))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    /// OpenRouter fallback chain; the first entry mirrors `model`.
    #[serde(skip_serializing_if = "Option::is_none")]
    models: Option<&'a [String]>,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    response_format: ResponseFormat<'a>,
    plugins: Vec<PluginConfig>,
    provider: ProviderConfig,
}

/// OpenRouter provider routing preferences
///
/// See: https://openrouter.ai/docs/guides/routing/provider-selection
#[derive(Serialize)]
struct ProviderConfig {
    allow_fallbacks: bool,
    /// Only use providers that support every parameter in the request
    require_parameters: bool,
}

/// OpenRouter plugin configuration
#[derive(Serialize)]
struct PluginConfig {
    id: &'static str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaWrapper<'a>,
}

#[derive(Serialize)]
struct JsonSchemaWrapper<'a> {
    name: &'a str,
    strict: bool,
    schema: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    /// The model that actually served the request.
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    /// Null when the provider refused or errored
    #[serde(default)]
    content: Option<String>,
    /// Set when content is blocked by moderation
    #[serde(default)]
    refusal: Option<String>,
}

/// OpenRouter error response (can come with 200 status for upstream errors)
#[derive(Deserialize)]
struct OpenRouterError {
    error: OpenRouterApiError,
}

#[derive(Deserialize)]
struct OpenRouterApiError {
    message: String,
    #[serde(default)]
    code: Option<i32>,
}

fn build_chat_request<'a>(request: &'a CompletionRequest, models: &'a [String]) -> ChatRequest<'a> {
    let primary = models.first().map(String::as_str).unwrap_or_default();
    ChatRequest {
        model: primary,
        models: (models.len() > 1).then_some(models),
        messages: &request.messages,
        user: request.user_id.as_deref().filter(|u| !u.trim().is_empty()),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        stream: false,
        response_format: ResponseFormat {
            format_type: "json_schema",
            json_schema: JsonSchemaWrapper {
                name: &request.schema_name,
                strict: true,
                schema: &request.schema,
            },
        },
        plugins: vec![PluginConfig {
            id: RESPONSE_HEALING_PLUGIN_ID,
        }],
        provider: ProviderConfig {
            allow_fallbacks: true,
            require_parameters: true,
        },
    }
}

/// Stable anonymous identifier for OpenRouter's `user` field.
///
/// OpenRouter uses it for routing stickiness and caching, so it is created once
/// and kept in config.
pub fn openrouter_user(config: &mut Config) -> Option<String> {
    if cfg!(test) {
        return None;
    }
    if let Some(id) = config.openrouter_user_id.clone() {
        return Some(id);
    }
    let id = format!("pollcheck_{}", Uuid::new_v4());
    if let Err(err) = config.remember_openrouter_user_id(&id) {
        tracing::debug!(
            event = "config.save_failed",
            error = %err,
            "could not persist OpenRouter user id"
        );
    }
    Some(id)
}

/// Pull the message content out of a successful response body.
fn extract_completion(body: &str, requested_model: &str) -> Result<CompletionResponse> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        anyhow!(
            "Unexpected OpenRouter reply ({}): {}",
            e,
            sanitize_api_response(body)
        )
    })?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("OpenRouter returned no choices"))?;

    if let Some(refusal) = choice.message.refusal.filter(|r| !r.trim().is_empty()) {
        return Err(anyhow!(
            "Model refused the request: {}",
            truncate_str(&refusal, MAX_ERROR_CONTENT_LEN)
        ));
    }

    let content = choice
        .message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| anyhow!("Model returned an empty response"))?;

    let object = parse_structured_content(&content)?;
    Ok(CompletionResponse {
        object,
        tokens: parsed.usage.as_ref().map(Usage::billed_tokens).unwrap_or(0),
        model: parsed
            .model
            .unwrap_or_else(|| requested_model.to_string()),
    })
}

/// Extract retry-after hint from OpenRouter response (if present)
fn parse_retry_after(text: &str) -> Option<u64> {
    // Look for patterns like "retry after X seconds"
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

pub(crate) fn backoff_secs(retry_count: u32) -> u64 {
    let factor = BACKOFF_MULTIPLIER.saturating_pow(retry_count.saturating_sub(1));
    let secs = INITIAL_BACKOFF_MS.saturating_mul(factor) / 1000;
    secs.max(1)
}

fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn map_timeout_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        anyhow!("OpenRouter request timed out. Please try again.")
    } else if err.is_connect() {
        anyhow!("Could not connect to OpenRouter. Check your network and try again.")
    } else {
        err.into()
    }
}

/// Create a configured HTTP client for OpenRouter requests
fn create_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))
}

async fn backoff(retry_count: u32, secs: u64, reason: &str) {
    tracing::warn!(
        event = "openrouter.retry",
        retry = retry_count,
        delay_secs = secs,
        reason,
        "retrying OpenRouter request"
    );
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            max_retries: MAX_RETRIES,
        }
    }
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        Self {
            api_base_url: config
                .api_base_url
                .clone()
                .unwrap_or(defaults.api_base_url),
            request_timeout_secs: config
                .request_timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.request_timeout_secs),
            max_retries: defaults.max_retries,
        }
    }
}

/// `StructuredCompletion` backed by OpenRouter chat completions.
///
/// Transport failures (timeouts, connect errors, 429, 5xx and 200-with-error
/// bodies) are retried here with exponential backoff. Whatever still fails is
/// returned as an ordinary error, which the analyzer treats as upstream.
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    max_retries: u32,
}

impl std::fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("endpoint", &self.endpoint)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, options: ClientOptions) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(anyhow!(
                "No API key configured. Run 'pollcheck --setup' to get started."
            ));
        }
        Ok(Self {
            http: create_http_client(options.request_timeout_secs)?,
            api_key,
            endpoint: chat_completions_url(&options.api_base_url),
            max_retries: options.max_retries,
        })
    }

    /// Build a client from saved config and the stored API key.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.get_api_key().ok_or_else(|| {
            anyhow!("No API key configured. Run 'pollcheck --setup' to get started.")
        })?;
        Self::new(api_key, ClientOptions::from_config(config))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the response text on success, or an error after all retries are exhausted.
    async fn send_with_retry<T: Serialize>(&self, request_body: &T) -> Result<String> {
        let mut retry_count = 0;

        loop {
            let response = match self
                .http
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .header("HTTP-Referer", "https://github.com/cameronspears/pollcheck")
                .header("X-Title", "pollcheck")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(request_body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < self.max_retries {
                        retry_count += 1;
                        backoff(retry_count, backoff_secs(retry_count), "network").await;
                        continue;
                    }
                    return Err(map_timeout_error(err));
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < self.max_retries {
                        retry_count += 1;
                        backoff(retry_count, backoff_secs(retry_count), "network").await;
                        continue;
                    }
                    return Err(map_timeout_error(err));
                }
            };

            if status.is_success() {
                // OpenRouter sometimes returns errors with 200 status (upstream provider issues)
                if let Ok(err_resp) = serde_json::from_str::<OpenRouterError>(&text) {
                    let is_retryable = err_resp
                        .error
                        .code
                        .map(|c| c >= 500 || c == 429)
                        .unwrap_or(true);

                    if is_retryable && retry_count < self.max_retries {
                        retry_count += 1;
                        backoff(retry_count, backoff_secs(retry_count), "provider_error").await;
                        continue;
                    }

                    return Err(anyhow!(
                        "OpenRouter error: {}",
                        sanitize_api_response(&err_resp.error.message)
                    ));
                }

                return Ok(text);
            }

            if status.as_u16() == 429 && retry_count < self.max_retries {
                retry_count += 1;
                let secs = parse_retry_after(&text).unwrap_or_else(|| backoff_secs(retry_count));
                backoff(retry_count, secs, "rate_limited").await;
                continue;
            }

            if status.is_server_error() && retry_count < self.max_retries {
                retry_count += 1;
                backoff(retry_count, backoff_secs(retry_count), "server_error").await;
                continue;
            }

            let error_msg = match status.as_u16() {
                401 => "Invalid API key. Run 'pollcheck --setup' to update it.".to_string(),
                429 => format!(
                    "Rate limited by OpenRouter after {} retries. Try again in a few minutes.",
                    retry_count
                ),
                500..=599 => format!(
                    "OpenRouter server error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, sanitize_api_response(&text)),
            };
            return Err(anyhow!("{}", error_msg));
        }
    }

    async fn complete_structured(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let models = normalize_models(&request.models);
        let body = build_chat_request(request, &models);
        let text = self.send_with_retry(&body).await?;
        let response = extract_completion(&text, body.model)?;
        tracing::debug!(
            event = "openrouter.completed",
            model = %response.model,
            tokens = response.tokens,
            "structured completion finished"
        );
        Ok(response)
    }
}

impl StructuredCompletion for OpenRouterClient {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<CompletionResponse>> {
        Box::pin(self.complete_structured(request))
    }
}

fn chat_completions_url(base: &str) -> String {
    format!("{}/chat/completions", base.trim().trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollcheck_core::{analysis_output_schema, ANALYSIS_SCHEMA_NAME};

    fn request(models: &[&str], user: Option<&str>) -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("poll")],
            schema_name: ANALYSIS_SCHEMA_NAME.to_string(),
            schema: analysis_output_schema(),
            temperature: 0.3,
            max_tokens: 2000,
            user_id: user.map(str::to_string),
            models: models.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn test_chat_request_uses_strict_schema_and_fallback_models() {
        let req = request(&["a/one", "b/two"], Some("user-1"));
        let models = normalize_models(&req.models);
        let value = serde_json::to_value(build_chat_request(&req, &models)).unwrap();

        assert_eq!(value["model"], "a/one");
        assert_eq!(value["models"], serde_json::json!(["a/one", "b/two"]));
        assert_eq!(value["user"], "user-1");
        assert_eq!(value["response_format"]["type"], "json_schema");
        assert_eq!(value["response_format"]["json_schema"]["strict"], true);
        assert_eq!(
            value["response_format"]["json_schema"]["name"],
            ANALYSIS_SCHEMA_NAME
        );
        assert_eq!(value["plugins"][0]["id"], RESPONSE_HEALING_PLUGIN_ID);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn test_chat_request_omits_single_model_list_and_blank_user() {
        let req = request(&["a/one"], Some("  "));
        let models = normalize_models(&req.models);
        let value = serde_json::to_value(build_chat_request(&req, &models)).unwrap();
        assert!(value.get("models").is_none());
        assert!(value.get("user").is_none());
    }

    #[test]
    fn test_parse_structured_content_handles_extra_wrapper_braces() {
        let malformed = "{\n {\"rewritten_text\":\"hello\"}\n}";
        let parsed = parse_structured_content(malformed).unwrap();
        assert_eq!(parsed["rewritten_text"], "hello");
    }

    #[test]
    fn test_parse_structured_content_handles_markdown_fences() {
        let fenced = "```json\n{\"rewritten_text\":\"hello\"}\n```";
        let parsed = parse_structured_content(fenced).unwrap();
        assert_eq!(parsed["rewritten_text"], "hello");
    }

    #[test]
    fn test_parse_structured_content_handles_leading_prose() {
        let content = "Here you go: {\"rewritten_text\":\"a } in text\"} thanks";
        let parsed = parse_structured_content(content).unwrap();
        assert_eq!(parsed["rewritten_text"], "a } in text");
    }

    #[test]
    fn test_parse_structured_content_rejects_non_objects() {
        let err = parse_structured_content("[1, 2]").unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Failed to parse structured response"));
        assert!(parse_structured_content("not json at all").is_err());
    }

    #[test]
    fn test_extract_completion_reads_usage_and_served_model() {
        let body = r#"{
            "model": "b/two",
            "choices": [{"message": {"content": "{\"rewritten_text\": \"x\"}"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let response = extract_completion(body, "a/one").unwrap();
        assert_eq!(response.model, "b/two");
        assert_eq!(response.tokens, 15);
        assert_eq!(response.object["rewritten_text"], "x");
    }

    #[test]
    fn test_extract_completion_refusal_and_empty_content_are_errors() {
        let refused = r#"{"choices": [{"message": {"content": null, "refusal": "no"}}]}"#;
        let err = extract_completion(refused, "a/one").unwrap_err();
        assert!(err.to_string().contains("refused"));

        let empty = r#"{"choices": [{"message": {"content": "  "}}]}"#;
        let err = extract_completion(empty, "a/one").unwrap_err();
        assert!(err.to_string().contains("empty response"));

        let none = r#"{"choices": []}"#;
        assert!(extract_completion(none, "a/one").is_err());
    }

    #[test]
    fn test_sanitize_api_response_redacts_secrets() {
        assert_eq!(sanitize_api_response("plain failure"), "plain failure");
        assert!(sanitize_api_response("bad key sk-or-abc").contains("redacted"));
        let long = "x".repeat(500);
        assert_eq!(sanitize_api_response(&long).len(), MAX_ERROR_CONTENT_LEN);
    }

    #[test]
    fn test_backoff_and_retry_after() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 4);
        assert_eq!(backoff_secs(3), 8);
        assert_eq!(parse_retry_after("Please retry after 12 seconds"), Some(12));
        assert_eq!(parse_retry_after("Retry later"), None);
        assert_eq!(parse_retry_after("nothing here"), None);
    }

    #[test]
    fn test_endpoint_from_base_url() {
        assert_eq!(
            chat_completions_url("https://openrouter.ai/api/v1/"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        let client = OpenRouterClient::new("sk-or-test", ClientOptions::default()).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert!(OpenRouterClient::new(" ", ClientOptions::default()).is_err());
    }
}
