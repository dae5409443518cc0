//! Poll-text analysis: prompt selection, the bounded retry loop, and span resolution.
//!
//! Only malformed model output is retried here. Transport problems are already
//! retried inside the completion client, so any other error ends the call at once
//! as a gateway failure.

use crate::error::AnalysisError;
use crate::llm::models::{default_models, normalize_models};
use crate::llm::prompts::{build_fallback_messages, POLL_ANALYSIS_PROMPT_KEY};
use anyhow::Result;
use pollcheck_adapters::config::Config;
use pollcheck_core::spans::resolve_analysis_detailed;
use pollcheck_core::text::truncate_str;
use pollcheck_core::{
    analysis_output_schema, validate_analysis_output, AnalysisResult, ChatMessage,
    CompletionRequest, DroppedFinding, PromptTemplateSource, PromptVariables, SchemaViolation,
    StructuredCompletion, ANALYSIS_SCHEMA_NAME,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

const ERROR_TAIL_CHARS: usize = 240;

/// Lower-cased message fragments that mark malformed model output.
const VALIDATION_SIGNALS: [&str; 3] = [
    "failed to parse",
    "invalid response format",
    "span validation",
];

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    pub models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Sent as the OpenRouter `user` when the caller does not supply one.
    pub default_user_id: Option<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            default_user_id: None,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        Self {
            models: config
                .models
                .as_deref()
                .map(normalize_models)
                .unwrap_or(defaults.models),
            temperature: config.temperature.unwrap_or(defaults.temperature),
            max_tokens: config.max_tokens.unwrap_or(defaults.max_tokens),
            max_attempts: config
                .max_attempts
                .unwrap_or(defaults.max_attempts)
                .max(1),
            retry_delay: config
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            default_user_id: config.openrouter_user_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptErrorClass {
    /// The model answered but the output was unusable. Worth another attempt.
    Validation,
    /// Anything else: provider, network, auth. Never retried here.
    Upstream,
}

/// Decide whether a failed attempt should be retried.
///
/// Typed errors are checked first (anywhere in the context chain); the message
/// signals cover errors that only carry text, such as the client's salvage parser.
pub fn classify_attempt_error(err: &anyhow::Error) -> AttemptErrorClass {
    let typed = err
        .chain()
        .any(|cause| cause.is::<SchemaViolation>() || cause.is::<serde_json::Error>());
    if typed {
        return AttemptErrorClass::Validation;
    }

    let message = format!("{:#}", err).to_lowercase();
    if VALIDATION_SIGNALS
        .iter()
        .any(|signal| message.contains(signal))
    {
        AttemptErrorClass::Validation
    } else {
        AttemptErrorClass::Upstream
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSource {
    /// Rendered from the managed template source.
    Managed,
    /// Built-in prompt; no template source is enabled.
    Builtin,
    /// Built-in prompt after the template source failed.
    BuiltinFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Validation,
    Upstream,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptDiagnostics {
    pub attempt: u32,
    pub outcome_kind: AttemptOutcome,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_tail: Option<String>,
}

/// What happened during one `analyze_text` call. Safe to log or print.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisDiagnostics {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_source: Option<PromptSource>,
    pub attempts: Vec<AttemptDiagnostics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    pub tokens: u32,
    pub dropped_bias: Vec<DroppedFinding>,
    pub dropped_grammar: Vec<DroppedFinding>,
}

impl AnalysisDiagnostics {
    fn new(request_id: String) -> Self {
        Self {
            request_id,
            prompt_source: None,
            attempts: Vec::new(),
            selected_model: None,
            tokens: 0,
            dropped_bias: Vec::new(),
            dropped_grammar: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct AnalysisOutcome {
    pub result: Result<AnalysisResult, AnalysisError>,
    pub diagnostics: AnalysisDiagnostics,
}

struct ResolvedAttempt {
    result: AnalysisResult,
    dropped_bias: Vec<DroppedFinding>,
    dropped_grammar: Vec<DroppedFinding>,
}

/// Runs poll-text analysis against a structured completion capability.
///
/// Holds configuration only, so one analyzer can serve concurrent calls.
#[derive(Clone)]
pub struct PollTextAnalyzer {
    completion: Arc<dyn StructuredCompletion>,
    templates: Option<Arc<dyn PromptTemplateSource>>,
    config: AnalyzerConfig,
}

impl PollTextAnalyzer {
    pub fn new(completion: Arc<dyn StructuredCompletion>) -> Self {
        Self {
            completion,
            templates: None,
            config: AnalyzerConfig::default(),
        }
    }

    pub fn with_templates(mut self, templates: Arc<dyn PromptTemplateSource>) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    /// Analyze `poll_text` and return its bias and grammar spans plus a neutral rewrite.
    pub async fn analyze_text(
        &self,
        poll_text: &str,
        user_id: Option<&str>,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.analyze_text_with_diagnostics(poll_text, user_id)
            .await
            .result
    }

    pub async fn analyze_text_with_diagnostics(
        &self,
        poll_text: &str,
        user_id: Option<&str>,
    ) -> AnalysisOutcome {
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "poll_analysis",
            request_id = %request_id,
            text_chars = poll_text.chars().count()
        );
        let mut diagnostics = AnalysisDiagnostics::new(request_id);
        let result = self
            .run(poll_text, user_id, &mut diagnostics)
            .instrument(span)
            .await;
        AnalysisOutcome {
            result,
            diagnostics,
        }
    }

    async fn run(
        &self,
        poll_text: &str,
        user_id: Option<&str>,
        diagnostics: &mut AnalysisDiagnostics,
    ) -> Result<AnalysisResult, AnalysisError> {
        if poll_text.trim().is_empty() {
            tracing::debug!(event = "analysis.rejected", "empty poll text");
            return Err(AnalysisError::InvalidInput(
                "poll text must not be empty".to_string(),
            ));
        }

        let (messages, prompt_source) = self.build_messages(poll_text).await;
        diagnostics.prompt_source = Some(prompt_source);

        let request = CompletionRequest {
            messages,
            schema_name: ANALYSIS_SCHEMA_NAME.to_string(),
            schema: analysis_output_schema(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            user_id: user_id
                .map(str::to_string)
                .or_else(|| self.config.default_user_id.clone()),
            models: self.config.models.clone(),
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_validation_error = String::new();

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            let mut record = AttemptDiagnostics {
                attempt,
                outcome_kind: AttemptOutcome::Success,
                elapsed_ms: 0,
                model: None,
                tokens: 0,
                error_tail: None,
            };
            let span = tracing::info_span!("analysis_attempt", attempt, max_attempts);
            let outcome = self
                .run_attempt(&request, poll_text, &mut record)
                .instrument(span)
                .await;
            record.elapsed_ms = started.elapsed().as_millis() as u64;
            diagnostics.tokens = diagnostics.tokens.saturating_add(record.tokens);

            match outcome {
                Ok(resolved) => {
                    diagnostics.selected_model = record.model.clone();
                    diagnostics.dropped_bias = resolved.dropped_bias;
                    diagnostics.dropped_grammar = resolved.dropped_grammar;
                    diagnostics.attempts.push(record);
                    tracing::info!(
                        event = "analysis.completed",
                        attempt,
                        bias_spans = resolved.result.bias_spans.len(),
                        grammar_spans = resolved.result.grammar_spans.len(),
                        "poll analysis finished"
                    );
                    return Ok(resolved.result);
                }
                Err(err) => {
                    let message = format!("{:#}", err);
                    record.error_tail = Some(truncate_str(&message, ERROR_TAIL_CHARS).to_string());

                    match classify_attempt_error(&err) {
                        AttemptErrorClass::Validation => {
                            record.outcome_kind = AttemptOutcome::Validation;
                            diagnostics.attempts.push(record);
                            tracing::warn!(
                                event = "analysis.retry",
                                attempt,
                                max_attempts,
                                error = %truncate_str(&message, ERROR_TAIL_CHARS),
                                "model output failed validation"
                            );
                            last_validation_error = message;
                            if attempt < max_attempts {
                                tokio::time::sleep(self.config.retry_delay).await;
                            }
                        }
                        AttemptErrorClass::Upstream => {
                            record.outcome_kind = AttemptOutcome::Upstream;
                            diagnostics.attempts.push(record);
                            tracing::warn!(
                                event = "analysis.upstream_failed",
                                attempt,
                                error = %truncate_str(&message, ERROR_TAIL_CHARS),
                                "completion failed; not retrying"
                            );
                            return Err(AnalysisError::Upstream {
                                attempts: attempt,
                                message,
                            });
                        }
                    }
                }
            }
        }

        tracing::warn!(
            event = "analysis.retries_exhausted",
            attempts = max_attempts,
            "giving up on invalid model output"
        );
        Err(AnalysisError::RetriesExhausted {
            attempts: max_attempts,
            message: last_validation_error,
        })
    }

    async fn run_attempt(
        &self,
        request: &CompletionRequest,
        poll_text: &str,
        record: &mut AttemptDiagnostics,
    ) -> Result<ResolvedAttempt> {
        let response = self.completion.complete(request).await?;
        record.model = Some(response.model);
        record.tokens = response.tokens;

        let raw = validate_analysis_output(response.object)?;
        let (result, dropped_bias, dropped_grammar) = resolve_analysis_detailed(&raw, poll_text);
        Ok(ResolvedAttempt {
            result,
            dropped_bias,
            dropped_grammar,
        })
    }

    /// Chosen once per call; retries reuse the same messages.
    async fn build_messages(&self, poll_text: &str) -> (Vec<ChatMessage>, PromptSource) {
        let fallback = build_fallback_messages(poll_text);
        let Some(templates) = self.templates.as_ref().filter(|t| t.is_enabled()) else {
            return (fallback, PromptSource::Builtin);
        };

        let variables = PromptVariables {
            poll_text: poll_text.to_string(),
        };
        match templates
            .render(POLL_ANALYSIS_PROMPT_KEY, &fallback, &variables)
            .await
        {
            Ok(messages) if !messages.is_empty() => (messages, PromptSource::Managed),
            Ok(_) => {
                tracing::warn!(
                    event = "prompt_template.empty",
                    prompt_key = POLL_ANALYSIS_PROMPT_KEY,
                    "managed prompt rendered no messages; using built-in prompt"
                );
                (fallback, PromptSource::BuiltinFallback)
            }
            Err(err) => {
                tracing::warn!(
                    event = "prompt_template.failed",
                    prompt_key = POLL_ANALYSIS_PROMPT_KEY,
                    error = %format!("{:#}", err),
                    "managed prompt unavailable; using built-in prompt"
                );
                (fallback, PromptSource::BuiltinFallback)
            }
        }
    }
}
