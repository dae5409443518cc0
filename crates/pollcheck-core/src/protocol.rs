use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Everything a structured completion call needs.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub schema_name: String,
    pub schema: serde_json::Value,
    pub temperature: f32,
    pub max_tokens: u32,
    pub user_id: Option<String>,
    /// Acceptable models in preference order. The capability picks among them.
    pub models: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Parsed JSON object. Not yet validated against the schema.
    pub object: serde_json::Value,
    pub tokens: u32,
    pub model: String,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A language-model call that returns a JSON object.
///
/// Implementations own transport concerns (timeouts, rate limits, provider
/// fallback). Any error they return is treated by callers as either a
/// malformed-output problem or an upstream failure based on its type/message.
pub trait StructuredCompletion: Send + Sync {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<CompletionResponse>>;
}

/// Values available for substitution in managed prompt templates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptVariables {
    pub poll_text: String,
}

/// Externally managed prompt text, so wording can change without a release.
pub trait PromptTemplateSource: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Render the template stored under `prompt_key`. `fallback` is the
    /// built-in message list; sources may use it as a base or ignore it.
    fn render<'a>(
        &'a self,
        prompt_key: &'a str,
        fallback: &'a [ChatMessage],
        variables: &'a PromptVariables,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_serialize_lowercase() {
        let value = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(value["role"], "system");
    }

    #[test]
    fn test_prompt_variables_use_template_key_names() {
        let value = serde_json::to_value(PromptVariables {
            poll_text: "Q".to_string(),
        })
        .unwrap();
        assert_eq!(value["pollText"], "Q");
    }
}
