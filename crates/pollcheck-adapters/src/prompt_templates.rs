//! File-backed prompt templates.
//!
//! A template lives at `<dir>/<prompt_key>.toml`:
//!
//! ```toml
//! [[messages]]
//! role = "system"
//! content = "You review poll questions..."
//!
//! [[messages]]
//! role = "user"
//! content = "{{pollText}}"
//! ```
//!
//! `{{name}}` placeholders are filled from [`PromptVariables`] using their
//! camelCase field names. Unknown placeholders are left as written.

use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use pollcheck_core::{BoxFuture, ChatMessage, PromptTemplateSource, PromptVariables, Role};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    messages: Vec<TemplateMessage>,
}

#[derive(Debug, Deserialize)]
struct TemplateMessage {
    role: Role,
    content: String,
}

#[derive(Debug, Clone)]
pub struct FilePromptTemplates {
    dir: PathBuf,
    enabled: bool,
}

impl FilePromptTemplates {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
        }
    }

    /// Build from user config. Returns `None` when no template directory can be resolved.
    pub fn from_config(config: &Config) -> Option<Self> {
        let dir = config.templates_dir()?;
        Some(Self::new(dir, config.prompt_templates_enabled))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn template_path(&self, prompt_key: &str) -> Result<PathBuf> {
        let valid = !prompt_key.is_empty()
            && prompt_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !prompt_key.starts_with('.');
        if !valid {
            return Err(anyhow!("Invalid prompt key '{}'", prompt_key));
        }
        Ok(self.dir.join(format!("{}.toml", prompt_key)))
    }

    fn load(&self, prompt_key: &str, variables: &PromptVariables) -> Result<Vec<ChatMessage>> {
        let path = self.template_path(prompt_key)?;
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read prompt template {}", path.display()))?;
        let file: TemplateFile = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse prompt template {}", path.display()))?;
        if file.messages.is_empty() {
            return Err(anyhow!(
                "Prompt template {} has no messages",
                path.display()
            ));
        }

        let values = placeholder_values(variables)?;
        Ok(file
            .messages
            .into_iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: substitute(&m.content, &values),
            })
            .collect())
    }
}

impl PromptTemplateSource for FilePromptTemplates {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn render<'a>(
        &'a self,
        prompt_key: &'a str,
        _fallback: &'a [ChatMessage],
        variables: &'a PromptVariables,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>>> {
        Box::pin(async move {
            let messages = self.load(prompt_key, variables)?;
            tracing::debug!(
                event = "prompt_template.rendered",
                prompt_key,
                messages = messages.len(),
                "rendered managed prompt template"
            );
            Ok(messages)
        })
    }
}

fn placeholder_values(variables: &PromptVariables) -> Result<Vec<(String, String)>> {
    let value = serde_json::to_value(variables)?;
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("Prompt variables must serialize to an object"))?;
    Ok(object
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (format!("{{{{{}}}}}", k), s.to_string())))
        .collect())
}

/// Single pass, so substituted text is never re-scanned for placeholders.
fn substitute(template: &str, values: &[(String, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    'outer: while let Some(pos) = rest.find("{{") {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        for (placeholder, value) in values {
            if tail.starts_with(placeholder.as_str()) {
                out.push_str(value);
                rest = &tail[placeholder.len()..];
                continue 'outer;
            }
        }
        out.push_str("{{");
        rest = &tail[2..];
    }
    out.push_str(rest);
    out
}
