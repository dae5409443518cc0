//! Configuration management for pollcheck
//!
//! Stores settings in ~/.config/pollcheck/config.json. Every field is optional;
//! anything left unset falls back to the engine defaults.

use crate::keyring;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
const MAX_TEMPERATURE: f32 = 2.0;
const MAX_ATTEMPTS_CAP: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ordered list of acceptable models; the first is preferred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    pub prompt_templates_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_templates_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openrouter_user_id: Option<String>,
}

impl Config {
    fn sanitize(&mut self) {
        if let Some(models) = self.models.take() {
            let models: Vec<String> = models
                .into_iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if !models.is_empty() {
                self.models = Some(models);
            }
        }
        self.temperature = self
            .temperature
            .filter(|t| t.is_finite())
            .map(|t| t.clamp(0.0, MAX_TEMPERATURE));
        self.max_tokens = self.max_tokens.filter(|t| *t > 0);
        self.max_attempts = self.max_attempts.map(|a| a.clamp(1, MAX_ATTEMPTS_CAP));
        if let Some(raw) = self.api_base_url.take() {
            match url::Url::parse(raw.trim()) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                    self.api_base_url = Some(parsed.to_string());
                }
                _ => {
                    tracing::warn!(
                        event = "config.invalid_api_base_url",
                        value = %raw,
                        "ignoring api_base_url; expected an http(s) URL"
                    );
                }
            }
        }
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pollcheck"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk (plus environment overrides), or return default
    pub fn load() -> Self {
        let mut config = Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.sanitize();
        config
    }

    /// Load a config file. Missing files yield defaults; corrupt files are
    /// moved aside so the next save starts clean.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str::<Config>(&content) {
            Ok(mut config) => {
                config.sanitize();
                config
            }
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    event = "config.corrupt",
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Environment variables win over the file. `lookup` is injectable for tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(models) = lookup("POLLCHECK_MODELS") {
            self.models = Some(models.split(',').map(str::to_string).collect());
        }
        if let Some(attempts) = lookup("POLLCHECK_MAX_ATTEMPTS")
            .and_then(|value| value.trim().parse::<u32>().ok())
        {
            self.max_attempts = Some(attempts);
        }
        if let Some(flag) = lookup("POLLCHECK_PROMPT_TEMPLATES") {
            self.prompt_templates_enabled = matches!(
                flag.trim().to_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
    }

    /// Persist the anonymous OpenRouter user id without writing env overrides to disk.
    pub fn remember_openrouter_user_id(&mut self, id: &str) -> Result<(), String> {
        self.openrouter_user_id = Some(id.to_string());
        let mut on_disk = Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        on_disk.openrouter_user_id = Some(id.to_string());
        on_disk.save()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), String> {
        let dir =
            Self::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&dir, fs::Permissions::from_mode(0o700)) {
                tracing::warn!(error = %e, "failed to set config directory permissions");
            }
        }

        self.save_to(&dir.join("config.json"))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let mut sanitized = self.clone();
        sanitized.sanitize();
        let content = serde_json::to_string_pretty(&sanitized)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        #[cfg(unix)]
        {
            write_config_atomic(path, &content)
                .map_err(|e| format!("Failed to write config: {}", e))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))?;
        }

        Ok(())
    }

    /// Directory holding managed prompt templates.
    pub fn templates_dir(&self) -> Option<PathBuf> {
        self.prompt_templates_dir
            .clone()
            .or_else(|| Self::config_dir().map(|p| p.join("prompts")))
    }

    /// Get the OpenRouter API key (keyring first, environment fallback).
    pub fn get_api_key(&self) -> Option<String> {
        match keyring::get_api_key() {
            Ok(Some(key)) => return Some(key),
            Ok(None) => {}
            Err(err) => keyring::warn_keychain_error_once("API key", &err),
        }
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// Set the API key and read it back to confirm it persisted.
    pub fn set_api_key(&self, key: &str) -> Result<(), String> {
        keyring::set_api_key(key).map_err(|e| {
            format!(
                "Failed to store API key in {}: {}. \
                 You can set the {} environment variable instead.",
                keyring::credentials_store_label(),
                e,
                API_KEY_ENV
            )
        })?;

        match keyring::get_api_key() {
            Ok(Some(stored_key)) if stored_key == key => Ok(()),
            Ok(_) => Err(format!(
                "API key verification failed: key was not persisted to {}. \
                 You can set the {} environment variable instead.",
                keyring::credentials_store_label(),
                API_KEY_ENV
            )),
            Err(read_err) => Err(format!(
                "API key verification failed: couldn't read back from {} ({}).",
                keyring::credentials_store_label(),
                read_err
            )),
        }
    }

    /// Validate API key format.
    pub fn validate_api_key_format(key: &str) -> bool {
        let key = key.trim();
        !key.is_empty() && key.starts_with("sk-or-")
    }
}

/// Interactive prompt to set up the API key
pub fn setup_api_key_interactive() -> Result<String, String> {
    use std::io::{self, Write};

    println!();
    println!("  pollcheck setup");
    println!();
    println!("  pollcheck sends poll text to OpenRouter to flag biased or");
    println!("  ungrammatical wording. Create a key at https://openrouter.ai/keys");
    println!();
    println!(
        "  We'll store it in your {}.",
        keyring::credentials_store_label()
    );
    println!("  Prefer env vars? Set {} and rerun.", API_KEY_ENV);
    println!();
    print!("  API Key: ");
    io::stdout().flush().map_err(|e| e.to_string())?;

    let mut key = String::new();
    io::stdin().read_line(&mut key).map_err(|e| e.to_string())?;
    let key = key.trim().to_string();

    if key.is_empty() {
        return Err("No API key provided".to_string());
    }

    if !Config::validate_api_key_format(&key) {
        println!();
        println!("  Warning: Key doesn't look like an OpenRouter key (usually starts with sk-or-)");
        println!("     Saving anyway...");
    }

    Config::load().set_api_key(&key)?;

    println!();
    println!("  + API key saved to {}", keyring::credentials_store_label());
    println!();

    Ok(key)
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(unix)]
fn write_config_atomic(path: &Path, content: &str) -> Result<(), String> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::PermissionsExt;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| e.to_string())?;

    if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
        tracing::warn!(error = %e, "failed to set temp config file permissions");
    }

    file.write_all(content.as_bytes())
        .map_err(|e| e.to_string())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}
