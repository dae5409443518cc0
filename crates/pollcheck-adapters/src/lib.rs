//! Runtime adapters for pollcheck (config, credentials, managed prompts).

pub mod config;
pub mod keyring;
pub mod prompt_templates;

pub use config::Config;
pub use prompt_templates::FilePromptTemplates;
