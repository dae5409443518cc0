pub mod client;
pub mod models;
pub mod prompts;

pub use client::{openrouter_user, parse_structured_content, ClientOptions, OpenRouterClient};
pub use models::{Usage, DEFAULT_ANALYSIS_MODELS};
