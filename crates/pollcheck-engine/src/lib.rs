//! Poll-text analysis engine: the OpenRouter completion client and the
//! orchestrator that turns model output into resolved spans.

pub mod analysis;
pub mod error;
pub mod llm;

pub use analysis::{
    classify_attempt_error, AnalysisDiagnostics, AnalysisOutcome, AnalyzerConfig,
    AttemptDiagnostics, AttemptErrorClass, AttemptOutcome, PollTextAnalyzer, PromptSource,
};
pub use error::AnalysisError;
pub use llm::{ClientOptions, OpenRouterClient};
