use thiserror::Error;

/// The two failure shapes a caller of the analyzer can observe.
///
/// `Upstream` and `RetriesExhausted` are both gateway-class. They are kept
/// apart so logs and diagnostics can tell a dead provider from a model that
/// kept returning unusable output.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upstream completion failed after {attempts} attempt(s): {message}")]
    Upstream { attempts: u32, message: String },

    #[error("model output was still invalid after {attempts} attempt(s): {message}")]
    RetriesExhausted { attempts: u32, message: String },
}

impl AnalysisError {
    pub fn is_gateway(&self) -> bool {
        matches!(
            self,
            AnalysisError::Upstream { .. } | AnalysisError::RetriesExhausted { .. }
        )
    }

    /// HTTP status a web layer should answer with.
    pub fn status_code(&self) -> u16 {
        if self.is_gateway() {
            502
        } else {
            400
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::InvalidInput(_) => "invalid_input",
            AnalysisError::Upstream { .. } => "upstream",
            AnalysisError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}
