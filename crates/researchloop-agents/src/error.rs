use thiserror::Error;

/// Failures talking to, or understanding, the language model.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("API key missing: set {0}")]
    ApiKeyMissing(String),

    #[error("LLM request failed: {message}")]
    ApiRequest {
        message: String,
        status: Option<u16>,
    },

    #[error("LLM request timed out after {0} s")]
    Timeout(u64),

    #[error("could not parse {function} reply: {message}")]
    InvalidResponse {
        function: &'static str,
        message: String,
        content: String,
    },
}
