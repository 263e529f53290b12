//! LLM-backed implementation of the research loop's reasoning service.

mod error;
mod model;
mod openai;
pub mod prompt;
mod provider;

pub use error::AgentError;
pub use model::LlmResearchModel;
pub use openai::OpenAiProvider;
pub use provider::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, Role};
