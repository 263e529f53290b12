//! ResearchLoop core: a bounded reason/act/observe research loop with
//! relevance filtering, cited answer synthesis and critique-driven retry.
//!
//! The loop is an explicit state machine ([`Stage`]) driven by
//! [`ResearchAgent`]. The reasoning service, the tools and interactive input
//! are collaborators behind the traits in [`services`] and [`toolbox`].

pub mod config;
mod error;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod security;
pub mod services;
pub mod state;
pub mod tasks;
pub mod telemetry;
pub mod toolbox;
pub mod trace;
mod workflow;

pub use config::{
    Config, ConfigLoader, LlmConfig, LoggingConfig, LoopConfig, ToolsConfig, SUPPORTED_PROVIDERS,
};
pub use error::{ResearchError, ServiceFailure};
pub use logging::{RunLog, RunLogInput};
pub use metrics::{init_metrics_from_env, record_run_metrics};
pub use model::{
    Action, ActionStep, Answer, Clarification, Critique, FilteredItem, HistoryEntry, Observation,
    ProposedAction, Reference, ToolChoice, ToolKind,
};
pub use security::{optional_env, require_env, SecretValue};
pub use services::{ReasonRequest, ResearchModel, UserPrompt};
pub use state::{RelevancePolicy, ResearchRun, RunLimits};
pub use tasks::{advance, Stage, StepContext, Transition};
pub use telemetry::{init_telemetry, TelemetryOptions};
pub use toolbox::{
    LargeTransfer, MetricsProvider, MetricsReport, PageExtractor, PriceProvider, SearchHit,
    SearchProvider, ToolDispatcher, ToolError, ToolSettings, TransferProvider,
};
pub use trace::{
    persist_trace, TraceCollector, TraceEvent, TraceFormat, TraceStep, TraceSummary,
};
pub use workflow::{
    format_final_output, ResearchAgent, ResearchAgentBuilder, ResearchOptions, ResearchOutcome,
};
