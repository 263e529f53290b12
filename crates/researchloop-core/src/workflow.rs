use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ResearchError;
use crate::model::{Answer, Critique, HistoryEntry};
use crate::services::{ResearchModel, UserPrompt};
use crate::state::{RelevancePolicy, ResearchRun, RunLimits};
use crate::tasks::{advance, Stage, StepContext};
use crate::toolbox::ToolDispatcher;
use crate::trace::{TraceCollector, TraceEvent, TraceSummary};

/// Entry point: answers one question per call through the bounded research loop.
#[derive(Clone)]
pub struct ResearchAgent {
    model: Arc<dyn ResearchModel>,
    prompt: Option<Arc<dyn UserPrompt>>,
    tools: ToolDispatcher,
    limits: RunLimits,
}

impl std::fmt::Debug for ResearchAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchAgent")
            .field("interactive", &self.prompt.is_some())
            .field("tools", &self.tools)
            .field("limits", &self.limits)
            .finish()
    }
}

#[derive(Default)]
pub struct ResearchAgentBuilder {
    model: Option<Arc<dyn ResearchModel>>,
    prompt: Option<Arc<dyn UserPrompt>>,
    tools: ToolDispatcher,
    limits: RunLimits,
}

impl ResearchAgentBuilder {
    pub fn model(mut self, model: Arc<dyn ResearchModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn user_prompt(mut self, prompt: Arc<dyn UserPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn tools(mut self, tools: ToolDispatcher) -> Self {
        self.tools = tools;
        self
    }

    pub fn limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn max_react_loops(mut self, max: u32) -> Self {
        self.limits.max_react_loops = max;
        self
    }

    pub fn max_answer_attempts(mut self, max: u32) -> Self {
        self.limits.max_answer_attempts = max;
        self
    }

    pub fn relevance_policy(mut self, policy: RelevancePolicy) -> Self {
        self.limits.relevance_policy = policy;
        self
    }

    pub fn service_timeout(mut self, timeout: Duration) -> Self {
        self.limits.service_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ResearchAgent, ResearchError> {
        let model = self.model.ok_or_else(|| {
            ResearchError::InvalidConfiguration("a research model is required".into())
        })?;
        validate_limits(&self.limits)?;
        Ok(ResearchAgent {
            model,
            prompt: self.prompt,
            tools: self.tools,
            limits: self.limits,
        })
    }
}

fn validate_limits(limits: &RunLimits) -> Result<(), ResearchError> {
    if limits.max_react_loops == 0 {
        return Err(ResearchError::InvalidConfiguration(
            "max_react_loops must be at least 1".into(),
        ));
    }
    if limits.max_answer_attempts == 0 {
        return Err(ResearchError::InvalidConfiguration(
            "max_answer_attempts must be at least 1".into(),
        ));
    }
    if limits.service_timeout.is_zero() {
        return Err(ResearchError::InvalidConfiguration(
            "service timeout must be non-zero".into(),
        ));
    }
    Ok(())
}

/// Options for a single research run.
#[derive(Debug, Clone)]
pub struct ResearchOptions<'a> {
    pub question: &'a str,
    pub clarification: Option<String>,
    pub run_id: Option<String>,
    pub limits: Option<RunLimits>,
}

impl<'a> ResearchOptions<'a> {
    pub fn new(question: &'a str) -> Self {
        Self {
            question,
            clarification: None,
            run_id: None,
            limits: None,
        }
    }

    pub fn with_clarification(mut self, answer: impl Into<String>) -> Self {
        self.clarification = Some(answer.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Override the agent's limits for this run only.
    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Everything a caller may want to inspect after a run.
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub run_id: String,
    pub question: String,
    pub output: String,
    pub answer: Option<Answer>,
    pub critique: Option<Critique>,
    pub react_loops: u32,
    pub answer_attempts: u32,
    pub evidence_count: usize,
    pub tool_calls: u32,
    pub history: Vec<HistoryEntry>,
    pub trace: Vec<TraceEvent>,
}

impl ResearchOutcome {
    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.trace)
    }

    pub fn accepted(&self) -> bool {
        self.critique.as_ref().is_some_and(|critique| critique.is_good)
    }
}

impl ResearchAgent {
    pub fn builder() -> ResearchAgentBuilder {
        ResearchAgentBuilder::default()
    }

    pub fn limits(&self) -> RunLimits {
        self.limits
    }

    /// Answer `question`, returning the rendered answer text.
    pub async fn run(&self, question: &str, clarification: Option<&str>) -> String {
        let mut options = ResearchOptions::new(question);
        if let Some(answer) = clarification {
            options = options.with_clarification(answer);
        }
        self.run_with_options(options).await.output
    }

    #[instrument(name = "research.run", skip(self, options), fields(run_id = tracing::field::Empty))]
    pub async fn run_with_options(&self, options: ResearchOptions<'_>) -> ResearchOutcome {
        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::Span::current().record("run_id", run_id.as_str());

        let limits = options.limits.unwrap_or(self.limits);
        let ctx = StepContext {
            model: self.model.as_ref(),
            prompt: self.prompt.as_deref(),
            tools: &self.tools,
            limits,
        };

        info!(question = %options.question, "research run started");
        let mut trace = TraceCollector::new();
        let mut run = ResearchRun::new(options.question, options.clarification);
        let mut stage = Stage::Clarify;

        while stage != Stage::Done {
            let transition = advance(stage, run, &ctx).await;
            trace.record(stage.id(), transition.note);
            stage = transition.next;
            run = transition.run;
        }

        let output = format_final_output(&run);
        info!(
            react_loops = run.react_loop(),
            attempts = run.answer_attempt(),
            evidence = run.accumulated_results().len(),
            "research run finished"
        );

        ResearchOutcome {
            run_id,
            question: run.question().to_string(),
            output,
            answer: run.answer().cloned(),
            critique: run.critique().cloned(),
            react_loops: run.react_loop(),
            answer_attempts: run.answer_attempt(),
            evidence_count: run.accumulated_results().len(),
            tool_calls: run.tool_calls(),
            history: run.history().to_vec(),
            trace: trace.into_events(),
        }
    }
}

/// Render the caller-facing text for a finished run.
pub fn format_final_output(run: &ResearchRun) -> String {
    match run.answer().filter(|answer| !answer.cited_text.trim().is_empty()) {
        Some(answer) => {
            let mut output = answer.cited_text.clone();
            let lines = answer.citation_lines();
            if !lines.is_empty() {
                output.push_str("\n\nReferences:\n");
                let rendered: Vec<String> = lines.iter().map(|line| format!("- {line}")).collect();
                output.push_str(&rendered.join("\n"));
            }
            output
        }
        None => match run.critique() {
            Some(critique) => format!("Agent stopped. Reason: {}", critique.critique),
            None => "Agent finished, but no final answer was generated.".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Clarification, FilteredItem, Observation, ProposedAction, Reference};
    use crate::services::ReasonRequest;
    use anyhow::Result;
    use async_trait::async_trait;

    struct FinishModel;

    #[async_trait]
    impl ResearchModel for FinishModel {
        async fn clarify(&self, _question: &str) -> Result<Clarification> {
            Ok(Clarification::default())
        }

        async fn reason_act(&self, _request: ReasonRequest<'_>) -> Result<ProposedAction> {
            Ok(ProposedAction {
                finish: Some(true),
                ..Default::default()
            })
        }

        async fn filter_results(
            &self,
            _question: &str,
            _observations: &[Observation],
        ) -> Result<Vec<FilteredItem>> {
            Ok(Vec::new())
        }

        async fn answer_question(&self, _question: &str, _context: &[FilteredItem]) -> Result<Answer> {
            unreachable!("no evidence is ever gathered")
        }

        async fn critique_answer(&self, _question: &str, _answer_text: &str) -> Result<Critique> {
            Ok(Critique {
                is_good: true,
                critique: "fine".into(),
                missing_info: String::new(),
            })
        }
    }

    #[test]
    fn final_output_lists_sorted_references() {
        let mut run = ResearchRun::new("q", None);
        run.set_answer(Answer {
            cited_text: "Bitcoin trades near $60,000 [1][2].".into(),
            references: vec![
                Reference {
                    index: 2,
                    source: "B".into(),
                },
                Reference {
                    index: 1,
                    source: "A".into(),
                },
                Reference {
                    index: 3,
                    source: String::new(),
                },
            ],
        });

        insta::assert_snapshot!(format_final_output(&run), @r"
        Bitcoin trades near $60,000 [1][2].

        References:
        - [1] A
        - [2] B
        ");
    }

    #[test]
    fn final_output_fallbacks() {
        let mut run = ResearchRun::new("q", None);
        assert_eq!(
            format_final_output(&run),
            "Agent finished, but no final answer was generated."
        );

        run.set_critique(Critique {
            is_good: false,
            critique: "No answer was generated.".into(),
            missing_info: String::new(),
        });
        assert_eq!(
            format_final_output(&run),
            "Agent stopped. Reason: No answer was generated."
        );

        run.set_answer(Answer::uncited("Plain answer."));
        assert_eq!(format_final_output(&run), "Plain answer.");
    }

    #[test]
    fn builder_rejects_missing_model_and_zero_bounds() {
        let err = ResearchAgent::builder().build().unwrap_err();
        assert!(matches!(err, ResearchError::InvalidConfiguration(_)));

        let err = ResearchAgent::builder()
            .model(Arc::new(FinishModel))
            .max_react_loops(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_react_loops"));
    }

    #[tokio::test]
    async fn immediate_finish_yields_canned_answer_and_trace() {
        let agent = ResearchAgent::builder()
            .model(Arc::new(FinishModel))
            .build()
            .expect("agent");

        let outcome = agent
            .run_with_options(ResearchOptions::new("Anything?").with_run_id("run-1"))
            .await;

        assert_eq!(outcome.run_id, "run-1");
        assert_eq!(
            outcome.output,
            "I could not find enough information to answer the question."
        );
        assert!(outcome.accepted());
        let stages: Vec<&str> = outcome.trace.iter().map(|e| e.task_id.as_str()).collect();
        assert_eq!(stages, ["clarify", "reason", "generate_answer", "critique"]);
    }
}
