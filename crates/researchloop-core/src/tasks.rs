//! Step functions of the research state machine.
//!
//! Each step takes the run by value, performs at most one collaborator call
//! and hands the run back inside a [`Transition`] naming the next stage.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::ServiceFailure;
use crate::model::{Action, Answer, Clarification, Critique, FilteredItem, HistoryEntry, Observation};
use crate::services::{ReasonRequest, ResearchModel, UserPrompt};
use crate::state::{RelevancePolicy, ResearchRun, RunLimits};
use crate::toolbox::ToolDispatcher;

pub const INSUFFICIENT_EVIDENCE_ANSWER: &str =
    "I could not find enough information to answer the question.";
pub const LOOP_BUDGET_EXHAUSTED: &str = "loop budget exhausted";

const SUMMARY_PREVIEW_CHARS: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clarify,
    AskUser,
    Reason,
    ExecuteTool,
    FilterAndAccumulate,
    GenerateAnswer,
    Critique,
    Done,
}

impl Stage {
    pub fn id(&self) -> &'static str {
        match self {
            Stage::Clarify => "clarify",
            Stage::AskUser => "ask_user",
            Stage::Reason => "reason",
            Stage::ExecuteTool => "execute_tool",
            Stage::FilterAndAccumulate => "filter_and_accumulate",
            Stage::GenerateAnswer => "generate_answer",
            Stage::Critique => "critique",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Result of one step: where to go next, the updated run and a trace note.
#[derive(Debug)]
pub struct Transition {
    pub next: Stage,
    pub run: ResearchRun,
    pub note: String,
}

impl Transition {
    fn to(next: Stage, run: ResearchRun, note: impl Into<String>) -> Self {
        Self {
            next,
            run,
            note: note.into(),
        }
    }
}

/// Collaborators and limits shared by every step of a run.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub model: &'a dyn ResearchModel,
    pub prompt: Option<&'a dyn UserPrompt>,
    pub tools: &'a ToolDispatcher,
    pub limits: RunLimits,
}

/// Run the step for `stage`. `Done` returns the run unchanged.
pub async fn advance(stage: Stage, run: ResearchRun, ctx: &StepContext<'_>) -> Transition {
    match stage {
        Stage::Clarify => clarify(run, ctx).await,
        Stage::AskUser => ask_user(run, ctx).await,
        Stage::Reason => reason(run, ctx).await,
        Stage::ExecuteTool => execute_tool(run, ctx).await,
        Stage::FilterAndAccumulate => filter_and_accumulate(run, ctx).await,
        Stage::GenerateAnswer => generate_answer(run, ctx).await,
        Stage::Critique => critique(run, ctx).await,
        Stage::Done => Transition::to(Stage::Done, run, "finished"),
    }
}

async fn call_service<T, F>(service: &'static str, timeout: Duration, call: F) -> Result<T, ServiceFailure>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ServiceFailure::new(service, format!("{err:#}"))),
        Err(_) => Err(ServiceFailure::timeout(service, timeout.as_millis())),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(SUMMARY_PREVIEW_CHARS).collect()
}

#[instrument(name = "step.clarify", skip_all)]
pub async fn clarify(mut run: ResearchRun, ctx: &StepContext<'_>) -> Transition {
    run.reset();

    if run.clarification_answer().is_some() {
        run.set_clarification(Clarification {
            needed: true,
            question: String::new(),
        });
        info!("clarification supplied up front; skipping check");
        return Transition::to(Stage::Reason, run, "clarification supplied by caller");
    }

    let verdict = match call_service(
        "clarify",
        ctx.limits.service_timeout,
        ctx.model.clarify(run.question()),
    )
    .await
    {
        Ok(verdict) => verdict,
        Err(failure) => {
            warn!(error = %failure, "clarification check failed; assuming none needed");
            Clarification::default()
        }
    };
    run.set_clarification(verdict.clone());

    if !verdict.needed {
        return Transition::to(Stage::Reason, run, "no clarification needed");
    }
    if verdict.question.trim().is_empty() {
        warn!("clarification requested without a follow-up question");
        return Transition::to(Stage::Reason, run, "clarification requested without a question");
    }
    if ctx.prompt.is_none() {
        info!(question = %verdict.question, "no user prompt configured; continuing without clarification");
        return Transition::to(
            Stage::Reason,
            run,
            format!("clarification needed but no user prompt: {}", verdict.question),
        );
    }

    Transition::to(
        Stage::AskUser,
        run,
        format!("clarification needed: {}", verdict.question),
    )
}

#[instrument(name = "step.ask_user", skip_all)]
pub async fn ask_user(mut run: ResearchRun, ctx: &StepContext<'_>) -> Transition {
    let question = run
        .clarification()
        .map(|clarification| clarification.question.clone())
        .unwrap_or_default();

    let Some(prompt) = ctx.prompt else {
        return Transition::to(Stage::Reason, run, "no user prompt configured");
    };

    match prompt.ask(&question).await {
        Ok(reply) => {
            run.set_clarification_answer(Some(reply));
            let note = match run.clarification_answer() {
                Some(answer) => format!("user clarified: {answer}"),
                None => "user gave no clarification".to_string(),
            };
            Transition::to(Stage::Reason, run, note)
        }
        Err(err) => {
            warn!(error = %err, "user prompt failed; continuing without clarification");
            Transition::to(Stage::Reason, run, format!("user prompt failed: {err}"))
        }
    }
}

#[instrument(name = "step.reason", skip_all, fields(react_loop = run.react_loop(), attempt = run.answer_attempt()))]
pub async fn reason(mut run: ResearchRun, ctx: &StepContext<'_>) -> Transition {
    if run.has_feedback() {
        run.increment_answer_attempt();
        info!(attempt = run.answer_attempt(), "retrying with critique feedback");
    }

    let action = if run.react_loop() >= ctx.limits.max_react_loops {
        run.take_critique_feedback();
        info!(max = ctx.limits.max_react_loops, "react loop budget exhausted; finishing");
        Action::finish(LOOP_BUDGET_EXHAUSTED)
    } else {
        let feedback = run.take_critique_feedback();
        let request = ReasonRequest {
            question: run.question(),
            clarification: run.clarification_answer(),
            history: run.history(),
            critique_feedback: feedback.as_deref(),
        };
        match call_service(
            "reason_act",
            ctx.limits.service_timeout,
            ctx.model.reason_act(request),
        )
        .await
        {
            Ok(proposed) => Action::normalize(proposed),
            Err(failure) => {
                warn!(error = %failure, "reasoning failed; finishing");
                Action::finish(format!("Reasoning unavailable ({failure}); finishing."))
            }
        }
    };

    debug!(thought = %action.thought, "reasoning produced action");
    let (next, note) = if action.is_finish() {
        (Stage::GenerateAnswer, format!("finish: {}", action.thought))
    } else {
        (Stage::ExecuteTool, format!("act: {}", action.summary()))
    };
    run.set_current_action(action);
    Transition::to(next, run, note)
}

#[instrument(name = "step.execute_tool", skip_all, fields(react_loop = run.react_loop()))]
pub async fn execute_tool(mut run: ResearchRun, ctx: &StepContext<'_>) -> Transition {
    let observation = ctx.tools.execute(run.current_action()).await;
    if !observation.is_skipped() {
        run.record_tool_call();
    }

    let note = match (&observation.error, &observation.content) {
        (Some(error), _) => format!("tool error: {error}"),
        (None, Some(content)) => format!("observed {} chars", content.chars().count()),
        (None, None) => "skipped".to_string(),
    };
    run.set_current_observation(observation);
    Transition::to(Stage::FilterAndAccumulate, run, note)
}

#[instrument(name = "step.filter_and_accumulate", skip_all, fields(react_loop = run.react_loop()))]
pub async fn filter_and_accumulate(mut run: ResearchRun, ctx: &StepContext<'_>) -> Transition {
    let observation = run.take_current_observation();
    let mut kept: Vec<FilteredItem> = Vec::new();

    let summary = match observation {
        None => "No observation processed.".to_string(),
        Some(observation) if observation.is_skipped() => "No observation processed.".to_string(),
        Some(Observation {
            content: None,
            error: Some(error),
            ..
        }) => {
            debug!(%error, "tool error without content; classifier skipped");
            format!("Tool error: {error}")
        }
        Some(observation) => {
            match call_service(
                "filter_results",
                ctx.limits.service_timeout,
                ctx.model
                    .filter_results(run.question(), std::slice::from_ref(&observation)),
            )
            .await
            {
                Ok(items) if !items.is_empty() => {
                    let summary = items
                        .iter()
                        .map(|item| {
                            let mut line = format!("Relevant: {}...", preview(&item.content));
                            if let Some(source) = item.source.as_deref().filter(|s| !s.is_empty()) {
                                line.push_str(&format!(" (Source: {source})"));
                            }
                            line
                        })
                        .collect::<Vec<_>>()
                        .join("; ");
                    kept = items;
                    summary
                }
                Ok(_) => {
                    let text = observation
                        .content
                        .as_deref()
                        .or(observation.error.as_deref())
                        .unwrap_or("[No Content/Error]");
                    format!("Filtered out as irrelevant: {}...", preview(text))
                }
                Err(failure) => match ctx.limits.relevance_policy {
                    RelevancePolicy::FailClosed => {
                        warn!(error = %failure, "relevance filter failed; observation dropped");
                        format!("Error during filtering: {failure}")
                    }
                    RelevancePolicy::FailOpen => {
                        warn!(error = %failure, "relevance filter failed; keeping raw observation");
                        let content = observation.content.clone().unwrap_or_default();
                        let summary = format!(
                            "Error during filtering: {failure}; kept unfiltered: {}...",
                            preview(&content)
                        );
                        kept.push(FilteredItem::new(content, observation.source.clone()));
                        summary
                    }
                },
            }
        }
    };

    let (thought, action) = match run.current_action() {
        Some(action) => (action.thought.clone(), action.summary()),
        None => ("N/A".to_string(), "Finish".to_string()),
    };

    let kept_count = kept.len();
    run.accumulate(kept);
    run.push_history(HistoryEntry {
        thought,
        action,
        observation: summary,
    });
    run.increment_react_loop();

    info!(
        kept = kept_count,
        total = run.accumulated_results().len(),
        react_loop = run.react_loop(),
        "observation processed"
    );
    Transition::to(
        Stage::Reason,
        run,
        format!("kept {kept_count} item(s)"),
    )
}

#[instrument(name = "step.generate_answer", skip_all, fields(evidence = run.accumulated_results().len()))]
pub async fn generate_answer(mut run: ResearchRun, ctx: &StepContext<'_>) -> Transition {
    if run.accumulated_results().is_empty() {
        info!("no evidence gathered; returning canned answer");
        run.set_answer(Answer::uncited(INSUFFICIENT_EVIDENCE_ANSWER));
        return Transition::to(Stage::Critique, run, "no evidence; canned answer");
    }

    let answer = match call_service(
        "answer_question",
        ctx.limits.service_timeout,
        ctx.model
            .answer_question(run.question(), run.accumulated_results()),
    )
    .await
    {
        Ok(answer) => answer,
        Err(failure) => {
            warn!(error = %failure, "answer generation failed");
            Answer::uncited(format!("Error generating answer: {failure}"))
        }
    };

    let note = format!(
        "answer with {} reference(s)",
        answer.references.len()
    );
    run.set_answer(answer);
    Transition::to(Stage::Critique, run, note)
}

#[instrument(name = "step.critique", skip_all, fields(attempt = run.answer_attempt()))]
pub async fn critique(mut run: ResearchRun, ctx: &StepContext<'_>) -> Transition {
    let answer_text = run
        .answer()
        .map(|answer| answer.cited_text.clone())
        .unwrap_or_default();

    let (verdict, feedback) = if answer_text.trim().is_empty() {
        (
            Critique {
                is_good: false,
                critique: "No answer was generated.".to_string(),
                missing_info: "The entire answer is missing.".to_string(),
            },
            "No answer was generated. Need to retry information gathering.".to_string(),
        )
    } else {
        match call_service(
            "critique_answer",
            ctx.limits.service_timeout,
            ctx.model.critique_answer(run.question(), &answer_text),
        )
        .await
        {
            Ok(verdict) => {
                let feedback = format!(
                    "Critique: {}. Missing Info: {}",
                    verdict.critique, verdict.missing_info
                );
                (verdict, feedback)
            }
            Err(failure) => {
                warn!(error = %failure, "critique failed");
                (
                    Critique {
                        is_good: false,
                        critique: format!("Error during critique generation: {failure}"),
                        missing_info: "Unknown".to_string(),
                    },
                    format!("Error during critique: {failure}. Need to retry."),
                )
            }
        }
    };

    let is_good = verdict.is_good;
    run.set_critique(verdict);

    if run.answer_attempt() >= ctx.limits.max_answer_attempts {
        info!(is_good, attempt = run.answer_attempt(), "answer attempts exhausted; stopping");
        return Transition::to(Stage::Done, run, format!("stop (attempts exhausted, good={is_good})"));
    }
    if is_good {
        info!(attempt = run.answer_attempt(), "answer accepted");
        return Transition::to(Stage::Done, run, "answer accepted");
    }

    info!(attempt = run.answer_attempt(), "answer rejected; gathering again");
    run.set_critique_feedback(feedback.clone());
    Transition::to(Stage::Reason, run, format!("retry: {feedback}"))
}
