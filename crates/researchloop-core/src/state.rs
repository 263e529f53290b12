use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::{Action, Answer, Clarification, Critique, FilteredItem, HistoryEntry, Observation};

/// What to do with an observation when the relevance classifier fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevancePolicy {
    /// Keep nothing and note the failure.
    #[default]
    FailClosed,
    /// Keep the raw observation content.
    FailOpen,
}

/// Bounds applied to a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub max_react_loops: u32,
    pub max_answer_attempts: u32,
    pub service_timeout: Duration,
    pub relevance_policy: RelevancePolicy,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_react_loops: 7,
            max_answer_attempts: 2,
            service_timeout: Duration::from_secs(60),
            relevance_policy: RelevancePolicy::FailClosed,
        }
    }
}

/// Run-scoped state of one research question.
///
/// Owned by value by whichever step is executing; `history` and
/// `accumulated_results` only grow until [`ResearchRun::reset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRun {
    question: String,
    clarification: Option<Clarification>,
    clarification_answer: Option<String>,
    history: Vec<HistoryEntry>,
    accumulated_results: Vec<FilteredItem>,
    current_action: Option<Action>,
    current_observation: Option<Observation>,
    critique_feedback: Option<String>,
    react_loop: u32,
    answer_attempt: u32,
    answer: Option<Answer>,
    critique: Option<Critique>,
    tool_calls: u32,
}

impl ResearchRun {
    pub fn new(question: impl Into<String>, clarification_answer: Option<String>) -> Self {
        Self {
            question: question.into(),
            clarification: None,
            clarification_answer: clarification_answer
                .map(|answer| answer.trim().to_string())
                .filter(|answer| !answer.is_empty()),
            history: Vec::new(),
            accumulated_results: Vec::new(),
            current_action: None,
            current_observation: None,
            critique_feedback: None,
            react_loop: 0,
            answer_attempt: 1,
            answer: None,
            critique: None,
            tool_calls: 0,
        }
    }

    /// Clear every accumulator and counter; keeps the question and clarification.
    pub fn reset(&mut self) {
        self.history.clear();
        self.accumulated_results.clear();
        self.current_action = None;
        self.current_observation = None;
        self.critique_feedback = None;
        self.react_loop = 0;
        self.answer_attempt = 1;
        self.answer = None;
        self.critique = None;
        self.tool_calls = 0;
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn clarification(&self) -> Option<&Clarification> {
        self.clarification.as_ref()
    }

    pub fn set_clarification(&mut self, clarification: Clarification) {
        self.clarification = Some(clarification);
    }

    pub fn clarification_answer(&self) -> Option<&str> {
        self.clarification_answer.as_deref()
    }

    pub fn set_clarification_answer(&mut self, answer: Option<String>) {
        self.clarification_answer = answer
            .map(|answer| answer.trim().to_string())
            .filter(|answer| !answer.is_empty());
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    pub fn accumulated_results(&self) -> &[FilteredItem] {
        &self.accumulated_results
    }

    pub fn accumulate<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = FilteredItem>,
    {
        self.accumulated_results.extend(items);
    }

    pub fn current_action(&self) -> Option<&Action> {
        self.current_action.as_ref()
    }

    pub fn set_current_action(&mut self, action: Action) {
        self.current_action = Some(action);
    }

    pub fn current_observation(&self) -> Option<&Observation> {
        self.current_observation.as_ref()
    }

    pub fn set_current_observation(&mut self, observation: Observation) {
        self.current_observation = Some(observation);
    }

    pub fn take_current_observation(&mut self) -> Option<Observation> {
        self.current_observation.take()
    }

    pub fn critique_feedback(&self) -> Option<&str> {
        self.critique_feedback.as_deref()
    }

    pub fn has_feedback(&self) -> bool {
        self.critique_feedback
            .as_deref()
            .is_some_and(|feedback| !feedback.trim().is_empty())
    }

    pub fn set_critique_feedback(&mut self, feedback: impl Into<String>) {
        self.critique_feedback = Some(feedback.into());
    }

    /// Feedback is consumed by exactly one reasoning call.
    pub fn take_critique_feedback(&mut self) -> Option<String> {
        self.critique_feedback
            .take()
            .filter(|feedback| !feedback.trim().is_empty())
    }

    pub fn react_loop(&self) -> u32 {
        self.react_loop
    }

    pub fn increment_react_loop(&mut self) {
        self.react_loop += 1;
    }

    pub fn answer_attempt(&self) -> u32 {
        self.answer_attempt
    }

    pub fn increment_answer_attempt(&mut self) {
        self.answer_attempt += 1;
    }

    pub fn answer(&self) -> Option<&Answer> {
        self.answer.as_ref()
    }

    pub fn set_answer(&mut self, answer: Answer) {
        self.answer = Some(answer);
    }

    pub fn critique(&self) -> Option<&Critique> {
        self.critique.as_ref()
    }

    pub fn set_critique(&mut self, critique: Critique) {
        self.critique = Some(critique);
    }

    pub fn tool_calls(&self) -> u32 {
        self.tool_calls
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }
}
