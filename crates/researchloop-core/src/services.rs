//! Collaborator contracts for the reasoning service and interactive input.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{Answer, Clarification, Critique, FilteredItem, HistoryEntry, Observation, ProposedAction};

/// Inputs to one reasoning call.
#[derive(Debug, Clone, Copy)]
pub struct ReasonRequest<'a> {
    pub question: &'a str,
    pub clarification: Option<&'a str>,
    pub history: &'a [HistoryEntry],
    pub critique_feedback: Option<&'a str>,
}

/// The five prompt functions backing the loop.
#[async_trait]
pub trait ResearchModel: Send + Sync {
    async fn clarify(&self, question: &str) -> Result<Clarification>;

    async fn reason_act(&self, request: ReasonRequest<'_>) -> Result<ProposedAction>;

    async fn filter_results(
        &self,
        question: &str,
        observations: &[Observation],
    ) -> Result<Vec<FilteredItem>>;

    async fn answer_question(&self, question: &str, context: &[FilteredItem]) -> Result<Answer>;

    async fn critique_answer(&self, question: &str, answer_text: &str) -> Result<Critique>;
}

/// Interactive channel for clarifying questions.
#[async_trait]
pub trait UserPrompt: Send + Sync {
    async fn ask(&self, prompt: &str) -> Result<String>;
}
