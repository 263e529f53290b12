#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use researchloop_core::{
    Answer, Clarification, Critique, FilteredItem, Observation, PriceProvider, ProposedAction,
    ReasonRequest, Reference, ResearchModel, SearchHit, SearchProvider, UserPrompt,
};

/// Reasoning service that replays queued replies and records every call.
///
/// Empty queues fall back to: no clarification, finish, keep the observation
/// verbatim, answer by echoing the evidence, accept the answer.
#[derive(Default)]
pub struct ScriptedModel {
    clarify: Mutex<VecDeque<Result<Clarification, String>>>,
    reason: Mutex<VecDeque<Result<ProposedAction, String>>>,
    filter: Mutex<VecDeque<Result<Vec<FilteredItem>, String>>>,
    answers: Mutex<VecDeque<Result<Answer, String>>>,
    critiques: Mutex<VecDeque<Result<Critique, String>>>,
    reason_delay: Option<Duration>,
    calls: Mutex<Vec<&'static str>>,
    reason_inputs: Mutex<Vec<(Option<String>, Option<String>, usize)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_clarify(self, reply: Result<Clarification, &str>) -> Self {
        self.clarify.lock().unwrap().push_back(reply.map_err(str::to_string));
        self
    }

    pub fn on_reason(self, reply: Result<ProposedAction, &str>) -> Self {
        self.reason.lock().unwrap().push_back(reply.map_err(str::to_string));
        self
    }

    pub fn on_filter(self, reply: Result<Vec<FilteredItem>, &str>) -> Self {
        self.filter.lock().unwrap().push_back(reply.map_err(str::to_string));
        self
    }

    pub fn on_answer(self, reply: Result<Answer, &str>) -> Self {
        self.answers.lock().unwrap().push_back(reply.map_err(str::to_string));
        self
    }

    pub fn on_critique(self, reply: Result<Critique, &str>) -> Self {
        self.critiques.lock().unwrap().push_back(reply.map_err(str::to_string));
        self
    }

    pub fn slow_reasoning(mut self, delay: Duration) -> Self {
        self.reason_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().into_iter().filter(|call| *call == name).count()
    }

    /// `(clarification, critique feedback, history length)` per reasoning call.
    pub fn reason_inputs(&self) -> Vec<(Option<String>, Option<String>, usize)> {
        self.reason_inputs.lock().unwrap().clone()
    }

    fn note(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }
}

fn replay<T>(queue: &Mutex<VecDeque<Result<T, String>>>) -> Option<Result<T>> {
    queue
        .lock()
        .unwrap()
        .pop_front()
        .map(|reply| reply.map_err(|message| anyhow!(message)))
}

#[async_trait]
impl ResearchModel for ScriptedModel {
    async fn clarify(&self, _question: &str) -> Result<Clarification> {
        self.note("clarify");
        replay(&self.clarify).unwrap_or_else(|| Ok(Clarification::default()))
    }

    async fn reason_act(&self, request: ReasonRequest<'_>) -> Result<ProposedAction> {
        self.note("reason_act");
        self.reason_inputs.lock().unwrap().push((
            request.clarification.map(str::to_string),
            request.critique_feedback.map(str::to_string),
            request.history.len(),
        ));
        if let Some(delay) = self.reason_delay {
            tokio::time::sleep(delay).await;
        }
        replay(&self.reason).unwrap_or_else(|| Ok(finish("done")))
    }

    async fn filter_results(
        &self,
        _question: &str,
        observations: &[Observation],
    ) -> Result<Vec<FilteredItem>> {
        self.note("filter_results");
        replay(&self.filter).unwrap_or_else(|| {
            Ok(observations
                .iter()
                .filter_map(|observation| {
                    observation
                        .content
                        .clone()
                        .map(|content| FilteredItem::new(content, observation.source.clone()))
                })
                .collect())
        })
    }

    async fn answer_question(&self, _question: &str, context: &[FilteredItem]) -> Result<Answer> {
        self.note("answer_question");
        replay(&self.answers).unwrap_or_else(|| {
            let cited_text = context
                .iter()
                .enumerate()
                .map(|(idx, item)| format!("{} [{idx}]", item.content))
                .collect::<Vec<_>>()
                .join(" ");
            let references = context
                .iter()
                .enumerate()
                .filter_map(|(idx, item)| {
                    item.source.clone().map(|source| Reference {
                        index: idx as i64,
                        source,
                    })
                })
                .collect();
            Ok(Answer {
                cited_text,
                references,
            })
        })
    }

    async fn critique_answer(&self, _question: &str, _answer_text: &str) -> Result<Critique> {
        self.note("critique_answer");
        replay(&self.critiques).unwrap_or_else(|| Ok(good()))
    }
}

pub fn finish(thought: &str) -> ProposedAction {
    ProposedAction {
        finish: Some(true),
        thought: Some(thought.to_string()),
        ..ProposedAction::default()
    }
}

pub fn use_tool(tool: &str, query: &str) -> ProposedAction {
    ProposedAction {
        tool_name: Some(tool.to_string()),
        query: Some(query.to_string()),
        finish: Some(false),
        thought: Some(format!("look up {query}")),
    }
}

pub fn good() -> Critique {
    Critique {
        is_good: true,
        critique: "Complete and cited.".to_string(),
        missing_info: String::new(),
    }
}

pub fn bad(critique: &str, missing: &str) -> Critique {
    Critique {
        is_good: false,
        critique: critique.to_string(),
        missing_info: missing.to_string(),
    }
}

pub struct FixedPrice(pub &'static str);

#[async_trait]
impl PriceProvider for FixedPrice {
    async fn current_price(&self, _asset: &str) -> Result<Option<String>> {
        Ok(Some(self.0.to_string()))
    }
}

#[derive(Default)]
pub struct CountingSearch {
    pub queries: Mutex<Vec<String>>,
}

#[async_trait]
impl SearchProvider for CountingSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok((0..max_results)
            .map(|idx| SearchHit {
                content: format!("{query} snippet {idx}"),
                link: Some(format!("https://news.example/{idx}")),
            })
            .collect())
    }
}

pub struct CannedPrompt {
    pub reply: Result<&'static str, &'static str>,
    pub asked: Mutex<Vec<String>>,
}

impl CannedPrompt {
    pub fn replying(reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply),
            asked: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: Err("stdin closed"),
            asked: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl UserPrompt for CannedPrompt {
    async fn ask(&self, prompt: &str) -> Result<String> {
        self.asked.lock().unwrap().push(prompt.to_string());
        self.reply.map(str::to_string).map_err(|message| anyhow!(message))
    }
}
