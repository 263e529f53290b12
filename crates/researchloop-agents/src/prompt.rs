//! Prompt templates for the five research functions.
//!
//! Every prompt ends with the exact JSON shape expected back; the model is
//! called in JSON mode.

use std::fmt::Write as _;

use researchloop_core::{FilteredItem, HistoryEntry, Observation, ReasonRequest, ToolKind};

pub const SYSTEM_PROMPT: &str = "You are a careful crypto and finance research assistant. \
Reply with a single JSON object and nothing else.";

fn tool_catalog() -> String {
    let mut out = String::new();
    for kind in ToolKind::ALL {
        let usage = match kind {
            ToolKind::WebSearch => "free-text web search; returns ranked snippets with links",
            ToolKind::PriceLookup => "current USD price; query is an asset name or ticker, e.g. \"bitcoin\"",
            ToolKind::AddressTracker => {
                "recent large transfers; query is \"<chain>:<address>\", e.g. \"eth:0xabc...\""
            }
            ToolKind::OnChainMetrics => {
                "daily on-chain metrics (active addresses, tx count, fees, supply); query is an asset id such as \"btc\""
            }
            ToolKind::UrlExtractor => "full text of one web page; query is the literal URL",
        };
        let _ = writeln!(out, "- {}: {usage}", kind.as_str());
    }
    out
}

pub fn clarify(question: &str) -> String {
    format!(
        r#"Decide whether this research question is specific enough to answer.
If it is clear, reply {{"needed": false, "question": ""}}.
If it is ambiguous or missing a detail you cannot reasonably assume, reply
{{"needed": true, "question": "<one short clarifying question>"}}.

Question: "{question}"

Reply as JSON: {{"needed": bool, "question": string}}"#
    )
}

fn render_history(history: &[HistoryEntry]) -> String {
    if history.is_empty() {
        return "(no steps taken yet)\n".to_string();
    }
    let mut out = String::new();
    for (idx, entry) in history.iter().enumerate() {
        let _ = writeln!(
            out,
            "Step {}:\n  Thought: {}\n  Action: {}\n  Observation: {}",
            idx + 1,
            entry.thought,
            entry.action,
            entry.observation
        );
    }
    out
}

pub fn reason_act(request: &ReasonRequest<'_>) -> String {
    let mut prompt = format!(
        "You are researching a question step by step. Decide the single next action.\n\n\
         Question: {}\n",
        request.question
    );
    if let Some(detail) = request.clarification {
        let _ = writeln!(prompt, "Clarification from the user: {detail}");
    }
    let _ = write!(
        prompt,
        "\nAvailable tools:\n{}\nPrevious steps:\n{}",
        tool_catalog(),
        render_history(request.history)
    );
    if let Some(feedback) = request.critique_feedback {
        let _ = write!(
            prompt,
            "\nA reviewer rejected the previous answer. Gather what is missing:\n{feedback}\n"
        );
    }
    prompt.push_str(
        r#"
If the previous steps already contain enough evidence, finish.
Reply as JSON: {"thought": string, "tool_name": string | null, "query": string | null, "finish": bool}"#,
    );
    prompt
}

pub fn filter_results(question: &str, observations: &[Observation]) -> String {
    let mut prompt = format!(
        "Keep only the parts of these tool results that help answer the question. \
         Copy relevant facts faithfully and keep their source.\n\nQuestion: {question}\n\nResults:\n"
    );
    for (idx, observation) in observations.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "[{idx}] Content: {}\n    Source: {}\n    Error: {}",
            observation.content.as_deref().unwrap_or(""),
            observation.source.as_deref().unwrap_or("N/A"),
            observation.error.as_deref().unwrap_or("none")
        );
    }
    prompt.push_str(
        r#"
Irrelevant or failed results produce no items.
Reply as JSON: {"items": [{"content": string, "source": string | null}]}"#,
    );
    prompt
}

pub fn answer_question(question: &str, context: &[FilteredItem]) -> String {
    let mut prompt = format!(
        "Write a complete answer to the question using only the numbered context items. \
         Cite items inline with their bracketed number, e.g. [0] or [1]. \
         Include concrete figures such as prices with their citation.\n\n\
         Question: {question}\n\nContext:\n"
    );
    for (idx, item) in context.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "[{idx}] {}\n    Source: {}",
            item.content,
            item.source.as_deref().unwrap_or("N/A")
        );
    }
    prompt.push_str(
        r#"
List in "references" only cited items that have a source.
Reply as JSON: {"cited_answer": string, "references": [{"index": int, "source": string}]}"#,
    );
    prompt
}

pub fn critique_answer(question: &str, answer: &str) -> String {
    format!(
        r#"Review this answer strictly.
Set "is_good" to true only if it is correct, complete and addresses every part of the question.
Otherwise explain the problem in "critique" and name what is missing in "missing_info"
as a few search-friendly keywords.

Question: "{question}"
Answer: "{answer}"

Reply as JSON: {{"is_good": bool, "critique": string, "missing_info": string}}"#
    )
}
