//! Per-run step trace. Markdown lists every step; Mermaid and Graphviz draw
//! the stage transition graph.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One state transition: the stage that ran and what it reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub task_id: String,
    pub message: String,
    pub timestamp_ms: u128,
}

impl TraceEvent {
    pub fn new(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self {
            task_id: task_id.into(),
            message: message.into(),
            timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, task_id: impl Into<String>, message: impl Into<String>) {
        self.events.push(TraceEvent::new(task_id, message));
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.events)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub task_id: String,
    pub message: String,
    /// Milliseconds since the first event of the run.
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: Vec<TraceStep>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let start = events.first().map_or(0, |event| event.timestamp_ms);
        let steps = events
            .iter()
            .enumerate()
            .map(|(idx, event)| TraceStep {
                index: idx + 1,
                task_id: event.task_id.clone(),
                message: event.message.clone(),
                elapsed_ms: event.timestamp_ms.saturating_sub(start),
            })
            .collect();
        Self { steps }
    }

    /// How often each stage ran, keyed by stage id.
    pub fn stage_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for step in &self.steps {
            *counts.entry(step.task_id.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Run Trace\n");
        for step in &self.steps {
            let _ = writeln!(
                output,
                "{}. `{}` (+{} ms) -> {}",
                step.index, step.task_id, step.elapsed_ms, step.message
            );
        }
        let counts = self
            .stage_counts()
            .into_iter()
            .map(|(stage, count)| format!("{stage}={count}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(output, "\nStage counts: {counts}");
        output
    }

    /// Observed stage-to-stage transitions with how often each occurred.
    pub fn transitions(&self) -> BTreeMap<(&str, &str), usize> {
        let mut edges = BTreeMap::new();
        for pair in self.steps.windows(2) {
            *edges
                .entry((pair[0].task_id.as_str(), pair[1].task_id.as_str()))
                .or_insert(0) += 1;
        }
        edges
    }

    /// State diagram of the stages this run visited.
    pub fn render_mermaid(&self) -> String {
        let (Some(first), Some(last)) = (self.steps.first(), self.steps.last()) else {
            return "stateDiagram-v2\n  %% no trace events captured\n".to_string();
        };

        let mut output = String::from("stateDiagram-v2\n");
        let _ = writeln!(output, "  [*] --> {}", first.task_id);
        for ((from, to), count) in self.transitions() {
            let _ = writeln!(output, "  {from} --> {to}: {count}x");
        }
        let _ = writeln!(output, "  {} --> [*]", last.task_id);
        output
    }

    pub fn render_graphviz(&self) -> String {
        if self.steps.is_empty() {
            return "digraph ResearchRun {\n  // no trace events captured\n}\n".to_string();
        }

        let mut output =
            String::from("digraph ResearchRun {\n  rankdir=LR;\n  node [shape=box];\n");
        for (stage, count) in self.stage_counts() {
            let _ = writeln!(output, "  \"{stage}\" [label=\"{stage} ({count})\"];");
        }
        for ((from, to), count) in self.transitions() {
            let _ = writeln!(output, "  \"{from}\" -> \"{to}\" [label=\"{count}\"];");
        }
        output.push_str("}\n");
        output
    }

    pub fn render(&self, format: TraceFormat) -> String {
        match format {
            TraceFormat::Markdown => self.render_markdown(),
            TraceFormat::Mermaid => self.render_mermaid(),
            TraceFormat::Graphviz => self.render_graphviz(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TraceFormat {
    #[default]
    Markdown,
    Mermaid,
    Graphviz,
}

impl FromStr for TraceFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "mermaid" => Ok(Self::Mermaid),
            "graphviz" | "dot" => Ok(Self::Graphviz),
            other => Err(format!(
                "unknown trace format '{other}' (expected markdown, mermaid or graphviz)"
            )),
        }
    }
}

/// Write `<run_id>.json` into `dir`, creating the directory when needed.
pub fn persist_trace<P: AsRef<Path>>(dir: P, run_id: &str, events: &[TraceEvent]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{run_id}.json"));
    let payload = serde_json::to_vec_pretty(events)?;
    let mut file = File::create(&path)
        .with_context(|| format!("failed to create trace file {}", path.display()))?;
    file.write_all(&payload)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(path)
}
