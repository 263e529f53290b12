//! Data types flowing through the research loop.
//!
//! Actions are produced by the reasoning step, observations by the tool
//! dispatcher, and filtered items by the relevance filter. Everything here is
//! plain data; behaviour lives in the step functions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of tools the reasoning service may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolKind {
    /// Ranked web snippets for a free-text query
    WebSearch,
    /// Current USD price of an asset
    PriceLookup,
    /// Large transfers for a `<chain>:<address>` pair
    AddressTracker,
    /// Daily on-chain metrics for an asset identifier
    OnChainMetrics,
    /// Full text of a single web page
    UrlExtractor,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::WebSearch,
        ToolKind::PriceLookup,
        ToolKind::AddressTracker,
        ToolKind::OnChainMetrics,
        ToolKind::UrlExtractor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::WebSearch => "WebSearch",
            ToolKind::PriceLookup => "PriceLookup",
            ToolKind::AddressTracker => "AddressTracker",
            ToolKind::OnChainMetrics => "OnChainMetrics",
            ToolKind::UrlExtractor => "UrlExtractor",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    /// Accepts the canonical names case-insensitively, ignoring `_`, `-` and spaces.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let folded: String = value
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        ToolKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().to_ascii_lowercase() == folded)
            .ok_or_else(|| value.trim().to_string())
    }
}

/// Tool named by the reasoning service. Unrecognised names are kept so the
/// dispatcher can report them back as an error observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolChoice {
    Known(ToolKind),
    Unknown(String),
}

impl ToolChoice {
    pub fn parse(name: &str) -> Self {
        match name.parse::<ToolKind>() {
            Ok(kind) => ToolChoice::Known(kind),
            Err(raw) => ToolChoice::Unknown(raw),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolChoice::Known(kind) => kind.as_str(),
            ToolChoice::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for ToolChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStep {
    Finish,
    UseTool { tool: ToolChoice, query: String },
}

/// Next step chosen by the reasoning step.
///
/// Either a finish signal or a tool selection with a query; the type admits
/// nothing in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub thought: String,
    pub step: ActionStep,
}

impl Action {
    pub fn finish(thought: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            step: ActionStep::Finish,
        }
    }

    pub fn use_tool(tool: ToolKind, query: impl Into<String>, thought: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            step: ActionStep::UseTool {
                tool: ToolChoice::Known(tool),
                query: query.into(),
            },
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self.step, ActionStep::Finish)
    }

    /// Normalise a loosely-shaped reasoning result.
    ///
    /// `finish = true` always wins. Otherwise both a tool name and a non-blank
    /// query are required; anything else becomes a finish with a diagnostic
    /// thought.
    pub fn normalize(proposed: ProposedAction) -> Self {
        let thought = proposed.thought.unwrap_or_default();
        if proposed.finish.unwrap_or(false) {
            return Self::finish(thought);
        }

        let tool = proposed
            .tool_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let query = proposed
            .query
            .as_deref()
            .map(str::trim)
            .filter(|query| !query.is_empty());

        match (tool, query) {
            (Some(tool), Some(query)) => Self {
                thought,
                step: ActionStep::UseTool {
                    tool: ToolChoice::parse(tool),
                    query: query.to_string(),
                },
            },
            (tool, query) => {
                let missing = match (tool, query) {
                    (None, None) => "neither a tool nor a finish signal",
                    (None, Some(_)) => "a query without a tool",
                    _ => "a tool without a query",
                };
                let diagnostic = if thought.trim().is_empty() {
                    format!("Reasoning returned {missing}; finishing.")
                } else {
                    format!("Reasoning returned {missing}; finishing. Original thought: {thought}")
                };
                Self::finish(diagnostic)
            }
        }
    }

    /// Compact rendering used in the history, e.g. `PriceLookup('bitcoin')`.
    pub fn summary(&self) -> String {
        match &self.step {
            ActionStep::Finish => "Finish".to_string(),
            ActionStep::UseTool { tool, query } => format!("{tool}('{query}')"),
        }
    }
}

/// Raw reasoning-service output before normalisation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedAction {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub finish: Option<bool>,
    #[serde(default)]
    pub thought: Option<String>,
}

/// Outcome of one tool execution, success or failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub content: Option<String>,
    pub source: Option<String>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl Observation {
    pub fn success(content: impl Into<String>, source: Option<String>) -> Self {
        Self {
            content: Some(content.into()),
            source,
            ..Self::default()
        }
    }

    pub fn failure(content: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Nothing was executed.
    pub fn skipped() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_skipped(&self) -> bool {
        self.content.is_none() && self.error.is_none()
    }
}

/// Evidence the relevance filter judged worth keeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredItem {
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
}

impl FilteredItem {
    pub fn new(content: impl Into<String>, source: Option<String>) -> Self {
        Self {
            content: content.into(),
            source,
        }
    }
}

/// One reason→act→observe cycle as remembered by the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub thought: String,
    pub action: String,
    pub observation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarification {
    pub needed: bool,
    #[serde(default)]
    pub question: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub index: i64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub cited_text: String,
    #[serde(default)]
    pub references: Vec<Reference>,
}

impl Answer {
    pub fn uncited(text: impl Into<String>) -> Self {
        Self {
            cited_text: text.into(),
            references: Vec::new(),
        }
    }

    /// `"[index] source"` lines sorted by index, skipping blank sources.
    pub fn citation_lines(&self) -> Vec<String> {
        let mut refs: Vec<&Reference> = self
            .references
            .iter()
            .filter(|reference| !reference.source.trim().is_empty())
            .collect();
        refs.sort_by_key(|reference| reference.index);
        refs.into_iter()
            .map(|reference| format!("[{}] {}", reference.index, reference.source))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    pub is_good: bool,
    pub critique: String,
    #[serde(default)]
    pub missing_info: String,
}
