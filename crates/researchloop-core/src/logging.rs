//! Append-only JSONL record of finished runs.
//!
//! Files live under `<dir>/<yyyy>/<mm>/runs.jsonl`. Question, output,
//! critique and sources are scrubbed of credentials before they are written;
//! each scrub is mirrored as a line in `audit.jsonl` next to the run log.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LoggingConfig;
use crate::workflow::ResearchOutcome;

const LOG_DIR_ENV: &str = "RESEARCHLOOP_LOG_DIR";
const RETENTION_ENV: &str = "RESEARCHLOOP_LOG_RETENTION_DAYS";
const RUN_LOG_FILE: &str = "runs.jsonl";
const AUDIT_LOG_FILE: &str = "audit.jsonl";

/// Credential shapes scrubbed from logged text. The `keep` group survives.
static SCRUBBERS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("api_key", r"(?i)(?P<keep>api[_-]?key\s*[:=]\s*)[A-Za-z0-9\-_.+/]+"),
        ("secret", r"(?i)(?P<keep>secret\s*[:=]\s*)[A-Za-z0-9\-_.+/]+"),
        ("bearer", r"(?i)(?P<keep>bearer\s+)[A-Za-z0-9\-_.+=/]+"),
        ("sk_token", r"(?P<keep>)sk-[A-Za-z0-9]{16,}"),
        ("tavily_key", r"(?P<keep>)tvly-[A-Za-z0-9_\-]{16,}"),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| match Regex::new(pattern) {
        Ok(regex) => Some((name, regex)),
        Err(err) => {
            warn!(pattern = name, error = %err, "skipping invalid redaction pattern");
            None
        }
    })
    .collect()
});

fn scrub(text: &str, hits: &mut BTreeSet<&'static str>) -> String {
    let mut clean = text.to_string();
    for (name, regex) in SCRUBBERS.iter() {
        if regex.is_match(&clean) {
            hits.insert(*name);
            clean = regex.replace_all(&clean, "${keep}[REDACTED]").into_owned();
        }
    }
    clean
}

/// One finished run as handed to the run log.
#[derive(Debug, Clone)]
pub struct RunLogInput {
    pub run_id: String,
    pub question: String,
    pub output: String,
    pub accepted: bool,
    pub critique: Option<String>,
    pub react_loops: u32,
    pub answer_attempts: u32,
    pub sources: Vec<String>,
    pub trace_path: Option<String>,
}

impl RunLogInput {
    pub fn from_outcome(outcome: &ResearchOutcome, trace_path: Option<String>) -> Self {
        let sources = outcome
            .answer
            .iter()
            .flat_map(|answer| answer.references.iter())
            .map(|reference| reference.source.trim())
            .filter(|source| !source.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            run_id: outcome.run_id.clone(),
            question: outcome.question.clone(),
            output: outcome.output.clone(),
            accepted: outcome.accepted(),
            critique: outcome.critique.as_ref().map(|c| c.critique.clone()),
            react_loops: outcome.react_loops,
            answer_attempts: outcome.answer_attempts,
            sources,
            trace_path,
        }
    }
}

#[derive(Serialize)]
struct RunRecord<'a> {
    timestamp: String,
    run_id: &'a str,
    question: String,
    output: String,
    accepted: bool,
    critique: Option<String>,
    react_loops: u32,
    answer_attempts: u32,
    sources: Vec<String>,
    trace_path: Option<&'a str>,
    redactions: Vec<&'static str>,
}

#[derive(Serialize)]
struct AuditRecord<'a> {
    timestamp: &'a str,
    run_id: &'a str,
    redactions: &'a [&'static str],
}

/// Location and retention of the run log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLog {
    dir: PathBuf,
    /// Files older than this many days are pruned after each append; 0 keeps everything.
    retention_days: u64,
}

impl RunLog {
    pub fn new(dir: impl Into<PathBuf>, retention_days: u64) -> Self {
        Self {
            dir: dir.into(),
            retention_days,
        }
    }

    /// `[logging]` settings, overridden by `RESEARCHLOOP_LOG_DIR` and
    /// `RESEARCHLOOP_LOG_RETENTION_DAYS` when those are set.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let dir = std::env::var(LOG_DIR_ENV)
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| config.dir.clone());
        let retention_days = std::env::var(RETENTION_ENV)
            .ok()
            .and_then(|days| days.trim().parse().ok())
            .unwrap_or(config.retention_days);
        Self::new(dir, retention_days)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn month_dir(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("{:04}", at.year()))
            .join(format!("{:02}", at.month()))
    }

    /// Append one scrubbed record and return the file it went to.
    pub fn record(&self, input: &RunLogInput) -> Result<PathBuf> {
        let now = Utc::now();
        let timestamp = now.to_rfc3339();
        let mut hits = BTreeSet::new();

        let record = RunRecord {
            timestamp: timestamp.clone(),
            run_id: &input.run_id,
            question: scrub(&input.question, &mut hits),
            output: scrub(&input.output, &mut hits),
            critique: input.critique.as_deref().map(|text| scrub(text, &mut hits)),
            accepted: input.accepted,
            react_loops: input.react_loops,
            answer_attempts: input.answer_attempts,
            sources: input
                .sources
                .iter()
                .map(|source| scrub(source, &mut hits))
                .collect(),
            trace_path: input.trace_path.as_deref(),
            redactions: hits.into_iter().collect(),
        };

        let month_dir = self.month_dir(now);
        let run_log = month_dir.join(RUN_LOG_FILE);
        append_line(&run_log, &record)?;

        if !record.redactions.is_empty() {
            warn!(run_id = %input.run_id, redactions = ?record.redactions, "scrubbed credentials from run log");
            let audit = AuditRecord {
                timestamp: &timestamp,
                run_id: &input.run_id,
                redactions: &record.redactions,
            };
            append_line(&month_dir.join(AUDIT_LOG_FILE), &audit)?;
        }

        let pruned = self.prune_expired()?;
        if pruned > 0 {
            info!(pruned, "pruned expired run logs");
        }
        Ok(run_log)
    }

    /// Drop every line recorded for `run_id`. Returns how many run records were removed.
    pub fn purge_run(&self, run_id: &str) -> Result<usize> {
        let mut removed = 0;
        for month_dir in self.month_dirs()? {
            removed += drop_lines_for(&month_dir.join(RUN_LOG_FILE), run_id)?;
            drop_lines_for(&month_dir.join(AUDIT_LOG_FILE), run_id)?;
            remove_dir_if_empty(&month_dir);
            if let Some(year_dir) = month_dir.parent() {
                remove_dir_if_empty(year_dir);
            }
        }
        debug!(run_id, removed, "purged run log entries");
        Ok(removed)
    }

    fn month_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut months = Vec::new();
        for year in subdirs(&self.dir)? {
            months.extend(subdirs(&year)?);
        }
        Ok(months)
    }

    fn prune_expired(&self) -> Result<usize> {
        if self.retention_days == 0 {
            return Ok(0);
        }
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(self.retention_days.saturating_mul(86_400)))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut pruned = 0;
        for month_dir in self.month_dirs()? {
            for name in [RUN_LOG_FILE, AUDIT_LOG_FILE] {
                let path = month_dir.join(name);
                let expired = fs::metadata(&path)
                    .and_then(|meta| meta.modified())
                    .is_ok_and(|modified| modified < cutoff);
                if expired && fs::remove_file(&path).is_ok() {
                    pruned += 1;
                }
            }
            remove_dir_if_empty(&month_dir);
            if let Some(year_dir) = month_dir.parent() {
                remove_dir_if_empty(year_dir);
            }
        }
        Ok(pruned)
    }
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            found.push(entry.path());
        }
    }
    Ok(found)
}

fn remove_dir_if_empty(dir: &Path) {
    if fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none()) {
        let _ = fs::remove_dir(dir);
    }
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(line.as_bytes()))
        .with_context(|| format!("failed to append to {}", path.display()))
}

/// Rewrite `path` without lines whose `run_id` matches, deleting it when nothing is left.
fn drop_lines_for(path: &Path, run_id: &str) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut kept = String::new();
    let mut dropped = 0;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let matches = serde_json::from_str::<serde_json::Value>(&line)
            .ok()
            .is_some_and(|value| value["run_id"].as_str() == Some(run_id));
        if matches {
            dropped += 1;
        } else {
            kept.push_str(&line);
            kept.push('\n');
        }
    }

    if dropped > 0 {
        if kept.is_empty() {
            fs::remove_file(path)?;
        } else {
            fs::write(path, kept).with_context(|| format!("failed to rewrite {}", path.display()))?;
        }
    }
    Ok(dropped)
}
