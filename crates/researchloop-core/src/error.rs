use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Setup-time error for the research agent.
///
/// Runs themselves never fail with this type; every failure on the
/// gather/answer/critique path degrades into text carried by the run.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResearchError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}

/// Failure of a single call to an external collaborator.
#[derive(Debug, Clone)]
pub struct ServiceFailure {
    pub service: &'static str,
    pub reason: String,
    pub timed_out: bool,
}

impl ServiceFailure {
    pub fn new(service: &'static str, reason: impl Into<String>) -> Self {
        Self {
            service,
            reason: reason.into(),
            timed_out: false,
        }
    }

    pub fn timeout(service: &'static str, after_ms: u128) -> Self {
        Self {
            service,
            reason: format!("no response within {after_ms} ms"),
            timed_out: true,
        }
    }
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timed_out {
            write!(f, "{} timed out: {}", self.service, self.reason)
        } else {
            write!(f, "{} failed: {}", self.service, self.reason)
        }
    }
}

impl std::error::Error for ServiceFailure {}
