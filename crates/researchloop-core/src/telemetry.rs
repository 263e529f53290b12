use std::sync::OnceLock;

use tracing_subscriber::{fmt, EnvFilter};

use crate::ResearchError;

static SUBSCRIBER_INSTALLED: OnceLock<()> = OnceLock::new();

const DEFAULT_DIRECTIVE: &str = "info";

#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    /// Explicit filter; falls back to `RUST_LOG`, then `default_directive`.
    pub env_filter: Option<String>,
    pub default_directive: String,
    pub with_ansi: bool,
    pub with_target: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            env_filter: None,
            default_directive: DEFAULT_DIRECTIVE.to_string(),
            with_ansi: true,
            with_target: false,
        }
    }
}

impl TelemetryOptions {
    /// Options whose fallback filter comes from the `[logging] level` setting.
    pub fn from_level(level: &str) -> Self {
        let level = level.trim();
        Self {
            default_directive: if level.is_empty() {
                DEFAULT_DIRECTIVE.to_string()
            } else {
                level.to_string()
            },
            ..Self::default()
        }
    }

    fn resolve_filter(&self) -> String {
        self.env_filter
            .clone()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .filter(|filter| !filter.trim().is_empty())
            .unwrap_or_else(|| self.default_directive.clone())
    }
}

/// Install the global tracing subscriber, writing to stderr so stdout stays
/// reserved for answers.
///
/// Only the first call installs anything; later calls return `Ok(())`.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), ResearchError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_new(options.resolve_filter()).map_err(|err| {
        ResearchError::InvalidConfiguration(format!("invalid log filter: {err}"))
    })?;

    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_ansi(options.with_ansi)
        .with_target(options.with_target)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| {
            ResearchError::InvalidConfiguration(format!("telemetry init failed: {err}"))
        })?;

    SUBSCRIBER_INSTALLED.get_or_init(|| ());
    Ok(())
}
