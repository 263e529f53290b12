use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::state::{RelevancePolicy, RunLimits};
use crate::toolbox::ToolSettings;
use crate::ResearchError;

const DEFAULT_CONFIG_PATH: &str = "researchloop.toml";
const CONFIG_PATH_ENV: &str = "RESEARCHLOOP_CONFIG";
/// LLM backends with a client in this workspace.
pub const SUPPORTED_PROVIDERS: [&str; 1] = ["openai"];

/// Top-level configuration, one struct per TOML table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    #[serde(rename = "loop")]
    pub research_loop: LoopConfig,
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn run_limits(&self) -> RunLimits {
        RunLimits {
            max_react_loops: self.research_loop.max_react_loops,
            max_answer_attempts: self.research_loop.max_answer_attempts,
            service_timeout: Duration::from_secs(self.research_loop.service_timeout_secs),
            relevance_policy: self.research_loop.relevance_policy,
        }
    }

    pub fn tool_settings(&self) -> ToolSettings {
        ToolSettings {
            search_max_results: self.tools.search_max_results,
            transfer_limit: self.tools.transfer_limit,
            timeout: Duration::from_secs(self.tools.tool_timeout_secs),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `RESEARCHLOOP_CONFIG` environment variable.
    /// 3. `researchloop.toml` in the current working directory, falling back
    ///    to built-in defaults when that file does not exist.
    pub fn load(path: Option<PathBuf>) -> Result<Config, ResearchError> {
        let (candidate, explicit) = resolve_path(path);
        if !explicit && !candidate.exists() {
            return Ok(Config::default());
        }

        let raw = fs::read_to_string(&candidate)
            .map_err(|err| ResearchError::config_io(candidate.clone(), err))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Config, ResearchError> {
        let config: Config =
            toml::from_str(raw).map_err(|err| ResearchError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), ResearchError> {
        let provider = config.llm.provider.trim();
        if !SUPPORTED_PROVIDERS.iter().any(|supported| *supported == provider) {
            return Err(ResearchError::InvalidConfiguration(format!(
                "llm.provider '{}' is not supported (expected one of: {})",
                config.llm.provider,
                SUPPORTED_PROVIDERS.join(", ")
            )));
        }
        if config.llm.api_key_env.trim().is_empty() {
            return Err(ResearchError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        let bounds = [
            ("loop.max_react_loops", u64::from(config.research_loop.max_react_loops)),
            ("loop.max_answer_attempts", u64::from(config.research_loop.max_answer_attempts)),
            ("loop.service_timeout_secs", config.research_loop.service_timeout_secs),
            ("tools.search_max_results", config.tools.search_max_results as u64),
            ("tools.transfer_limit", config.tools.transfer_limit as u64),
            ("tools.tool_timeout_secs", config.tools.tool_timeout_secs),
        ];
        if let Some((name, _)) = bounds.iter().find(|(_, value)| *value == 0) {
            return Err(ResearchError::InvalidConfiguration(format!(
                "{name} must be greater than zero"
            )));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// Sampling temperature; omit to use the backend default.
    pub temperature: Option<f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            timeout_secs: 60,
            temperature: Some(0.0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_react_loops: u32,
    pub max_answer_attempts: u32,
    pub relevance_policy: RelevancePolicy,
    pub service_timeout_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        let limits = RunLimits::default();
        Self {
            max_react_loops: limits.max_react_loops,
            max_answer_attempts: limits.max_answer_attempts,
            relevance_policy: limits.relevance_policy,
            service_timeout_secs: limits.service_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub search_max_results: usize,
    pub transfer_limit: usize,
    pub tool_timeout_secs: u64,
    pub tavily_api_key_env: String,
    pub etherscan_api_key_env: String,
    /// Minimum transfer size, in ETH, reported by the address tracker.
    pub large_transfer_threshold: f64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let settings = ToolSettings::default();
        Self {
            search_max_results: settings.search_max_results,
            transfer_limit: settings.transfer_limit,
            tool_timeout_secs: settings.timeout.as_secs(),
            tavily_api_key_env: "TAVILY_API_KEY".to_string(),
            etherscan_api_key_env: "ETHERSCAN_API_KEY".to_string(),
            large_transfer_threshold: 100.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Root of the JSONL run log.
    pub dir: PathBuf,
    pub retention_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: PathBuf::from("data/logs"),
            retention_days: 90,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = ConfigLoader::from_toml(
            r#"
            [llm]
            model = "gpt-4o"

            [loop]
            max_react_loops = 4
            relevance_policy = "fail_open"
            "#,
        )
        .expect("config parses");

        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        let limits = config.run_limits();
        assert_eq!(limits.max_react_loops, 4);
        assert_eq!(limits.max_answer_attempts, 2);
        assert_eq!(limits.relevance_policy, RelevancePolicy::FailOpen);
        assert_eq!(limits.service_timeout, Duration::from_secs(60));
        assert_eq!(config.tool_settings(), ToolSettings::default());
    }

    #[test]
    fn zero_bounds_are_rejected() {
        let err = ConfigLoader::from_toml("[loop]\nmax_answer_attempts = 0\n").unwrap_err();
        assert!(err.to_string().contains("loop.max_answer_attempts"));

        let err = ConfigLoader::from_toml("[tools]\ntool_timeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("tools.tool_timeout_secs"));
    }

    #[test]
    fn unsupported_provider_is_rejected() {
        let err = ConfigLoader::from_toml("[llm]\nprovider = \"anthropic\"\n").unwrap_err();
        assert!(matches!(err, ResearchError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("llm.provider 'anthropic' is not supported"));

        let config = ConfigLoader::from_toml("[llm]\nprovider = \"openai\"\ntemperature = 0.3\n")
            .expect("openai is supported");
        assert_eq!(config.llm.temperature, Some(0.3));
    }

    #[test]
    fn logging_section_sets_run_log_location() {
        let config = ConfigLoader::from_toml(
            "[logging]\nlevel = \"debug\"\ndir = \"/var/log/researchloop\"\nretention_days = 7\n",
        )
        .expect("config parses");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.dir, PathBuf::from("/var/log/researchloop"));
        assert_eq!(config.logging.retention_days, 7);
    }

    #[test]
    fn explicit_path_must_exist_and_parse() {
        let missing = ConfigLoader::load(Some(PathBuf::from("/nonexistent/researchloop.toml")));
        assert!(matches!(missing, Err(ResearchError::ConfigIo { .. })));

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[tools]\nsearch_max_results = 5").expect("write config");
        let config = ConfigLoader::load(Some(file.path().to_path_buf())).expect("loads");
        assert_eq!(config.tools.search_max_results, 5);
    }
}
