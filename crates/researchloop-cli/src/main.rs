use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use researchloop_agents::{LlmResearchModel, OpenAiProvider};
use researchloop_core::{
    init_metrics_from_env, init_telemetry, persist_trace, record_run_metrics, Config,
    ConfigLoader, ResearchAgent, ResearchOptions, RunLog, RunLogInput, TelemetryOptions,
    TraceFormat, UserPrompt,
};
use researchloop_tools::dispatcher_from_config;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::runtime::Runtime;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "researchloop",
    version,
    about = "Research a question with tools, then answer with citations"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer one research question.
    Run(RunArgs),
    /// Remove a run's records from the JSONL run log.
    Purge(PurgeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Question to research.
    #[arg(long)]
    question: String,

    /// Answer to a clarifying question, supplied up front instead of interactively.
    #[arg(long)]
    clarification: Option<String>,

    /// Path to a TOML config (defaults to `RESEARCHLOOP_CONFIG`, then `researchloop.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the run trace after the answer.
    #[arg(long, default_value_t = false)]
    trace: bool,

    /// Trace rendering: markdown (step list), mermaid or graphviz (stage graph).
    #[arg(long, default_value = "markdown")]
    trace_format: TraceFormat,

    /// Persist the run trace as JSON into this directory.
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Append the run to the JSONL session logs.
    #[arg(long, default_value_t = false)]
    log: bool,

    /// Override the maximum number of reason/act iterations per attempt.
    #[arg(long)]
    max_loops: Option<u32>,

    /// Override the maximum number of answer attempts.
    #[arg(long)]
    max_attempts: Option<u32>,
}

#[derive(Args, Debug)]
struct PurgeArgs {
    /// Run id printed in the run log.
    #[arg(long)]
    run_id: String,

    /// Path to a TOML config (defaults to `RESEARCHLOOP_CONFIG`, then `researchloop.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Asks clarifying questions on stderr and reads one line from stdin.
struct StdinPrompt;

#[async_trait]
impl UserPrompt for StdinPrompt {
    async fn ask(&self, prompt: &str) -> Result<String> {
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(format!("{prompt}\n> ").as_bytes())
            .await
            .context("failed to write prompt")?;
        stderr.flush().await.context("failed to flush prompt")?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .context("failed to read clarification from stdin")?;
        Ok(line.trim().to_string())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(args).await?,
            Command::Purge(args) => purge_command(args)?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let config = ConfigLoader::load(path)?;
    init_telemetry(TelemetryOptions::from_level(&config.logging.level))?;
    Ok(config)
}

async fn run_command(args: RunArgs) -> Result<()> {
    let config = load_config(args.config.clone())?;
    init_metrics_from_env("researchloop")?;

    let provider = OpenAiProvider::from_config(&config.llm)?;
    let model = LlmResearchModel::new(Arc::new(provider), config.llm.model.clone())
        .with_temperature(config.llm.temperature);
    let tools = dispatcher_from_config(&config)?;

    let mut builder = ResearchAgent::builder()
        .model(Arc::new(model))
        .user_prompt(Arc::new(StdinPrompt))
        .tools(tools)
        .limits(config.run_limits());
    if let Some(max) = args.max_loops {
        builder = builder.max_react_loops(max);
    }
    if let Some(max) = args.max_attempts {
        builder = builder.max_answer_attempts(max);
    }
    let agent = builder.build()?;

    info!(question = %args.question, "starting research run");
    let mut options = ResearchOptions::new(&args.question);
    if let Some(answer) = args.clarification {
        options = options.with_clarification(answer);
    }
    let outcome = agent.run_with_options(options).await;
    record_run_metrics(&outcome);

    println!("{}", outcome.output);

    if args.trace {
        println!();
        println!("{}", outcome.summary().render(args.trace_format));
    }

    let trace_path = match args.trace_dir {
        Some(dir) => {
            let path = persist_trace(&dir, &outcome.run_id, &outcome.trace)?;
            info!(path = %path.display(), "trace persisted");
            Some(path.display().to_string())
        }
        None => None,
    };

    if args.log {
        let run_log = RunLog::from_config(&config.logging);
        match run_log.record(&RunLogInput::from_outcome(&outcome, trace_path)) {
            Ok(path) => info!(path = %path.display(), "run logged"),
            Err(err) => warn!(error = %err, "failed to write run log"),
        }
    }

    info!(
        run_id = %outcome.run_id,
        accepted = outcome.accepted(),
        react_loops = outcome.react_loops,
        answer_attempts = outcome.answer_attempts,
        "research run finished"
    );
    Ok(())
}

fn purge_command(args: PurgeArgs) -> Result<()> {
    let config = load_config(args.config)?;
    let run_log = RunLog::from_config(&config.logging);
    let removed = run_log.purge_run(&args.run_id)?;
    info!(run_id = %args.run_id, removed, dir = %run_log.dir().display(), "run log purged");
    println!("Removed {removed} record(s) for run {}", args.run_id);
    Ok(())
}
