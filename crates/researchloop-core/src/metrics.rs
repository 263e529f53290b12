use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use tracing::info;

use crate::workflow::ResearchOutcome;

struct RunMetrics {
    runs: Counter<u64>,
    react_loops: Histogram<u64>,
    answer_attempts: Histogram<u64>,
    tool_calls: Counter<u64>,
}

static METRICS: OnceCell<RunMetrics> = OnceCell::new();

fn handles() -> &'static RunMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("researchloop");
        RunMetrics {
            runs: meter
                .u64_counter("research_runs_total")
                .with_description("Finished research runs by verdict")
                .init(),
            react_loops: meter
                .u64_histogram("research_react_loops")
                .with_description("Reason/act/observe cycles per run")
                .init(),
            answer_attempts: meter
                .u64_histogram("research_answer_attempts")
                .with_description("Answer attempts per run")
                .init(),
            tool_calls: meter
                .u64_counter("research_tool_calls_total")
                .with_description("Tool executions across all runs")
                .init(),
        }
    })
}

/// Log where metrics would be exported; the provider itself is installed by the host.
pub fn init_metrics_from_env(service_name: &str) -> Result<()> {
    if let Ok(endpoint) = std::env::var("RESEARCHLOOP_OTEL_METRICS_ENDPOINT") {
        info!(
            target = "telemetry",
            %endpoint,
            "metrics endpoint configured for {service_name}; install an OTLP meter provider to export run metrics"
        );
    }
    Ok(())
}

/// Record one finished run. No-op unless a meter provider is installed.
pub fn record_run_metrics(outcome: &ResearchOutcome) {
    let metrics = handles();
    let verdict = match &outcome.critique {
        Some(critique) if critique.is_good => "accepted",
        Some(_) => "rejected",
        None => "unjudged",
    };
    let attrs = [KeyValue::new("verdict", verdict)];

    metrics.runs.add(1, &attrs);
    metrics
        .react_loops
        .record(u64::from(outcome.react_loops), &attrs);
    metrics
        .answer_attempts
        .record(u64::from(outcome.answer_attempts), &attrs);
    metrics.tool_calls.add(u64::from(outcome.tool_calls), &[]);
}
