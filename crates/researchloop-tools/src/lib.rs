//! HTTP-backed tool providers for the research loop.

mod coingecko;
mod coinmetrics;
mod etherscan;
mod http;
mod tavily;

use std::sync::Arc;

use anyhow::Result;
use researchloop_core::{optional_env, Config, ToolDispatcher};
use tracing::{info, warn};

pub use coingecko::{coin_id, format_usd, CoinGeckoPrices};
pub use coinmetrics::{CoinMetricsClient, DEFAULT_METRICS};
pub use etherscan::EtherscanTracker;
pub use tavily::TavilyClient;

/// Build a dispatcher from the `[tools]` section.
///
/// Price lookup and on-chain metrics use keyless public APIs and are always
/// wired. Search, extraction and address tracking are only wired when their
/// key variable is set; otherwise those tools report "tool not configured".
pub fn dispatcher_from_config(config: &Config) -> Result<ToolDispatcher> {
    let settings = config.tool_settings();
    let http = http::build_client(settings.timeout)?;

    let mut dispatcher = ToolDispatcher::new(settings)
        .with_price(Arc::new(CoinGeckoPrices::new(http.clone())))
        .with_metrics(Arc::new(CoinMetricsClient::new(http.clone())));

    match optional_env(&config.tools.tavily_api_key_env) {
        Some(key) => {
            let tavily = Arc::new(TavilyClient::new(http.clone(), key));
            dispatcher = dispatcher.with_search(tavily.clone()).with_extractor(tavily);
        }
        None => warn!(
            var = %config.tools.tavily_api_key_env,
            "web search and URL extraction disabled"
        ),
    }

    match optional_env(&config.tools.etherscan_api_key_env) {
        Some(key) => {
            let tracker = EtherscanTracker::new(http, key)
                .with_threshold(config.tools.large_transfer_threshold);
            dispatcher = dispatcher.with_transfers(Arc::new(tracker));
        }
        None => warn!(
            var = %config.tools.etherscan_api_key_env,
            "address tracking disabled"
        ),
    }

    info!(tools = ?dispatcher.configured(), "tool dispatcher ready");
    Ok(dispatcher)
}
