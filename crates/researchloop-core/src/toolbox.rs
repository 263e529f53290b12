//! Tool collaborators and the dispatcher that turns one [`Action`] into one
//! [`Observation`].
//!
//! The dispatcher never returns an error. Provider failures, timeouts,
//! unconfigured tools and malformed queries all come back as an observation
//! with `error` set and a readable `content`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::model::{Action, ActionStep, Observation, ToolChoice, ToolKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LargeTransfer {
    pub hash: String,
    pub from: String,
    pub to: String,
    /// Native units, e.g. ETH.
    pub value: f64,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Daily on-chain metric rows for one asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub asset: String,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Formatted price, or `None` when the asset is unknown.
    async fn current_price(&self, asset: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait TransferProvider: Send + Sync {
    async fn large_transfers(
        &self,
        chain: &str,
        address: &str,
        limit: usize,
    ) -> Result<Vec<LargeTransfer>>;
}

#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn asset_metrics(&self, asset: &str) -> Result<MetricsReport>;
}

#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<Option<String>>;
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not configured")]
    NotConfigured(ToolKind),
    #[error("Invalid query format")]
    InvalidQuery(String),
    #[error("{tool} timed out after {after_ms} ms")]
    Timeout { tool: ToolKind, after_ms: u128 },
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSettings {
    pub search_max_results: usize,
    pub transfer_limit: usize,
    pub timeout: Duration,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            search_max_results: 3,
            transfer_limit: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Routes each tool kind to its configured provider.
#[derive(Clone, Default)]
pub struct ToolDispatcher {
    search: Option<Arc<dyn SearchProvider>>,
    price: Option<Arc<dyn PriceProvider>>,
    transfers: Option<Arc<dyn TransferProvider>>,
    metrics: Option<Arc<dyn MetricsProvider>>,
    extractor: Option<Arc<dyn PageExtractor>>,
    settings: ToolSettings,
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("configured", &self.configured())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ToolDispatcher {
    pub fn new(settings: ToolSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn with_search(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(provider);
        self
    }

    pub fn with_price(mut self, provider: Arc<dyn PriceProvider>) -> Self {
        self.price = Some(provider);
        self
    }

    pub fn with_transfers(mut self, provider: Arc<dyn TransferProvider>) -> Self {
        self.transfers = Some(provider);
        self
    }

    pub fn with_metrics(mut self, provider: Arc<dyn MetricsProvider>) -> Self {
        self.metrics = Some(provider);
        self
    }

    pub fn with_extractor(mut self, provider: Arc<dyn PageExtractor>) -> Self {
        self.extractor = Some(provider);
        self
    }

    pub fn settings(&self) -> ToolSettings {
        self.settings
    }

    /// Tool kinds with a provider attached.
    pub fn configured(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                ToolKind::WebSearch => self.search.is_some(),
                ToolKind::PriceLookup => self.price.is_some(),
                ToolKind::AddressTracker => self.transfers.is_some(),
                ToolKind::OnChainMetrics => self.metrics.is_some(),
                ToolKind::UrlExtractor => self.extractor.is_some(),
            })
            .collect()
    }

    /// Execute at most one tool call.
    #[instrument(name = "tools.execute", skip(self, action))]
    pub async fn execute(&self, action: Option<&Action>) -> Observation {
        let Some(Action {
            step: ActionStep::UseTool { tool, query },
            ..
        }) = action
        else {
            debug!("no executable action; observation skipped");
            return Observation::skipped();
        };

        let kind = match tool {
            ToolChoice::Known(kind) => *kind,
            ToolChoice::Unknown(name) => {
                warn!(tool = %name, "unknown tool requested");
                return Observation::failure(format!("Error: Unknown tool '{name}'."), "Unknown tool");
            }
        };

        info!(tool = %kind, %query, "executing tool");
        let observation = match kind {
            ToolKind::WebSearch => self.web_search(query).await,
            ToolKind::PriceLookup => self.price_lookup(query).await,
            ToolKind::AddressTracker => self.address_tracker(query).await,
            ToolKind::OnChainMetrics => self.onchain_metrics(query).await,
            ToolKind::UrlExtractor => self.url_extractor(query).await,
        };

        match observation {
            Ok(observation) => {
                debug!(
                    tool = %kind,
                    content_len = observation.content.as_deref().map_or(0, str::len),
                    failed = observation.is_error(),
                    "tool finished"
                );
                observation
            }
            Err(err) => {
                warn!(tool = %kind, %query, error = %err, "tool execution failed");
                Observation::failure(
                    format!("Error executing tool '{kind}' with query '{query}': {err}"),
                    err.to_string(),
                )
            }
        }
    }

    async fn bounded<T, F>(&self, tool: ToolKind, call: F) -> Result<T, ToolError>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(result) => result.map_err(ToolError::from),
            Err(_) => Err(ToolError::Timeout {
                tool,
                after_ms: self.settings.timeout.as_millis(),
            }),
        }
    }

    async fn web_search(&self, query: &str) -> Result<Observation, ToolError> {
        let provider = self
            .search
            .as_ref()
            .ok_or(ToolError::NotConfigured(ToolKind::WebSearch))?;
        let hits = self
            .bounded(
                ToolKind::WebSearch,
                provider.search(query, self.settings.search_max_results),
            )
            .await?;

        if hits.is_empty() {
            return Ok(Observation::success("No web search results found.", None));
        }

        let content = hits
            .iter()
            .enumerate()
            .map(|(idx, hit)| format!("[{}] {}", idx + 1, hit.content))
            .collect::<Vec<_>>()
            .join("\n");

        let mut links: Vec<&str> = Vec::new();
        for link in hits.iter().filter_map(|hit| hit.link.as_deref()) {
            if !link.trim().is_empty() && !links.contains(&link) {
                links.push(link);
            }
        }
        let source = (!links.is_empty()).then(|| links.join(", "));

        Ok(Observation::success(content, source))
    }

    async fn price_lookup(&self, query: &str) -> Result<Observation, ToolError> {
        let provider = self
            .price
            .as_ref()
            .ok_or(ToolError::NotConfigured(ToolKind::PriceLookup))?;
        let price = self
            .bounded(ToolKind::PriceLookup, provider.current_price(query))
            .await?;

        let content = match price {
            Some(price) => format!("Current {query} price: {price}"),
            None => format!("Could not find price for {query}."),
        };
        Ok(Observation::success(content, None))
    }

    async fn address_tracker(&self, query: &str) -> Result<Observation, ToolError> {
        let Some((chain, address)) = split_chain_address(query) else {
            return Ok(Observation::failure(
                format!("Invalid query format for AddressTracker: '{query}'."),
                ToolError::InvalidQuery(query.to_string()).to_string(),
            ));
        };
        let provider = self
            .transfers
            .as_ref()
            .ok_or(ToolError::NotConfigured(ToolKind::AddressTracker))?;

        let transfers = match self
            .bounded(
                ToolKind::AddressTracker,
                provider.large_transfers(chain, address, self.settings.transfer_limit),
            )
            .await
        {
            Ok(transfers) => transfers,
            Err(err) => {
                return Ok(Observation::failure(
                    format!("AddressTracker failed: {err}"),
                    err.to_string(),
                ));
            }
        };

        if transfers.is_empty() {
            return Ok(Observation::success(
                format!("No significant activity found for {query}."),
                None,
            ));
        }

        let raw = serde_json::json!({
            "chain": chain,
            "address": address,
            "transfers": transfers,
        });
        Ok(Observation::success(
            format!("Found {} large transfers for {query}.", transfers.len()),
            None,
        )
        .with_raw(raw))
    }

    async fn onchain_metrics(&self, query: &str) -> Result<Observation, ToolError> {
        let asset = query.trim().to_lowercase();
        let provider = self
            .metrics
            .as_ref()
            .ok_or(ToolError::NotConfigured(ToolKind::OnChainMetrics))?;

        let report = match self
            .bounded(ToolKind::OnChainMetrics, provider.asset_metrics(&asset))
            .await
        {
            Ok(report) => report,
            Err(err) => {
                return Ok(Observation::failure(
                    format!("OnChainMetrics failed: {err}"),
                    err.to_string(),
                ));
            }
        };

        let summary = if report.data.is_empty() {
            format!("On-chain metrics for {asset}: No recent metric data found.")
        } else {
            format!(
                "On-chain metrics for {asset}: Found {} days data (e.g., AdrActCnt, TxCnt).",
                report.data.len()
            )
        };
        let raw = serde_json::to_value(&report).map_err(anyhow::Error::from)?;
        Ok(Observation::success(summary, None).with_raw(raw))
    }

    async fn url_extractor(&self, query: &str) -> Result<Observation, ToolError> {
        let url = query.trim();
        let provider = self
            .extractor
            .as_ref()
            .ok_or(ToolError::NotConfigured(ToolKind::UrlExtractor))?;

        let extracted = self
            .bounded(ToolKind::UrlExtractor, provider.extract(url))
            .await?;

        match extracted.filter(|text| !text.trim().is_empty()) {
            Some(text) => Ok(Observation::success(text, Some(url.to_string()))),
            None => Ok(Observation::failure(
                format!("Failed to extract content from URL: {url}"),
                "Extraction failed",
            )
            .with_source(url)),
        }
    }
}

/// Split `"<chain>:<address>"` on the first colon.
fn split_chain_address(query: &str) -> Option<(&str, &str)> {
    let (chain, address) = query.split_once(':')?;
    let (chain, address) = (chain.trim(), address.trim());
    (!chain.is_empty() && !address.is_empty()).then_some((chain, address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FixedSearch(Vec<SearchHit>);

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
            Ok(self.0.iter().take(max_results).cloned().collect())
        }
    }

    struct FixedPrice(Option<&'static str>);

    #[async_trait]
    impl PriceProvider for FixedPrice {
        async fn current_price(&self, _asset: &str) -> Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    struct SlowPrice;

    #[async_trait]
    impl PriceProvider for SlowPrice {
        async fn current_price(&self, _asset: &str) -> Result<Option<String>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
    }

    struct Transfers(Result<Vec<LargeTransfer>, &'static str>);

    #[async_trait]
    impl TransferProvider for Transfers {
        async fn large_transfers(
            &self,
            _chain: &str,
            _address: &str,
            limit: usize,
        ) -> Result<Vec<LargeTransfer>> {
            match &self.0 {
                Ok(list) => Ok(list.iter().take(limit).cloned().collect()),
                Err(message) => Err(anyhow!(*message)),
            }
        }
    }

    struct Metrics(usize);

    #[async_trait]
    impl MetricsProvider for Metrics {
        async fn asset_metrics(&self, asset: &str) -> Result<MetricsReport> {
            Ok(MetricsReport {
                asset: asset.to_string(),
                data: (0..self.0)
                    .map(|day| serde_json::json!({ "day": day, "TxCnt": "1000" }))
                    .collect(),
            })
        }
    }

    struct Pages(Option<&'static str>);

    #[async_trait]
    impl PageExtractor for Pages {
        async fn extract(&self, _url: &str) -> Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    fn hit(content: &str, link: Option<&str>) -> SearchHit {
        SearchHit {
            content: content.to_string(),
            link: link.map(str::to_string),
        }
    }

    fn transfer(hash: &str) -> LargeTransfer {
        LargeTransfer {
            hash: hash.to_string(),
            from: "0xfrom".to_string(),
            to: "0xto".to_string(),
            value: 250.0,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn web_search_numbers_snippets_and_dedupes_links() {
        let dispatcher = ToolDispatcher::default().with_search(Arc::new(FixedSearch(vec![
            hit("alpha", Some("https://a")),
            hit("beta", Some("https://a")),
            hit("gamma", Some("https://c")),
            hit("delta", Some("https://d")),
        ])));

        let observation = dispatcher
            .execute(Some(&Action::use_tool(ToolKind::WebSearch, "btc", "")))
            .await;

        assert_eq!(
            observation.content.as_deref(),
            Some("[1] alpha\n[2] beta\n[3] gamma")
        );
        assert_eq!(observation.source.as_deref(), Some("https://a, https://c"));
        assert!(observation.error.is_none());
    }

    #[tokio::test]
    async fn web_search_without_hits_is_not_an_error() {
        let dispatcher = ToolDispatcher::default().with_search(Arc::new(FixedSearch(Vec::new())));
        let observation = dispatcher
            .execute(Some(&Action::use_tool(ToolKind::WebSearch, "nothing", "")))
            .await;
        assert_eq!(observation.content.as_deref(), Some("No web search results found."));
        assert!(!observation.is_error());
    }

    #[tokio::test]
    async fn price_lookup_formats_found_and_missing_prices() {
        let found = ToolDispatcher::default().with_price(Arc::new(FixedPrice(Some("$60,000.00"))));
        let observation = found
            .execute(Some(&Action::use_tool(ToolKind::PriceLookup, "bitcoin", "")))
            .await;
        assert_eq!(
            observation.content.as_deref(),
            Some("Current bitcoin price: $60,000.00")
        );

        let missing = ToolDispatcher::default().with_price(Arc::new(FixedPrice(None)));
        let observation = missing
            .execute(Some(&Action::use_tool(ToolKind::PriceLookup, "dogecoin", "")))
            .await;
        assert_eq!(
            observation.content.as_deref(),
            Some("Could not find price for dogecoin.")
        );
        assert!(!observation.is_error());
    }

    #[tokio::test]
    async fn address_tracker_rejects_malformed_query() {
        let dispatcher =
            ToolDispatcher::default().with_transfers(Arc::new(Transfers(Ok(vec![transfer("0x1")]))));
        let observation = dispatcher
            .execute(Some(&Action::use_tool(ToolKind::AddressTracker, "0xabc", "")))
            .await;
        assert_eq!(
            observation.content.as_deref(),
            Some("Invalid query format for AddressTracker: '0xabc'.")
        );
        assert_eq!(observation.error.as_deref(), Some("Invalid query format"));
    }

    #[tokio::test]
    async fn address_tracker_summarises_and_attaches_raw() {
        let dispatcher = ToolDispatcher::default().with_transfers(Arc::new(Transfers(Ok(vec![
            transfer("0x1"),
            transfer("0x2"),
        ]))));
        let observation = dispatcher
            .execute(Some(&Action::use_tool(ToolKind::AddressTracker, "eth:0xabc", "")))
            .await;
        assert_eq!(
            observation.content.as_deref(),
            Some("Found 2 large transfers for eth:0xabc.")
        );
        let raw = observation.raw.expect("raw payload");
        assert_eq!(raw["transfers"].as_array().map(Vec::len), Some(2));

        let failing =
            ToolDispatcher::default().with_transfers(Arc::new(Transfers(Err("unsupported chain"))));
        let observation = failing
            .execute(Some(&Action::use_tool(ToolKind::AddressTracker, "sol:abc", "")))
            .await;
        assert_eq!(
            observation.content.as_deref(),
            Some("AddressTracker failed: unsupported chain")
        );
        assert!(observation.is_error());
    }

    #[tokio::test]
    async fn onchain_metrics_keeps_payload_out_of_content() {
        let dispatcher = ToolDispatcher::default().with_metrics(Arc::new(Metrics(30)));
        let observation = dispatcher
            .execute(Some(&Action::use_tool(ToolKind::OnChainMetrics, "  BTC ", "")))
            .await;
        let content = observation.content.clone().unwrap_or_default();
        assert!(content.starts_with("On-chain metrics for btc: Found 30 days data"));
        assert!(!content.contains("TxCnt\":"));
        assert_eq!(observation.raw.as_ref().map(|raw| raw["asset"].clone()), Some("btc".into()));
    }

    #[tokio::test]
    async fn url_extractor_failure_references_url() {
        let dispatcher = ToolDispatcher::default().with_extractor(Arc::new(Pages(None)));
        let observation = dispatcher
            .execute(Some(&Action::use_tool(
                ToolKind::UrlExtractor,
                "https://example.org/post",
                "",
            )))
            .await;
        assert_eq!(
            observation.content.as_deref(),
            Some("Failed to extract content from URL: https://example.org/post")
        );
        assert_eq!(observation.source.as_deref(), Some("https://example.org/post"));
        assert_eq!(observation.error.as_deref(), Some("Extraction failed"));
    }

    #[tokio::test]
    async fn unknown_unconfigured_and_skipped_cases() {
        let dispatcher = ToolDispatcher::default();

        let unknown = Action::normalize(crate::model::ProposedAction {
            tool_name: Some("Oracle".into()),
            query: Some("future".into()),
            ..Default::default()
        });
        let observation = dispatcher.execute(Some(&unknown)).await;
        assert_eq!(observation.content.as_deref(), Some("Error: Unknown tool 'Oracle'."));
        assert_eq!(observation.error.as_deref(), Some("Unknown tool"));

        let observation = dispatcher
            .execute(Some(&Action::use_tool(ToolKind::PriceLookup, "eth", "")))
            .await;
        assert_eq!(observation.error.as_deref(), Some("tool not configured"));
        assert_eq!(
            observation.content.as_deref(),
            Some("Error executing tool 'PriceLookup' with query 'eth': tool not configured")
        );

        assert!(dispatcher.execute(None).await.is_skipped());
        assert!(dispatcher.execute(Some(&Action::finish("done"))).await.is_skipped());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out_into_error_observation() {
        let dispatcher = ToolDispatcher::new(ToolSettings {
            timeout: Duration::from_millis(100),
            ..ToolSettings::default()
        })
        .with_price(Arc::new(SlowPrice));

        let observation = dispatcher
            .execute(Some(&Action::use_tool(ToolKind::PriceLookup, "btc", "")))
            .await;
        assert_eq!(observation.error.as_deref(), Some("PriceLookup timed out after 100 ms"));
    }

    #[test]
    fn chain_address_split_uses_first_colon() {
        assert_eq!(split_chain_address("eth: 0xabc"), Some(("eth", "0xabc")));
        assert_eq!(split_chain_address("btc:bc1:x"), Some(("btc", "bc1:x")));
        assert_eq!(split_chain_address("eth:"), None);
        assert_eq!(split_chain_address("plain"), None);
    }
}
