//! Coin Metrics community API: daily asset metrics over a trailing window.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use researchloop_core::{MetricsProvider, MetricsReport};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::http::send_json;

const BASE_URL: &str = "https://community-api.coinmetrics.io/v4";
/// Trailing window of daily rows requested per lookup.
const WINDOW_DAYS: i64 = 30;

pub const DEFAULT_METRICS: [&str; 5] = ["AdrActCnt", "TxCnt", "FeeTotNtv", "SplyCur", "PriceUSD"];

#[derive(Debug, Deserialize)]
struct MetricsResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CoinMetricsClient {
    http: reqwest::Client,
}

impl CoinMetricsClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn query(asset: &str, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
        let start = now - Duration::days(WINDOW_DAYS);
        vec![
            ("assets", asset.to_string()),
            ("metrics", DEFAULT_METRICS.join(",")),
            ("frequency", "1d".to_string()),
            ("start_time", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("end_time", now.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("page_size", "1000".to_string()),
        ]
    }
}

fn into_report(asset: &str, response: MetricsResponse) -> Result<MetricsReport> {
    if let Some(error) = response.error {
        bail!(
            "Coin Metrics error ({}): {}",
            error.kind.as_deref().unwrap_or("unknown"),
            error.message.as_deref().unwrap_or("no message")
        );
    }
    Ok(MetricsReport {
        asset: asset.to_string(),
        data: response.data,
    })
}

#[async_trait]
impl MetricsProvider for CoinMetricsClient {
    #[instrument(name = "coinmetrics.asset_metrics", skip(self))]
    async fn asset_metrics(&self, asset: &str) -> Result<MetricsReport> {
        let asset = asset.trim().to_lowercase();
        let request = self
            .http
            .get(format!("{BASE_URL}/timeseries/asset-metrics"))
            .query(&Self::query(&asset, Utc::now()));
        let response: MetricsResponse = send_json("Coin Metrics", request).await?;
        let report = into_report(&asset, response)?;
        debug!(rows = report.data.len(), "asset metrics fetched");
        Ok(report)
    }
}
