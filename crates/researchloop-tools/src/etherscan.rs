//! Large native-ETH transfers for one address via Etherscan.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use researchloop_core::{LargeTransfer, SecretValue, TransferProvider};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::http::send_json;

const BASE_URL: &str = "https://api.etherscan.io/v2/api";
const WEI_PER_ETH: f64 = 1e18;
/// Most recent transactions scanned per lookup.
const SCAN_WINDOW: usize = 50;

#[derive(Debug, Deserialize)]
struct TxListResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    value: String,
    #[serde(rename = "timeStamp", default)]
    timestamp: String,
}

pub struct EtherscanTracker {
    http: reqwest::Client,
    api_key: SecretValue,
    threshold_eth: f64,
}

impl EtherscanTracker {
    pub fn new(http: reqwest::Client, api_key: SecretValue) -> Self {
        Self {
            http,
            api_key,
            threshold_eth: 100.0,
        }
    }

    pub fn with_threshold(mut self, threshold_eth: f64) -> Self {
        self.threshold_eth = threshold_eth;
        self
    }
}

impl std::fmt::Debug for EtherscanTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtherscanTracker")
            .field("threshold_eth", &self.threshold_eth)
            .finish_non_exhaustive()
    }
}

fn is_ethereum(chain: &str) -> bool {
    matches!(chain.trim().to_lowercase().as_str(), "eth" | "ethereum")
}

fn large_transfers_from(
    response: TxListResponse,
    threshold_eth: f64,
    limit: usize,
) -> Result<Vec<LargeTransfer>> {
    if response.status != "1" {
        if response.message.starts_with("No transactions found") {
            return Ok(Vec::new());
        }
        let detail = response.result.as_str().unwrap_or_default();
        bail!("Etherscan error: {} {detail}", response.message);
    }

    let txs: Vec<RawTx> = serde_json::from_value(response.result)
        .map_err(|err| anyhow!("unexpected Etherscan result: {err}"))?;
    let threshold_wei = threshold_eth * WEI_PER_ETH;

    Ok(txs
        .into_iter()
        .filter_map(|tx| {
            let wei: u128 = tx.value.parse().ok()?;
            let wei = wei as f64;
            if wei < threshold_wei {
                return None;
            }
            Some(LargeTransfer {
                hash: tx.hash,
                from: tx.from,
                to: tx.to,
                value: wei / WEI_PER_ETH,
                timestamp: tx.timestamp.parse().ok(),
            })
        })
        .take(limit)
        .collect())
}

#[async_trait]
impl TransferProvider for EtherscanTracker {
    #[instrument(name = "etherscan.large_transfers", skip(self))]
    async fn large_transfers(
        &self,
        chain: &str,
        address: &str,
        limit: usize,
    ) -> Result<Vec<LargeTransfer>> {
        if !is_ethereum(chain) {
            bail!("unsupported chain '{chain}'; only eth is tracked");
        }
        let window = SCAN_WINDOW.to_string();
        let request = self.http.get(BASE_URL).query(&[
            ("chainid", "1"),
            ("module", "account"),
            ("action", "txlist"),
            ("address", address),
            ("startblock", "0"),
            ("endblock", "99999999"),
            ("page", "1"),
            ("offset", window.as_str()),
            ("sort", "desc"),
            ("apikey", self.api_key.expose()),
        ]);
        let response: TxListResponse = send_json("Etherscan", request).await?;
        let transfers = large_transfers_from(response, self.threshold_eth, limit)?;
        debug!(found = transfers.len(), "large transfers scanned");
        Ok(transfers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(raw: &str) -> TxListResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn only_transfers_above_threshold_are_kept() {
        let raw = r#"{"status": "1", "message": "OK", "result": [
            {"hash": "0xaaa", "from": "0x1", "to": "0x2", "value": "250000000000000000000", "timeStamp": "1717000000"},
            {"hash": "0xbbb", "from": "0x1", "to": "0x3", "value": "5000000000000000000", "timeStamp": "1716990000"},
            {"hash": "0xccc", "from": "0x4", "to": "0x1", "value": "100000000000000000000", "timeStamp": "bad"}
        ]}"#;
        let transfers = large_transfers_from(response(raw), 100.0, 5).unwrap();

        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].hash, "0xaaa");
        assert_eq!(transfers[0].value, 250.0);
        assert_eq!(transfers[0].timestamp, Some(1_717_000_000));
        assert_eq!(transfers[1].hash, "0xccc");
        assert_eq!(transfers[1].timestamp, None);
    }

    #[test]
    fn limit_caps_the_result() {
        let raw = r#"{"status": "1", "message": "OK", "result": [
            {"hash": "0x1", "value": "200000000000000000000"},
            {"hash": "0x2", "value": "300000000000000000000"}
        ]}"#;
        let transfers = large_transfers_from(response(raw), 100.0, 1).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].hash, "0x1");
    }

    #[test]
    fn empty_history_is_not_an_error() {
        let raw = r#"{"status": "0", "message": "No transactions found", "result": []}"#;
        assert!(large_transfers_from(response(raw), 100.0, 5).unwrap().is_empty());
    }

    #[test]
    fn api_errors_surface_the_message() {
        let raw = r#"{"status": "0", "message": "NOTOK", "result": "Invalid API Key"}"#;
        let err = large_transfers_from(response(raw), 100.0, 5).unwrap_err();
        assert_eq!(err.to_string(), "Etherscan error: NOTOK Invalid API Key");
    }

    #[tokio::test]
    async fn other_chains_are_unsupported() {
        let tracker = EtherscanTracker::new(reqwest::Client::new(), SecretValue::new("k"));
        let err = tracker.large_transfers("btc", "bc1q", 5).await.unwrap_err();
        assert!(err.to_string().contains("unsupported chain 'btc'"));
    }
}
