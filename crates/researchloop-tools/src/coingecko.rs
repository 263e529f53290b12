use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use researchloop_core::PriceProvider;
use tracing::{info, instrument};

use crate::http::send_json;

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

type PriceTable = HashMap<String, HashMap<String, f64>>;

/// Map common names and tickers to CoinGecko ids; anything else is passed through.
pub fn coin_id(asset: &str) -> String {
    let key = asset.trim().to_lowercase();
    let id = match key.as_str() {
        "bitcoin" | "btc" => "bitcoin",
        "ethereum" | "eth" => "ethereum",
        "litecoin" | "ltc" => "litecoin",
        "solana" | "sol" => "solana",
        "dogecoin" | "doge" => "dogecoin",
        _ => return key,
    };
    id.to_string()
}

/// Render a USD amount as `$12,345.67`.
pub fn format_usd(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u128;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (idx, digit) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

#[derive(Debug, Clone)]
pub struct CoinGeckoPrices {
    http: reqwest::Client,
}

impl CoinGeckoPrices {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn lookup(table: &PriceTable, id: &str) -> Option<String> {
    table.get(id)?.get("usd").copied().map(format_usd)
}

#[async_trait]
impl PriceProvider for CoinGeckoPrices {
    #[instrument(name = "coingecko.price", skip(self))]
    async fn current_price(&self, asset: &str) -> Result<Option<String>> {
        let id = coin_id(asset);
        let request = self
            .http
            .get(format!("{BASE_URL}/simple/price"))
            .query(&[("ids", id.as_str()), ("vs_currencies", "usd")]);
        let table: PriceTable = send_json("CoinGecko", request).await?;
        let price = lookup(&table, &id);
        if price.is_none() {
            info!(%id, "price not found in response");
        }
        Ok(price)
    }
}
