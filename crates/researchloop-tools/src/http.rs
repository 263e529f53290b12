use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("researchloop/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to create HTTP client")
}

/// Send a request and decode the JSON body, surfacing non-2xx statuses with
/// the start of the response text.
pub(crate) async fn send_json<T: DeserializeOwned>(
    service: &str,
    request: reqwest::RequestBuilder,
) -> Result<T> {
    let response = request
        .send()
        .await
        .with_context(|| format!("{service} request failed"))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .with_context(|| format!("failed to read {service} response"))?;
    if !status.is_success() {
        let snippet: String = text.chars().take(200).collect();
        bail!("{service} returned HTTP {}: {snippet}", status.as_u16());
    }
    serde_json::from_str(&text).with_context(|| format!("failed to parse {service} JSON"))
}
