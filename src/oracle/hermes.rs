//! Pyth Hermes REST client for historical price updates
//!
//! Endpoint: GET {base}/v2/updates/price/{publish_time}?ids[]={feed}&parsed=true

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{feed_id, normalize_price, OracleError, PriceOracle};

#[derive(Debug, Deserialize)]
struct HermesUpdate {
    #[serde(default)]
    parsed: Vec<ParsedPriceUpdate>,
}

#[derive(Debug, Deserialize)]
struct ParsedPriceUpdate {
    id: String,
    price: HermesPrice,
}

#[derive(Debug, Deserialize)]
struct HermesPrice {
    /// Mantissa as a decimal string
    price: String,
    expo: i32,
    publish_time: i64,
}

/// Snapshot-price client backed by Pyth Hermes
pub struct HermesClient {
    client: Client,
    base_url: String,
}

impl HermesClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn update_url(&self, timestamp: u64) -> String {
        format!("{}/v2/updates/price/{}", self.base_url, timestamp)
    }

    /// Extract `(mantissa, expo)` for `feed` from a Hermes response body.
    fn parse_update(body: &str, feed: &str) -> Result<(i64, i32), OracleError> {
        let update: HermesUpdate = serde_json::from_str(body)
            .map_err(|e| OracleError::Parse(format!("invalid JSON: {}", e)))?;

        let entry = update
            .parsed
            .into_iter()
            .find(|p| p.id.trim_start_matches("0x").eq_ignore_ascii_case(feed))
            .ok_or_else(|| OracleError::Parse(format!("no update for feed {}", feed)))?;

        let mantissa = entry
            .price
            .price
            .parse::<i64>()
            .map_err(|e| OracleError::Parse(format!("invalid price '{}': {}", entry.price.price, e)))?;

        tracing::debug!(
            feed = %feed,
            mantissa = mantissa,
            expo = entry.price.expo,
            publish_time = entry.price.publish_time,
            "Parsed Hermes price update"
        );

        Ok((mantissa, entry.price.expo))
    }
}

#[async_trait]
impl PriceOracle for HermesClient {
    async fn snapshot_price(&self, asset: &str, timestamp: u64) -> Result<u128, OracleError> {
        let feed = feed_id(asset).ok_or_else(|| OracleError::AssetNotRegistered(asset.to_string()))?;

        tracing::info!(asset = %asset, timestamp = timestamp, "Fetching snapshot price");

        let response = self
            .client
            .get(self.update_url(timestamp))
            .query(&[("ids[]", feed), ("parsed", "true")])
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Network(format!("Hermes returned {}: {}", status, body)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;
        let (mantissa, expo) = Self::parse_update(&body, feed)?;
        let price = normalize_price(mantissa, expo)?;

        tracing::info!(asset = %asset, timestamp = timestamp, price = %price, "Snapshot price resolved");
        Ok(price)
    }
}
