//! Hyperliquid info API client
//!
//! Read-only market data over the public `/info` endpoint: mid prices via
//! `allMids` and candle history via `candleSnapshot`.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use super::{CandleInterval, Candles, MarketData};

/// Configuration for the info client
#[derive(Debug, Clone)]
pub struct HyperliquidConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for HyperliquidConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.hyperliquid.xyz".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Client for the Hyperliquid info endpoint
pub struct HyperliquidInfo {
    client: Client,
    config: HyperliquidConfig,
}

impl HyperliquidInfo {
    pub fn new(config: HyperliquidConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, config }
    }

    /// All info queries share one POST shape, differing only in the body
    async fn info<T: DeserializeOwned>(&self, body: serde_json::Value) -> anyhow::Result<T> {
        let url = format!("{}/info", self.config.base_url);
        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Hyperliquid info error: {}", response.status());
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MarketData for HyperliquidInfo {
    async fn mid_price(&self, coin: &str) -> anyhow::Result<Decimal> {
        let mids: HashMap<String, String> = self.info(json!({"type": "allMids"})).await?;
        let raw = mids
            .get(coin)
            .ok_or_else(|| anyhow::anyhow!("No mid price for {}", coin))?;
        parse_px(raw)
    }

    async fn candles(
        &self,
        coin: &str,
        interval: CandleInterval,
        lookback: chrono::Duration,
    ) -> anyhow::Result<Candles> {
        let end = Utc::now().timestamp_millis();
        let start = end - lookback.num_milliseconds();
        let body = json!({
            "type": "candleSnapshot",
            "req": {
                "coin": coin,
                "interval": interval.as_str(),
                "startTime": start,
                "endTime": end,
            },
        });
        let wire: Vec<WireCandle> = self.info(body).await?;
        candles_from_wire(&wire)
    }
}

fn parse_px(raw: &str) -> anyhow::Result<Decimal> {
    raw.parse::<Decimal>()
        .map_err(|e| anyhow::anyhow!("Bad price '{}': {}", raw, e))
}

fn candles_from_wire(wire: &[WireCandle]) -> anyhow::Result<Candles> {
    let mut candles = Candles::default();
    for c in wire {
        candles.closes.push(parse_px(&c.close)?);
        candles.highs.push(parse_px(&c.high)?);
        candles.lows.push(parse_px(&c.low)?);
    }
    Ok(candles)
}

/// Candle as returned by `candleSnapshot`; prices arrive as strings
#[derive(Debug, Deserialize)]
struct WireCandle {
    /// Open time in epoch millis
    #[serde(rename = "t")]
    #[allow(dead_code)]
    open_time: i64,
    #[serde(rename = "o")]
    #[allow(dead_code)]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
}
