//! Market data module
//!
//! Candle history and mid prices, served either live from the Hyperliquid
//! info endpoint or from a seeded synthetic walk for paper runs

mod hyperliquid;
mod synthetic;

pub use hyperliquid::{HyperliquidConfig, HyperliquidInfo};
pub use synthetic::SyntheticFeed;

use async_trait::async_trait;
use rust_decimal::Decimal;

/// Candle interval understood by the data sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleInterval {
    M15,
    H1,
}

impl CandleInterval {
    /// Wire name used by the venue API
    pub fn as_str(self) -> &'static str {
        match self {
            CandleInterval::M15 => "15m",
            CandleInterval::H1 => "1h",
        }
    }

    pub fn millis(self) -> i64 {
        match self {
            CandleInterval::M15 => 15 * 60 * 1000,
            CandleInterval::H1 => 60 * 60 * 1000,
        }
    }
}

/// Close/high/low series in ascending time order, oldest first.
/// The last element is the forming candle.
#[derive(Debug, Clone, Default)]
pub struct Candles {
    pub closes: Vec<Decimal>,
    pub highs: Vec<Decimal>,
    pub lows: Vec<Decimal>,
}

impl Candles {
    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }
}

/// Trait for candle and mid-price providers
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Latest mid price for the coin
    async fn mid_price(&self, coin: &str) -> anyhow::Result<Decimal>;
    /// Candle history covering `lookback` up to now
    async fn candles(
        &self,
        coin: &str,
        interval: CandleInterval,
        lookback: chrono::Duration,
    ) -> anyhow::Result<Candles>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_wire_names() {
        assert_eq!(CandleInterval::M15.as_str(), "15m");
        assert_eq!(CandleInterval::H1.as_str(), "1h");
    }

    #[test]
    fn test_interval_millis() {
        assert_eq!(CandleInterval::M15.millis(), 900_000);
        assert_eq!(CandleInterval::H1.millis(), 3_600_000);
    }
}
