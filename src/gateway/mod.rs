//! Exchange gateway module
//!
//! The single seam to the venue: position and order reads, market and
//! trigger order writes, balance, fills, and candle pass-through. The
//! lifecycle engine only ever talks to this trait.

mod paper;
mod types;

pub use paper::PaperGateway;
pub use types::{
    FillKind, MarketFillReport, OpenOrder, OrderId, PositionSnapshot, TriggerKind, VenueFill,
};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::market::{CandleInterval, Candles};
use crate::signal::Side;

/// Venue operations for one instrument
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Current mid price
    async fn mid_price(&self) -> anyhow::Result<Decimal>;

    /// Open position, `None` when flat
    async fn position(&self) -> anyhow::Result<Option<PositionSnapshot>>;

    /// All resting orders for the instrument
    async fn open_orders(&self) -> anyhow::Result<Vec<OpenOrder>>;

    /// Submit a market order; `side` is the direction of exposure the
    /// order adds
    async fn place_market(&self, side: Side, size: Decimal) -> anyhow::Result<MarketFillReport>;

    /// Submit a reduce-only trigger (stop or take-profit) for the open
    /// position
    async fn place_trigger(
        &self,
        kind: TriggerKind,
        trigger_price: Decimal,
        size: Decimal,
    ) -> anyhow::Result<OrderId>;

    /// Cancel the given orders; unknown ids are ignored
    async fn cancel_orders(&self, ids: &[OrderId]) -> anyhow::Result<()>;

    /// Close `size` of the open position at market, or all of it when
    /// `None`
    async fn market_close(&self, size: Option<Decimal>) -> anyhow::Result<MarketFillReport>;

    /// Account equity in USD including unrealized PnL
    async fn account_value(&self) -> anyhow::Result<Decimal>;

    /// Fills at or after `since_ms`, oldest first not guaranteed
    async fn recent_fills(&self, since_ms: i64) -> anyhow::Result<Vec<VenueFill>>;

    /// Candle history for the instrument
    async fn candles(
        &self,
        interval: CandleInterval,
        lookback: chrono::Duration,
    ) -> anyhow::Result<Candles>;
}
