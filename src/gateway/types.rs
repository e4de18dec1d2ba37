//! Gateway data types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::Side;

/// Unique order identifier
pub type OrderId = Uuid;

/// Kind of resting trigger order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Stop,
    TakeProfit,
}

/// Open position as reported by the venue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSnapshot {
    pub side: Side,
    /// Absolute size in coin units
    pub size: Decimal,
    pub entry_price: Decimal,
}

/// Resting order as reported by the venue
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub id: OrderId,
    pub kind: TriggerKind,
    pub trigger_price: Decimal,
    pub size: Decimal,
    pub reduce_only: bool,
}

/// Venue response to a market order. Fields are optional because some
/// venues acknowledge without echoing fill details; callers fall back to
/// their own estimates.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketFillReport {
    pub avg_price: Option<Decimal>,
    pub filled_size: Option<Decimal>,
}

/// Whether a fill opened or closed position exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillKind {
    Open,
    Close,
}

/// A single execution reported by the venue
#[derive(Debug, Clone, Copy)]
pub struct VenueFill {
    pub time_ms: i64,
    /// Direction of the position this fill opened or closed
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    /// Realized PnL, present on close fills
    pub closed_pnl: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub kind: FillKind,
}

impl VenueFill {
    /// Net realized result after fees, zero for open fills
    pub fn net_pnl(&self) -> Decimal {
        self.closed_pnl.unwrap_or(Decimal::ZERO) - self.fee.unwrap_or(Decimal::ZERO)
    }
}
