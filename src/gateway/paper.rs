//! Paper trading gateway
//!
//! Keeps a simulated book (position, resting triggers, fills, cash) on top
//! of any `MarketData` feed. Trigger orders fire when a new mark crosses
//! them, the same way the venue's native stop and take-profit orders would,
//! so the lifecycle engine runs unmodified against it.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::ExecutionConfig;
use crate::market::{CandleInterval, Candles, MarketData};
use crate::signal::Side;

use super::types::{
    FillKind, MarketFillReport, OpenOrder, OrderId, PositionSnapshot, TriggerKind, VenueFill,
};
use super::ExchangeGateway;

#[derive(Debug, Clone, Copy)]
struct PaperPosition {
    side: Side,
    size: Decimal,
    entry_price: Decimal,
}

#[derive(Debug, Clone)]
struct PaperTrigger {
    id: OrderId,
    kind: TriggerKind,
    trigger_price: Decimal,
    size: Decimal,
}

struct PaperBook {
    mark: Decimal,
    cash: Decimal,
    position: Option<PaperPosition>,
    triggers: Vec<PaperTrigger>,
    fills: Vec<VenueFill>,
}

/// Simulated venue for paper runs and tests
pub struct PaperGateway {
    feed: Arc<dyn MarketData>,
    coin: String,
    fee_rate: Decimal,
    slippage: Decimal,
    book: RwLock<PaperBook>,
}

impl PaperGateway {
    pub fn new(feed: Arc<dyn MarketData>, coin: impl Into<String>, config: &ExecutionConfig) -> Self {
        Self {
            feed,
            coin: coin.into(),
            fee_rate: config.fee_rate,
            slippage: config.slippage,
            book: RwLock::new(PaperBook {
                mark: Decimal::ZERO,
                cash: config.initial_equity_usd,
                position: None,
                triggers: Vec::new(),
                fills: Vec::new(),
            }),
        }
    }

    fn sweep(&self, book: &mut PaperBook, now_ms: i64) {
        let Some(mut pos) = book.position else {
            return;
        };
        let mut fired: Vec<PaperTrigger> = book
            .triggers
            .iter()
            .filter(|t| crossed(t.kind, pos.side, book.mark, t.trigger_price))
            .cloned()
            .collect();
        // Stops fill before take-profits when a single mark crosses both
        fired.sort_by_key(|t| match t.kind {
            TriggerKind::Stop => 0,
            TriggerKind::TakeProfit => 1,
        });
        for trigger in fired {
            if pos.size <= Decimal::ZERO {
                break;
            }
            let fill_size = trigger.size.min(pos.size);
            let price = self.exit_price(pos.side, trigger.trigger_price);
            let realized = realized_pnl(pos.side, pos.entry_price, price, fill_size);
            let fee = price * fill_size * self.fee_rate;
            book.cash += realized - fee;
            book.fills.push(VenueFill {
                time_ms: now_ms,
                side: pos.side,
                price,
                size: fill_size,
                closed_pnl: Some(realized),
                fee: Some(fee),
                kind: FillKind::Close,
            });
            book.triggers.retain(|t| t.id != trigger.id);
            pos.size -= fill_size;
        }
        if pos.size <= Decimal::ZERO {
            book.position = None;
            book.triggers.clear();
        } else {
            book.position = Some(pos);
        }
    }

    /// Exit fills pay adverse slippage relative to their reference price
    fn exit_price(&self, side: Side, reference: Decimal) -> Decimal {
        match side {
            Side::Long => reference * (Decimal::ONE - self.slippage),
            Side::Short => reference * (Decimal::ONE + self.slippage),
        }
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn mid_price(&self) -> anyhow::Result<Decimal> {
        let price = self.feed.mid_price(&self.coin).await?;
        let mut book = self.book.write().await;
        book.mark = price;
        self.sweep(&mut book, now_ms());
        Ok(price)
    }

    async fn position(&self) -> anyhow::Result<Option<PositionSnapshot>> {
        let book = self.book.read().await;
        Ok(book.position.map(|p| PositionSnapshot {
            side: p.side,
            size: p.size,
            entry_price: p.entry_price,
        }))
    }

    async fn open_orders(&self) -> anyhow::Result<Vec<OpenOrder>> {
        let book = self.book.read().await;
        Ok(book
            .triggers
            .iter()
            .map(|t| OpenOrder {
                id: t.id,
                kind: t.kind,
                trigger_price: t.trigger_price,
                size: t.size,
                reduce_only: true,
            })
            .collect())
    }

    async fn place_market(&self, side: Side, size: Decimal) -> anyhow::Result<MarketFillReport> {
        if size <= Decimal::ZERO {
            anyhow::bail!("Market order size must be positive: {}", size);
        }
        let mut book = self.book.write().await;
        if book.mark.is_zero() {
            book.mark = self.feed.mid_price(&self.coin).await?;
        }
        let price = match side {
            Side::Long => book.mark * (Decimal::ONE + self.slippage),
            Side::Short => book.mark * (Decimal::ONE - self.slippage),
        };
        let fee = price * size * self.fee_rate;
        match book.position {
            None => {
                book.cash -= fee;
                book.position = Some(PaperPosition {
                    side,
                    size,
                    entry_price: price,
                });
                book.fills.push(VenueFill {
                    time_ms: now_ms(),
                    side,
                    price,
                    size,
                    closed_pnl: None,
                    fee: Some(fee),
                    kind: FillKind::Open,
                });
            }
            Some(pos) if pos.side == side => {
                let total = pos.size + size;
                let entry = (pos.entry_price * pos.size + price * size) / total;
                book.cash -= fee;
                book.position = Some(PaperPosition {
                    side,
                    size: total,
                    entry_price: entry,
                });
                book.fills.push(VenueFill {
                    time_ms: now_ms(),
                    side,
                    price,
                    size,
                    closed_pnl: None,
                    fee: Some(fee),
                    kind: FillKind::Open,
                });
            }
            Some(mut pos) => {
                // Netting: an opposite-side order reduces, never flips
                if size > pos.size {
                    anyhow::bail!(
                        "Netting order size {} exceeds position size {}",
                        size,
                        pos.size
                    );
                }
                let realized = realized_pnl(pos.side, pos.entry_price, price, size);
                book.cash += realized - fee;
                book.fills.push(VenueFill {
                    time_ms: now_ms(),
                    side: pos.side,
                    price,
                    size,
                    closed_pnl: Some(realized),
                    fee: Some(fee),
                    kind: FillKind::Close,
                });
                pos.size -= size;
                if pos.size <= Decimal::ZERO {
                    book.position = None;
                    book.triggers.clear();
                } else {
                    book.position = Some(pos);
                }
            }
        }
        Ok(MarketFillReport {
            avg_price: Some(price),
            filled_size: Some(size),
        })
    }

    async fn place_trigger(
        &self,
        kind: TriggerKind,
        trigger_price: Decimal,
        size: Decimal,
    ) -> anyhow::Result<OrderId> {
        if size <= Decimal::ZERO || trigger_price <= Decimal::ZERO {
            anyhow::bail!("Trigger price and size must be positive");
        }
        let mut book = self.book.write().await;
        if book.position.is_none() {
            anyhow::bail!("Reduce-only trigger with no open position");
        }
        let id = OrderId::new_v4();
        book.triggers.push(PaperTrigger {
            id,
            kind,
            trigger_price,
            size,
        });
        // A trigger already crossed at the current mark fires immediately
        self.sweep(&mut book, now_ms());
        Ok(id)
    }

    async fn cancel_orders(&self, ids: &[OrderId]) -> anyhow::Result<()> {
        let mut book = self.book.write().await;
        book.triggers.retain(|t| !ids.contains(&t.id));
        Ok(())
    }

    async fn market_close(&self, size: Option<Decimal>) -> anyhow::Result<MarketFillReport> {
        let mut book = self.book.write().await;
        let Some(mut pos) = book.position else {
            anyhow::bail!("No open position to close");
        };
        let close_size = size.unwrap_or(pos.size).min(pos.size);
        if close_size <= Decimal::ZERO {
            anyhow::bail!("Close size must be positive: {}", close_size);
        }
        let price = self.exit_price(pos.side, book.mark);
        let realized = realized_pnl(pos.side, pos.entry_price, price, close_size);
        let fee = price * close_size * self.fee_rate;
        book.cash += realized - fee;
        book.fills.push(VenueFill {
            time_ms: now_ms(),
            side: pos.side,
            price,
            size: close_size,
            closed_pnl: Some(realized),
            fee: Some(fee),
            kind: FillKind::Close,
        });
        pos.size -= close_size;
        if pos.size <= Decimal::ZERO {
            book.position = None;
            book.triggers.clear();
        } else {
            book.position = Some(pos);
        }
        Ok(MarketFillReport {
            avg_price: Some(price),
            filled_size: Some(close_size),
        })
    }

    async fn account_value(&self) -> anyhow::Result<Decimal> {
        let book = self.book.read().await;
        let unrealized = book
            .position
            .map(|p| realized_pnl(p.side, p.entry_price, book.mark, p.size))
            .unwrap_or(Decimal::ZERO);
        Ok(book.cash + unrealized)
    }

    async fn recent_fills(&self, since_ms: i64) -> anyhow::Result<Vec<VenueFill>> {
        let book = self.book.read().await;
        Ok(book
            .fills
            .iter()
            .filter(|f| f.time_ms >= since_ms)
            .copied()
            .collect())
    }

    async fn candles(
        &self,
        interval: CandleInterval,
        lookback: chrono::Duration,
    ) -> anyhow::Result<Candles> {
        self.feed.candles(&self.coin, interval, lookback).await
    }
}

fn crossed(kind: TriggerKind, side: Side, mark: Decimal, trigger: Decimal) -> bool {
    match (kind, side) {
        (TriggerKind::Stop, Side::Long) => mark <= trigger,
        (TriggerKind::Stop, Side::Short) => mark >= trigger,
        (TriggerKind::TakeProfit, Side::Long) => mark >= trigger,
        (TriggerKind::TakeProfit, Side::Short) => mark <= trigger,
    }
}

fn realized_pnl(side: Side, entry: Decimal, exit: Decimal, size: Decimal) -> Decimal {
    match side {
        Side::Long => (exit - entry) * size,
        Side::Short => (entry - exit) * size,
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
