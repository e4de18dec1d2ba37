//! Position lifecycle engine
//!
//! The poll loop that owns the bot state. Each tick reads the venue once
//! and walks the lifecycle: halt and backoff guards, the daily-loss
//! ceiling, then either open-position management (protection, ladder
//! bookkeeping, stop ratcheting, backstops) or the flat path
//! (reconciliation and entry evaluation). The engine is the only writer
//! of the persisted state document.

mod entry;
mod protection;
mod reconcile;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::events::{CloseReason, TradeEvent, TradeLog};
use crate::gateway::{
    ExchangeGateway, FillKind, MarketFillReport, OrderId, TriggerKind, VenueFill,
};
use crate::notify::TelegramNotifier;
use crate::risk::PositionSizer;
use crate::signal::{Side, SignalSource};
use crate::state::{BotState, StateStore};
use crate::telemetry::{inc_counter, set_gauge, CounterMetric, GaugeMetric};

const MS_PER_DAY: i64 = 86_400_000;
const BACKOFF_BASE_MS: i64 = 5_000;
const BACKOFF_CAP_MS: i64 = 120_000;
const MAX_ERR_STREAK: u32 = 20;
/// Fill-cursor bootstrap window when no cursor is persisted
const FILL_BOOTSTRAP_MS: i64 = 5 * 60 * 1_000;

/// The lifecycle state machine for one instrument
pub struct Engine {
    config: Config,
    gateway: Arc<dyn ExchangeGateway>,
    signal_source: Box<dyn SignalSource>,
    sizer: Box<dyn PositionSizer>,
    store: StateStore,
    trade_log: TradeLog,
    notifier: Arc<TelegramNotifier>,
    state: BotState,
}

impl Engine {
    /// Build an engine, resuming any persisted state from the data directory.
    pub fn new(
        config: Config,
        gateway: Arc<dyn ExchangeGateway>,
        signal_source: Box<dyn SignalSource>,
        sizer: Box<dyn PositionSizer>,
        notifier: Arc<TelegramNotifier>,
    ) -> anyhow::Result<Self> {
        let store = StateStore::new(&config.data.dir);
        let trade_log = TradeLog::new(&config.data.dir);
        let state = store.load()?.unwrap_or_default();
        if state.halted {
            warn!("Resuming with the daily-loss halt latched; edit or remove the state file to trade again");
        }
        if let Some(plan) = &state.plan {
            info!(side = %plan.side, entry = %plan.entry_price, "Resuming with an open position plan");
        }
        Ok(Self {
            config,
            gateway,
            signal_source,
            sizer,
            store,
            trade_log,
            notifier,
            state,
        })
    }

    pub fn state(&self) -> &BotState {
        &self.state
    }

    /// Poll forever. A failed tick backs off exponentially and is retried;
    /// only runtime teardown stops the loop.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let poll = Duration::from_secs(self.config.signal.poll_secs.max(1));
        info!(
            coin = %self.config.market.coin,
            poll_secs = poll.as_secs(),
            sizing = self.sizer.mode_name(),
            "Engine starting"
        );
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.tick().await {
                Ok(()) => {
                    inc_counter(CounterMetric::Ticks);
                    if self.state.err_streak != 0 {
                        self.state.err_streak = 0;
                        self.persist();
                    }
                    set_gauge(GaugeMetric::ErrStreak, 0.0);
                }
                Err(e) => self.on_tick_error(&e),
            }
        }
    }

    /// One pass of the lifecycle loop.
    pub async fn tick(&mut self) -> anyhow::Result<()> {
        if self.state.halted {
            debug!("Halt latch set; idle");
            return Ok(());
        }
        let now = Utc::now().timestamp_millis();
        if now < self.state.backoff_until_ms {
            debug!(until_ms = self.state.backoff_until_ms, "Backing off");
            return Ok(());
        }
        let cooldown_ms = self.config.risk.action_cooldown_secs as i64 * 1_000;
        if now - self.state.last_action_ms < cooldown_ms {
            return Ok(());
        }

        debug!(coin = %self.config.market.coin, "Polling");

        let mid = self.gateway.mid_price().await?;
        let equity = self.gateway.account_value().await?;
        set_gauge(GaugeMetric::Equity, decimal_f64(equity));

        let daily = self.daily_pnl(now).await?;
        set_gauge(GaugeMetric::DailyPnl, decimal_f64(daily));
        let loss_limit = self.config.risk.max_daily_loss_usd.abs();
        if daily < -loss_limit {
            self.halt_for_daily_loss(daily, loss_limit, mid, now).await;
            return Ok(());
        }

        match self.gateway.position().await? {
            Some(pos) if pos.size > Decimal::ZERO => {
                set_gauge(GaugeMetric::PositionSize, decimal_f64(pos.size));
                self.manage_position(&pos, mid, now).await?;
                self.ping_new_fills(now).await;
            }
            _ => {
                set_gauge(GaugeMetric::PositionSize, 0.0);
                self.reconcile_external_close(mid, now).await?;
                self.try_enter(mid, equity, now).await?;
                self.ping_new_fills(now).await;
                self.state.last_action_ms = Utc::now().timestamp_millis();
                self.persist();
            }
        }
        Ok(())
    }

    /// Latch the halt, then flatten. The latch is persisted before any venue
    /// call so a crash mid-flatten cannot resume trading past the ceiling.
    async fn halt_for_daily_loss(
        &mut self,
        daily: Decimal,
        limit: Decimal,
        mid: Decimal,
        now_ms: i64,
    ) {
        self.state.halted = true;
        self.persist();
        set_gauge(GaugeMetric::Halted, 1.0);
        error!(daily_pnl = %daily, limit = %limit, "Daily loss ceiling breached; halting");

        self.cancel_reduce_only_orders(true, true).await;
        match self.gateway.position().await {
            Ok(Some(pos)) => {
                self.flatten_position(pos.side, pos.size, CloseReason::DailyHalt, mid, now_ms)
                    .await;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Position read failed during halt"),
        }
        self.notify(format!(
            "SIGNALBOT HALT | daily PnL {:.2} beyond -{:.2} | trading stopped",
            daily, limit
        ));
    }

    /// Realized result since UTC midnight: closed PnL net of every fee paid
    /// today, entry fills included.
    async fn daily_pnl(&self, now_ms: i64) -> anyhow::Result<Decimal> {
        let fills = self.gateway.recent_fills(utc_midnight_ms(now_ms)).await?;
        Ok(net_daily_pnl(&fills))
    }

    /// Walk fills past the cursor: stamp loss cooldowns and ping closes.
    async fn ping_new_fills(&mut self, now_ms: i64) {
        let since = self
            .state
            .fill_cursor_ms
            .unwrap_or(now_ms - FILL_BOOTSTRAP_MS);
        let mut fills = match self.gateway.recent_fills(since).await {
            Ok(fills) => fills,
            Err(e) => {
                debug!(error = %e, "Fill fetch failed");
                return;
            }
        };
        fills.sort_by_key(|f| f.time_ms);
        for fill in fills {
            if fill.time_ms <= self.state.fill_cursor_ms.unwrap_or(0) {
                continue;
            }
            if fill.kind == FillKind::Close {
                let net = fill.net_pnl();
                let is_loss = net < Decimal::ZERO;
                if is_loss {
                    self.state.last_loss_ms = Some(fill.time_ms);
                }
                let tag = if is_loss { "STOP/LOSS" } else { "TP/CLOSE" };
                self.notify(format!(
                    "SIGNALBOT {} | CLOSE {} | {} @ {} | net {:.2} USD | {}",
                    tag,
                    fill.side.as_str().to_uppercase(),
                    fill.size,
                    fill.price,
                    net,
                    fill_clock(fill.time_ms)
                ));
            }
            self.state.fill_cursor_ms = Some(fill.time_ms);
            self.persist();
        }
    }

    /// Close whatever remains at market and converge to flat, recording the
    /// close. The venue call is best-effort: state is reset either way so the
    /// loop does not wedge on a close that already happened.
    pub(crate) async fn flatten_position(
        &mut self,
        side: Side,
        fallback_size: Decimal,
        reason: CloseReason,
        mid: Decimal,
        now_ms: i64,
    ) {
        let report = match self.gateway.market_close(None).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, ?reason, "Market close failed");
                MarketFillReport::default()
            }
        };
        let exit_price = report.avg_price.unwrap_or(mid);
        let exit_size = report.filled_size.unwrap_or(fallback_size);
        let pnl = self
            .state
            .plan
            .as_ref()
            .map(|p| direction_pnl(side, p.entry_price, exit_price, exit_size));
        let event = TradeEvent::close(side, exit_price, exit_size, pnl, reason);
        if let Err(e) = self.trade_log.append(&event) {
            warn!(error = %e, "Trade log append failed");
        }
        inc_counter(CounterMetric::Closes);
        info!(
            %side,
            size = %exit_size,
            price = %exit_price,
            pnl = ?pnl,
            ?reason,
            "Position closed"
        );
        self.state.reset_position();
        self.state.last_exit_ms = Some(now_ms);
        self.persist();
    }

    /// Cancel resting reduce-only triggers, per kind.
    pub(crate) async fn cancel_reduce_only_orders(&self, stops: bool, take_profits: bool) {
        if !stops && !take_profits {
            return;
        }
        let orders = match self.gateway.open_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "Open-order read failed during cancel");
                return;
            }
        };
        let ids: Vec<OrderId> = orders
            .iter()
            .filter(|o| {
                o.reduce_only
                    && match o.kind {
                        TriggerKind::Stop => stops,
                        TriggerKind::TakeProfit => take_profits,
                    }
            })
            .map(|o| o.id)
            .collect();
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.gateway.cancel_orders(&ids).await {
            warn!(error = %e, count = ids.len(), "Order cancel failed");
        }
    }

    fn on_tick_error(&mut self, err: &anyhow::Error) {
        self.state.err_streak = (self.state.err_streak + 1).min(MAX_ERR_STREAK);
        let backoff_ms = backoff_for_streak(self.state.err_streak);
        self.state.backoff_until_ms = Utc::now().timestamp_millis() + backoff_ms;
        inc_counter(CounterMetric::TickErrors);
        set_gauge(GaugeMetric::ErrStreak, self.state.err_streak as f64);
        error!(
            error = %err,
            err_streak = self.state.err_streak,
            backoff_ms,
            "Tick failed; backing off"
        );
        self.persist();
    }

    pub(crate) fn persist(&self) {
        if let Err(e) = self.store.save(&self.state) {
            error!(error = %e, "State persist failed");
        }
    }

    /// Queue a Telegram ping off the tick path. Delivery neither delays nor
    /// fails the tick that produced it.
    pub(crate) fn notify(&self, text: String) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.send(&text).await;
        });
    }
}

/// Exponential backoff for consecutive tick errors, capped at two minutes.
fn backoff_for_streak(streak: u32) -> i64 {
    (BACKOFF_BASE_MS << streak.min(6)).min(BACKOFF_CAP_MS)
}

fn utc_midnight_ms(now_ms: i64) -> i64 {
    now_ms - now_ms.rem_euclid(MS_PER_DAY)
}

/// HH:MM UTC stamp for fill notifications.
fn fill_clock(time_ms: i64) -> String {
    Utc.timestamp_millis_opt(time_ms)
        .single()
        .map(|t| t.format("%H:%M UTC").to_string())
        .unwrap_or_else(|| time_ms.to_string())
}

fn net_daily_pnl(fills: &[VenueFill]) -> Decimal {
    let mut total = Decimal::ZERO;
    for fill in fills {
        if fill.kind == FillKind::Close {
            total += fill.closed_pnl.unwrap_or(Decimal::ZERO);
        }
        total -= fill.fee.unwrap_or(Decimal::ZERO).abs();
    }
    total
}

/// Signed PnL of an exit against an entry.
pub(crate) fn direction_pnl(side: Side, entry: Decimal, exit: Decimal, size: Decimal) -> Decimal {
    match side {
        Side::Long => (exit - entry) * size,
        Side::Short => (entry - exit) * size,
    }
}

pub(crate) fn decimal_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(backoff_for_streak(1), 10_000);
        assert_eq!(backoff_for_streak(2), 20_000);
        assert_eq!(backoff_for_streak(3), 40_000);
        assert_eq!(backoff_for_streak(4), 80_000);
        assert_eq!(backoff_for_streak(5), 120_000);
        assert_eq!(backoff_for_streak(6), 120_000);
        assert_eq!(backoff_for_streak(20), 120_000);
    }

    #[test]
    fn test_utc_midnight_floors_to_day() {
        // 2024-01-15 13:45:30 UTC
        let now = 1_705_326_330_000i64;
        let midnight = utc_midnight_ms(now);
        assert_eq!(midnight % MS_PER_DAY, 0);
        assert!(now - midnight < MS_PER_DAY);
        assert_eq!(midnight, 1_705_276_800_000);
    }

    #[test]
    fn test_fill_clock_formats_utc_minutes() {
        assert_eq!(fill_clock(0), "00:00 UTC");
        // 2024-01-15 13:45:30 UTC
        assert_eq!(fill_clock(1_705_326_330_000), "13:45 UTC");
    }

    #[test]
    fn test_direction_pnl_signs() {
        assert_eq!(
            direction_pnl(Side::Long, dec!(100), dec!(110), dec!(2)),
            dec!(20)
        );
        assert_eq!(
            direction_pnl(Side::Long, dec!(100), dec!(95), dec!(2)),
            dec!(-10)
        );
        assert_eq!(
            direction_pnl(Side::Short, dec!(100), dec!(95), dec!(2)),
            dec!(10)
        );
        assert_eq!(
            direction_pnl(Side::Short, dec!(100), dec!(110), dec!(2)),
            dec!(-20)
        );
    }

    #[test]
    fn test_net_daily_pnl_counts_close_pnl_and_all_fees() {
        let fills = vec![
            VenueFill {
                time_ms: 1,
                side: Side::Long,
                price: dec!(100),
                size: dec!(1),
                closed_pnl: None,
                fee: Some(dec!(0.5)),
                kind: FillKind::Open,
            },
            VenueFill {
                time_ms: 2,
                side: Side::Long,
                price: dec!(110),
                size: dec!(1),
                closed_pnl: Some(dec!(10)),
                fee: Some(dec!(0.6)),
                kind: FillKind::Close,
            },
        ];
        assert_eq!(net_daily_pnl(&fills), dec!(8.9));
    }
}
