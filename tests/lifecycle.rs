//! Position lifecycle tests against the paper venue
//!
//! Each test drives the engine tick-by-tick with a scripted mid sequence
//! and scripted signals, then checks venue orders, persisted state, and
//! the trade journal.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use hl_signalbot::config::Config;
use hl_signalbot::engine::Engine;
use hl_signalbot::events::{CloseReason, TradeAction, TradeEvent};
use hl_signalbot::gateway::{
    ExchangeGateway, MarketFillReport, OpenOrder, OrderId, PaperGateway, PositionSnapshot,
    TriggerKind, VenueFill,
};
use hl_signalbot::market::{CandleInterval, Candles, MarketData};
use hl_signalbot::notify::TelegramNotifier;
use hl_signalbot::risk::create_sizer;
use hl_signalbot::signal::{Side, Signal, SignalSource};
use hl_signalbot::state::{BotState, LadderRung, PositionPlan, RungTrigger, StateStore};

/// Feed that replays a scripted mid sequence, repeating the last value
struct ScriptedFeed {
    mids: Mutex<VecDeque<Decimal>>,
    last: Mutex<Decimal>,
}

impl ScriptedFeed {
    fn new(mids: &[Decimal]) -> Self {
        Self {
            mids: Mutex::new(mids.iter().copied().collect()),
            last: Mutex::new(*mids.last().expect("at least one mid")),
        }
    }
}

#[async_trait]
impl MarketData for ScriptedFeed {
    async fn mid_price(&self, _coin: &str) -> anyhow::Result<Decimal> {
        let mut mids = self.mids.lock().unwrap();
        match mids.pop_front() {
            Some(mid) => {
                *self.last.lock().unwrap() = mid;
                Ok(mid)
            }
            None => Ok(*self.last.lock().unwrap()),
        }
    }

    async fn candles(
        &self,
        _coin: &str,
        _interval: CandleInterval,
        _lookback: chrono::Duration,
    ) -> anyhow::Result<Candles> {
        Ok(Candles {
            closes: Vec::new(),
            highs: Vec::new(),
            lows: Vec::new(),
        })
    }
}

/// Signal source that pops queued signals, then goes quiet
struct ScriptedSignals {
    queue: Mutex<VecDeque<Signal>>,
}

impl ScriptedSignals {
    fn new(signals: Vec<Signal>) -> Self {
        Self {
            queue: Mutex::new(signals.into()),
        }
    }
}

impl SignalSource for ScriptedSignals {
    fn evaluate(&self, _m15: &Candles, _h1: &Candles, _mid: Decimal) -> Option<Signal> {
        self.queue.lock().unwrap().pop_front()
    }
}

fn long_signal() -> Signal {
    Signal {
        side: Side::Long,
        stop_pct: dec!(0.02),
        reason: "test reclaim long".to_string(),
    }
}

fn short_signal() -> Signal {
    Signal {
        side: Side::Short,
        stop_pct: dec!(0.02),
        reason: "test reclaim short".to_string(),
    }
}

fn test_config(dir: &Path, extra: &str) -> Config {
    let toml = format!(
        r#"
[risk]
action_cooldown_secs = 0
reentry_cooldown_secs = 0
loss_cooldown_mins = 0

[execution]
fee_rate = 0
slippage = 0

[telemetry]
metrics_port = 0

[data]
dir = "{}"

{}
"#,
        dir.display(),
        extra
    );
    toml::from_str(&toml).unwrap()
}

fn build_engine(
    config: Config,
    gateway: Arc<dyn ExchangeGateway>,
    signals: Vec<Signal>,
) -> Engine {
    let sizer = create_sizer(&config.risk);
    Engine::new(
        config,
        gateway,
        Box::new(ScriptedSignals::new(signals)),
        sizer,
        Arc::new(TelegramNotifier::disabled()),
    )
    .unwrap()
}

fn read_journal(dir: &Path) -> Vec<TradeEvent> {
    let raw = fs::read_to_string(dir.join("trades.jsonl")).unwrap_or_default();
    raw.lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn done_ladder() -> Vec<LadderRung> {
    vec![
        LadderRung {
            trigger: RungTrigger::RMultiple(dec!(2)),
            close_frac: dec!(0.25),
            done: true,
        },
        LadderRung {
            trigger: RungTrigger::RMultiple(dec!(4)),
            close_frac: dec!(0.25),
            done: true,
        },
    ]
}

/// Persist a plan for a position the venue already holds, with protection
/// marked resting so the tick goes straight to management.
fn seed_runner_state(dir: &Path, plan: PositionPlan) {
    let key = plan.protection_key();
    let mut state = BotState::default();
    state.plan = Some(plan);
    state.protection_key = Some(key);
    StateStore::new(dir).save(&state).unwrap();
}

#[tokio::test]
async fn entry_places_position_and_protection() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(ScriptedFeed::new(&[dec!(60000)]));
    let config = test_config(dir.path(), "");
    let gateway = Arc::new(PaperGateway::new(feed, "BTC", &config.execution));
    let mut engine = build_engine(config, gateway.clone(), vec![long_signal()]);

    engine.tick().await.unwrap();

    // equity 10000, 1% risk, 2% stop: 5000 notional at 60000
    let pos = gateway.position().await.unwrap().unwrap();
    assert_eq!(pos.side, Side::Long);
    assert_eq!(pos.size, dec!(0.08333));
    assert_eq!(pos.entry_price, dec!(60000));

    let orders = gateway.open_orders().await.unwrap();
    assert_eq!(orders.len(), 3);
    let stop = orders
        .iter()
        .find(|o| o.kind == TriggerKind::Stop)
        .unwrap();
    assert_eq!(stop.trigger_price, dec!(58800));
    let mut tp_prices: Vec<Decimal> = orders
        .iter()
        .filter(|o| o.kind == TriggerKind::TakeProfit)
        .map(|o| o.trigger_price)
        .collect();
    tp_prices.sort();
    assert_eq!(tp_prices, vec![dec!(62400), dec!(64800)]);

    let state = engine.state();
    let plan = state.plan.as_ref().unwrap();
    assert_eq!(plan.stop_price, dec!(58800));
    assert!(state.protection_key.is_some());

    let journal = read_journal(dir.path());
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].action, TradeAction::Open);
    assert_eq!(journal[0].side, Side::Long);
    assert_eq!(journal[0].stop_pct, Some(dec!(0.02)));

    // state survives on disk for a restart
    let reloaded = StateStore::new(dir.path()).load().unwrap().unwrap();
    assert!(reloaded.plan.is_some());
    assert_eq!(reloaded.protection_key, state.protection_key);
}

#[tokio::test]
async fn first_rung_fill_moves_stop_to_breakeven() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(ScriptedFeed::new(&[dec!(60000), dec!(62400)]));
    let config = test_config(dir.path(), "");
    let gateway = Arc::new(PaperGateway::new(feed, "BTC", &config.execution));
    let mut engine = build_engine(config, gateway.clone(), vec![long_signal()]);

    engine.tick().await.unwrap();
    // mid reaches the first rung; the venue trigger fills a quarter
    engine.tick().await.unwrap();

    let pos = gateway.position().await.unwrap().unwrap();
    assert_eq!(pos.size, dec!(0.0625));

    let plan = engine.state().plan.as_ref().unwrap();
    assert!(plan.ladder[0].done);
    assert!(!plan.ladder[1].done);
    assert_eq!(plan.stop_price, dec!(60000));

    let orders = gateway.open_orders().await.unwrap();
    let stop = orders
        .iter()
        .find(|o| o.kind == TriggerKind::Stop)
        .unwrap();
    assert_eq!(stop.trigger_price, dec!(60000));
    assert_eq!(stop.size, dec!(0.0625));
    // the second rung still rests
    assert!(orders
        .iter()
        .any(|o| o.kind == TriggerKind::TakeProfit && o.trigger_price == dec!(64800)));
}

#[tokio::test]
async fn backstop_closes_when_stop_level_is_crossed_without_an_order() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(ScriptedFeed::new(&[dec!(60000), dec!(58000)]));
    let config = test_config(dir.path(), "");
    let gateway = Arc::new(PaperGateway::new(feed, "BTC", &config.execution));
    let mut engine = build_engine(config, gateway.clone(), vec![long_signal()]);

    engine.tick().await.unwrap();

    // drop the native stop so only the in-code backstop remains
    let orders = gateway.open_orders().await.unwrap();
    let stop_ids: Vec<OrderId> = orders
        .iter()
        .filter(|o| o.kind == TriggerKind::Stop)
        .map(|o| o.id)
        .collect();
    gateway.cancel_orders(&stop_ids).await.unwrap();

    engine.tick().await.unwrap();

    assert!(gateway.position().await.unwrap().is_none());
    assert!(engine.state().plan.is_none());
    assert!(engine.state().last_exit_ms.is_some());

    let journal = read_journal(dir.path());
    let close = journal.last().unwrap();
    assert_eq!(close.action, TradeAction::Close);
    assert_eq!(close.reason, Some(CloseReason::StopOut));
    assert_eq!(close.price, dec!(58000));
}

#[tokio::test]
async fn daily_loss_breach_halts_trading() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(ScriptedFeed::new(&[dec!(60000), dec!(58700)]));
    let mut config = test_config(dir.path(), "");
    config.risk.max_daily_loss_usd = dec!(50);
    let gateway = Arc::new(PaperGateway::new(feed, "BTC", &config.execution));
    let mut engine = build_engine(config, gateway.clone(), vec![long_signal(), long_signal()]);

    engine.tick().await.unwrap();
    // the native stop fires at 58800 for roughly a 100 USD loss
    engine.tick().await.unwrap();

    assert!(engine.state().halted);
    assert!(gateway.position().await.unwrap().is_none());

    // latched halt ignores the queued signal
    engine.tick().await.unwrap();
    assert!(gateway.position().await.unwrap().is_none());

    let reloaded = StateStore::new(dir.path()).load().unwrap().unwrap();
    assert!(reloaded.halted);
}

#[tokio::test]
async fn reentry_cooldown_blocks_fresh_entry() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(ScriptedFeed::new(&[dec!(60000)]));
    let mut config = test_config(dir.path(), "");
    config.risk.reentry_cooldown_secs = 300;

    let mut state = BotState::default();
    state.last_exit_ms = Some(chrono::Utc::now().timestamp_millis() - 1_000);
    StateStore::new(dir.path()).save(&state).unwrap();

    let gateway = Arc::new(PaperGateway::new(feed, "BTC", &config.execution));
    let mut engine = build_engine(config, gateway.clone(), vec![long_signal()]);

    engine.tick().await.unwrap();

    assert!(gateway.position().await.unwrap().is_none());
    assert!(read_journal(dir.path()).is_empty());
}

#[tokio::test]
async fn reentry_cooldown_releases_once_elapsed() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(ScriptedFeed::new(&[dec!(60000)]));
    let mut config = test_config(dir.path(), "");
    config.risk.reentry_cooldown_secs = 300;

    let mut state = BotState::default();
    state.last_exit_ms = Some(chrono::Utc::now().timestamp_millis() - 301_000);
    StateStore::new(dir.path()).save(&state).unwrap();

    let gateway = Arc::new(PaperGateway::new(feed, "BTC", &config.execution));
    let mut engine = build_engine(config, gateway.clone(), vec![long_signal()]);

    engine.tick().await.unwrap();

    let pos = gateway.position().await.unwrap().unwrap();
    assert_eq!(pos.side, Side::Long);
    let journal = read_journal(dir.path());
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].action, TradeAction::Open);
}

#[tokio::test]
async fn loss_cooldown_blocks_fresh_entry() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(ScriptedFeed::new(&[dec!(60000)]));
    let mut config = test_config(dir.path(), "");
    config.risk.loss_cooldown_mins = 30;

    let mut state = BotState::default();
    state.last_loss_ms = Some(chrono::Utc::now().timestamp_millis() - 60_000);
    StateStore::new(dir.path()).save(&state).unwrap();

    let gateway = Arc::new(PaperGateway::new(feed, "BTC", &config.execution));
    let mut engine = build_engine(config, gateway.clone(), vec![long_signal()]);

    engine.tick().await.unwrap();

    assert!(gateway.position().await.unwrap().is_none());
    assert!(read_journal(dir.path()).is_empty());
}

#[tokio::test]
async fn completed_rung_does_not_refire_on_later_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(ScriptedFeed::new(&[dec!(60000), dec!(62400)]));
    let config = test_config(dir.path(), "");
    let gateway = Arc::new(PaperGateway::new(feed, "BTC", &config.execution));
    let mut engine = build_engine(config, gateway.clone(), vec![long_signal()]);

    engine.tick().await.unwrap();
    engine.tick().await.unwrap();
    let key_after_fill = engine.state().protection_key.clone();

    // mid holds at the first rung's price; nothing may fire again
    engine.tick().await.unwrap();
    engine.tick().await.unwrap();

    let pos = gateway.position().await.unwrap().unwrap();
    assert_eq!(pos.size, dec!(0.0625));
    let plan = engine.state().plan.as_ref().unwrap();
    assert!(plan.ladder[0].done);
    assert!(!plan.ladder[1].done);
    assert_eq!(plan.stop_price, dec!(60000));
    assert_eq!(engine.state().protection_key, key_after_fill);
    // only the entry is journaled; the rung filled natively on the venue
    let journal = read_journal(dir.path());
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].action, TradeAction::Open);
}

#[tokio::test]
async fn venue_flat_with_recorded_plan_reconciles_as_external_close() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(ScriptedFeed::new(&[dec!(60000)]));
    let config = test_config(dir.path(), "");

    let plan = PositionPlan::new(
        Side::Long,
        dec!(59000),
        dec!(0.1),
        dec!(5900),
        dec!(590),
        dec!(0.02),
        Vec::new(),
    );
    let mut state = BotState::default();
    state.plan = Some(plan);
    StateStore::new(dir.path()).save(&state).unwrap();

    let gateway = Arc::new(PaperGateway::new(feed, "BTC", &config.execution));
    let mut engine = build_engine(config, gateway, Vec::new());

    engine.tick().await.unwrap();

    assert!(engine.state().plan.is_none());
    assert!(engine.state().last_exit_ms.is_some());

    let journal = read_journal(dir.path());
    let close = journal.last().unwrap();
    assert_eq!(close.reason, Some(CloseReason::ExternalClose));
    assert_eq!(close.price, dec!(60000));
    assert_eq!(close.pnl_usd, Some(dec!(100)));
}

#[tokio::test]
async fn runner_stop_trails_the_mid_after_ladder_completes() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(ScriptedFeed::new(&[dec!(60000), dec!(61000), dec!(61000)]));
    let config = test_config(
        dir.path(),
        r#"
[exits.trailing_after_tp2]
enabled = true
trail_pct = 0.005
min_update_secs = 0
"#,
    );
    let gateway = Arc::new(PaperGateway::new(feed, "BTC", &config.execution));
    // the venue holds a runner from a completed ladder
    gateway.place_market(Side::Long, dec!(0.5)).await.unwrap();
    let plan = PositionPlan::new(
        Side::Long,
        dec!(60000),
        dec!(0.5),
        dec!(30000),
        dec!(3000),
        dec!(0.02),
        done_ladder(),
    );
    seed_runner_state(dir.path(), plan);

    let mut engine = build_engine(config, gateway.clone(), Vec::new());

    engine.tick().await.unwrap();

    let plan = engine.state().plan.as_ref().unwrap();
    assert_eq!(plan.stop_price, dec!(60695));
    assert!(engine.state().last_trail_ms.is_some());
    let orders = gateway.open_orders().await.unwrap();
    let stop = orders
        .iter()
        .find(|o| o.kind == TriggerKind::Stop)
        .unwrap();
    assert_eq!(stop.trigger_price, dec!(60695));
    assert_eq!(stop.size, dec!(0.5));

    // an unchanged mid produces no looser stop
    engine.tick().await.unwrap();
    assert_eq!(
        engine.state().plan.as_ref().unwrap().stop_price,
        dec!(60695)
    );
}

#[tokio::test]
async fn opposite_signal_closes_the_runner() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(ScriptedFeed::new(&[dec!(60000), dec!(61000)]));
    let config = test_config(
        dir.path(),
        r#"
[exits]
runner_exit = "signal"

[exits.trailing_after_tp2]
enabled = false
"#,
    );
    let gateway = Arc::new(PaperGateway::new(feed, "BTC", &config.execution));
    gateway.place_market(Side::Long, dec!(0.5)).await.unwrap();
    let plan = PositionPlan::new(
        Side::Long,
        dec!(60000),
        dec!(0.5),
        dec!(30000),
        dec!(3000),
        dec!(0.02),
        done_ladder(),
    );
    seed_runner_state(dir.path(), plan);

    let mut engine = build_engine(config, gateway.clone(), vec![short_signal()]);

    engine.tick().await.unwrap();

    assert!(gateway.position().await.unwrap().is_none());
    assert!(engine.state().plan.is_none());

    let journal = read_journal(dir.path());
    let close = journal.last().unwrap();
    assert_eq!(close.reason, Some(CloseReason::RunnerExit));
    assert_eq!(close.price, dec!(61000));
    assert_eq!(close.pnl_usd, Some(dec!(500)));
}

/// Venue wrapper whose trigger placement always fails
struct TriggerlessGateway {
    inner: PaperGateway,
}

#[async_trait]
impl ExchangeGateway for TriggerlessGateway {
    async fn mid_price(&self) -> anyhow::Result<Decimal> {
        self.inner.mid_price().await
    }

    async fn position(&self) -> anyhow::Result<Option<PositionSnapshot>> {
        self.inner.position().await
    }

    async fn open_orders(&self) -> anyhow::Result<Vec<OpenOrder>> {
        self.inner.open_orders().await
    }

    async fn place_market(&self, side: Side, size: Decimal) -> anyhow::Result<MarketFillReport> {
        self.inner.place_market(side, size).await
    }

    async fn place_trigger(
        &self,
        _kind: TriggerKind,
        _trigger_price: Decimal,
        _size: Decimal,
    ) -> anyhow::Result<OrderId> {
        anyhow::bail!("trigger orders rejected")
    }

    async fn cancel_orders(&self, ids: &[OrderId]) -> anyhow::Result<()> {
        self.inner.cancel_orders(ids).await
    }

    async fn market_close(&self, size: Option<Decimal>) -> anyhow::Result<MarketFillReport> {
        self.inner.market_close(size).await
    }

    async fn account_value(&self) -> anyhow::Result<Decimal> {
        self.inner.account_value().await
    }

    async fn recent_fills(&self, since_ms: i64) -> anyhow::Result<Vec<VenueFill>> {
        self.inner.recent_fills(since_ms).await
    }

    async fn candles(
        &self,
        interval: CandleInterval,
        lookback: chrono::Duration,
    ) -> anyhow::Result<Candles> {
        self.inner.candles(interval, lookback).await
    }
}

#[tokio::test]
async fn unprotected_entry_is_closed_again() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Arc::new(ScriptedFeed::new(&[dec!(60000)]));
    let config = test_config(dir.path(), "");
    let gateway = Arc::new(TriggerlessGateway {
        inner: PaperGateway::new(feed, "BTC", &config.execution),
    });
    let mut engine = build_engine(config, gateway.clone(), vec![long_signal()]);

    engine.tick().await.unwrap();

    // entry went through but no stop could rest, so the position is gone
    assert!(gateway.position().await.unwrap().is_none());
    assert!(engine.state().plan.is_none());
    assert!(engine.state().protection_key.is_none());

    let journal = read_journal(dir.path());
    assert_eq!(journal.len(), 2);
    assert_eq!(journal[0].action, TradeAction::Open);
    assert_eq!(journal[1].action, TradeAction::Close);
    assert_eq!(journal[1].reason, Some(CloseReason::ProtectionUnconfirmed));
}
