//! Prometheus metrics

use metrics::{counter, gauge};

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Loop ticks that ran to completion
    Ticks,
    /// Loop ticks that errored
    TickErrors,
    /// Entry orders placed
    Entries,
    /// Protection placement passes that completed
    ProtectionPlacements,
    /// Positions fully closed, any reason
    Closes,
    /// Entry signals emitted by the detector
    Signals,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Current equity
    Equity,
    /// Realized PnL since UTC midnight
    DailyPnl,
    /// Open position size in coin units
    PositionSize,
    /// Consecutive loop errors
    ErrStreak,
    /// 1 while the daily-loss halt latch is set
    Halted,
}

/// Increment a counter by one
pub fn inc_counter(metric: CounterMetric) {
    let metric_name = match metric {
        CounterMetric::Ticks => "signalbot_ticks_total",
        CounterMetric::TickErrors => "signalbot_tick_errors_total",
        CounterMetric::Entries => "signalbot_entries_total",
        CounterMetric::ProtectionPlacements => "signalbot_protection_placements_total",
        CounterMetric::Closes => "signalbot_closes_total",
        CounterMetric::Signals => "signalbot_signals_total",
    };
    counter!(metric_name).increment(1);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    let metric_name = match metric {
        GaugeMetric::Equity => "signalbot_equity_usd",
        GaugeMetric::DailyPnl => "signalbot_daily_pnl_usd",
        GaugeMetric::PositionSize => "signalbot_position_size",
        GaugeMetric::ErrStreak => "signalbot_err_streak",
        GaugeMetric::Halted => "signalbot_halted",
    };
    gauge!(metric_name).set(value);
}
