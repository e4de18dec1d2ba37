//! Trade event log
//!
//! Append-only JSONL record of opens and closes under the data directory.
//! This is the audit trail; the state file is the working document.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::signal::Side;

/// Why a position (or part of one) was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Backstop saw price through the stop level
    StopOut,
    /// Opposite signal closed the runner
    RunnerExit,
    /// Venue reported flat while the plan said holding
    ExternalClose,
    /// Operator closed via the CLI
    ManualClose,
    /// Protection could not be confirmed after entry
    ProtectionUnconfirmed,
    /// Daily loss ceiling breached
    DailyHalt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Open,
    Close,
}

/// One line of the trade log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub time_ms: i64,
    pub action: TradeAction,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notional_usd: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub margin_usd: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stop_pct: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pnl_usd: Option<Decimal>,
    /// Set on ladder fills; index of the rung that closed
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tp_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<CloseReason>,
    /// Signal description captured at entry
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signal_reason: Option<String>,
}

impl TradeEvent {
    pub fn open(
        side: Side,
        price: Decimal,
        size: Decimal,
        notional_usd: Decimal,
        margin_usd: Decimal,
        stop_pct: Decimal,
        signal_reason: impl Into<String>,
    ) -> Self {
        Self {
            time_ms: Utc::now().timestamp_millis(),
            action: TradeAction::Open,
            side,
            price,
            size,
            notional_usd: Some(notional_usd),
            margin_usd: Some(margin_usd),
            stop_pct: Some(stop_pct),
            pnl_usd: None,
            tp_index: None,
            reason: None,
            signal_reason: Some(signal_reason.into()),
        }
    }

    pub fn close(
        side: Side,
        price: Decimal,
        size: Decimal,
        pnl_usd: Option<Decimal>,
        reason: CloseReason,
    ) -> Self {
        Self {
            time_ms: Utc::now().timestamp_millis(),
            action: TradeAction::Close,
            side,
            price,
            size,
            notional_usd: None,
            margin_usd: None,
            stop_pct: None,
            pnl_usd,
            tp_index: None,
            reason: Some(reason),
            signal_reason: None,
        }
    }

    pub fn partial_take_profit(
        side: Side,
        price: Decimal,
        size: Decimal,
        pnl_usd: Option<Decimal>,
        tp_index: usize,
    ) -> Self {
        Self {
            time_ms: Utc::now().timestamp_millis(),
            action: TradeAction::Close,
            side,
            price,
            size,
            notional_usd: None,
            margin_usd: None,
            stop_pct: None,
            pnl_usd,
            tp_index: Some(tp_index),
            reason: None,
            signal_reason: None,
        }
    }
}

/// Appends trade events to `trades.jsonl`
pub struct TradeLog {
    path: PathBuf,
}

impl TradeLog {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join("trades.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &TradeEvent) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(event)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_append_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let log = TradeLog::new(dir.path());
        log.append(&TradeEvent::open(
            Side::Long,
            dec!(43000),
            dec!(0.1),
            dec!(4300),
            dec!(430),
            dec!(0.02),
            "trend up",
        ))
        .unwrap();
        log.append(&TradeEvent::close(
            Side::Long,
            dec!(42000),
            dec!(0.1),
            Some(dec!(-100)),
            CloseReason::StopOut,
        ))
        .unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let open: TradeEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(open.action, TradeAction::Open);
        assert_eq!(open.signal_reason.as_deref(), Some("trend up"));

        let close: TradeEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(close.reason, Some(CloseReason::StopOut));
        assert_eq!(close.pnl_usd, Some(dec!(-100)));
    }

    #[test]
    fn test_close_lines_omit_entry_fields() {
        let dir = tempfile::tempdir().unwrap();
        let log = TradeLog::new(dir.path());
        log.append(&TradeEvent::close(
            Side::Short,
            dec!(100),
            dec!(1),
            None,
            CloseReason::ExternalClose,
        ))
        .unwrap();
        let raw = fs::read_to_string(log.path()).unwrap();
        assert!(!raw.contains("margin_usd"));
        assert!(!raw.contains("signal_reason"));
        assert!(raw.contains("external_close"));
    }

    #[test]
    fn test_partial_take_profit_carries_rung_index() {
        let event =
            TradeEvent::partial_take_profit(Side::Long, dec!(110), dec!(0.25), Some(dec!(2.5)), 1);
        let json = serde_json::to_string(&event).unwrap();
        let back: TradeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tp_index, Some(1));
        assert_eq!(back.pnl_usd, Some(dec!(2.5)));
        assert_eq!(back.action, TradeAction::Close);
    }
}
