//! Persisted bot state
//!
//! One document, one writer: the lifecycle engine owns this state and
//! everything else reads it through snapshots. The active position is an
//! explicit `PositionPlan` rather than a bag of nullable fields, so "flat"
//! and "holding" cannot be half-true.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::TpRungConfig;
use crate::signal::Side;

/// How a ladder rung's target price is derived from the entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RungTrigger {
    /// Multiple of the stop distance
    RMultiple(Decimal),
    /// Fixed fraction of the entry price
    PctFromEntry(Decimal),
}

/// One take-profit rung, frozen from config at entry time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LadderRung {
    pub trigger: RungTrigger,
    /// Fraction of the initial size this rung closes
    pub close_frac: Decimal,
    pub done: bool,
}

impl LadderRung {
    /// Build from config; a rung with neither pct nor r-multiple is dropped
    pub fn from_config(rung: &TpRungConfig) -> Option<Self> {
        let trigger = rung
            .pct
            .map(RungTrigger::PctFromEntry)
            .or(rung.r_multiple.map(RungTrigger::RMultiple))?;
        Some(Self {
            trigger,
            close_frac: rung.close_frac,
            done: false,
        })
    }

    pub fn target_price(&self, side: Side, entry_price: Decimal, stop_pct: Decimal) -> Decimal {
        let pct = match self.trigger {
            RungTrigger::PctFromEntry(p) => p,
            RungTrigger::RMultiple(r) => r * stop_pct,
        };
        match side {
            Side::Long => entry_price * (Decimal::ONE + pct),
            Side::Short => entry_price * (Decimal::ONE - pct),
        }
    }
}

/// The open position as this bot understands it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionPlan {
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_notional_usd: Decimal,
    /// Size at entry, before any rung closed
    pub initial_size: Decimal,
    pub margin_usd: Decimal,
    /// Stop distance as a fraction of entry
    pub stop_pct: Decimal,
    /// Current stop level; ratchets as rungs complete
    pub stop_price: Decimal,
    pub ladder: Vec<LadderRung>,
}

impl PositionPlan {
    pub fn new(
        side: Side,
        entry_price: Decimal,
        initial_size: Decimal,
        entry_notional_usd: Decimal,
        margin_usd: Decimal,
        stop_pct: Decimal,
        ladder: Vec<LadderRung>,
    ) -> Self {
        let stop_price = match side {
            Side::Long => entry_price * (Decimal::ONE - stop_pct),
            Side::Short => entry_price * (Decimal::ONE + stop_pct),
        };
        Self {
            side,
            entry_price,
            entry_notional_usd,
            initial_size,
            margin_usd,
            stop_pct,
            stop_price,
            ladder,
        }
    }

    /// Identity of the protection set this position needs. Re-deriving the
    /// same key means the venue's stop/TP orders are already correct.
    pub fn protection_key(&self) -> String {
        format!(
            "{}:{:.2}:{:.5}:{:.6}",
            self.side, self.entry_price, self.initial_size, self.stop_pct
        )
    }

    /// Fraction of the initial size closed once rungs `0..=through` fill
    pub fn cumulative_close_frac(&self, through: usize) -> Decimal {
        self.ladder
            .iter()
            .take(through + 1)
            .map(|r| r.close_frac)
            .fold(Decimal::ZERO, |acc, f| acc + f)
    }

    /// Price of the first rung, used as the trail target once rung two fills
    pub fn first_rung_price(&self) -> Option<Decimal> {
        self.ladder
            .first()
            .map(|r| r.target_price(self.side, self.entry_price, self.stop_pct))
    }
}

/// Everything the bot persists across restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BotState {
    /// Daily-loss halt latch; only a manual restart clears it
    pub halted: bool,
    pub last_action_ms: i64,
    pub backoff_until_ms: i64,
    pub err_streak: u32,
    /// Key of the protection set currently resting on the venue
    pub protection_key: Option<String>,
    pub plan: Option<PositionPlan>,
    pub last_exit_ms: Option<i64>,
    pub last_signal_ms: Option<i64>,
    pub last_loss_ms: Option<i64>,
    pub last_trail_ms: Option<i64>,
    /// High-water mark of processed fill timestamps
    pub fill_cursor_ms: Option<i64>,
}

impl BotState {
    /// Forget the position and its protection, keeping loop bookkeeping
    pub fn reset_position(&mut self) {
        self.plan = None;
        self.protection_key = None;
        self.last_trail_ms = None;
    }
}
